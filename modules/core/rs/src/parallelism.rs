use std::cmp::Ordering;
use std::thread::available_parallelism;

use eyre::Result;

fn _normalize(requested: isize, max: isize) -> usize {
    match requested.cmp(&0) {
        Ordering::Less => (max + requested + 1).max(1) as usize,
        Ordering::Equal => 1,
        Ordering::Greater => requested.min(max) as usize,
    }
}

/// Number of threads to use given a user request. Negative values are counted from the number of
/// available cores (-1 = all cores), zero means a single thread.
pub fn available(requested: isize) -> Result<usize> {
    let max = available_parallelism()?.get() as isize;
    Ok(_normalize(requested, max))
}

/// Number of workers worth spawning for a given amount of independent work units.
/// There is always at least one worker, even when there is nothing to do.
pub fn workers(threads: usize, units: usize) -> usize {
    threads.min(units).max(1)
}
