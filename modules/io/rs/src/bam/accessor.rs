use std::path::Path;

use ahash::AHashMap;
use basepile_core_rs::loc::{contig, Interval};
use eyre::Result;

use super::record::AlignedRead;
use crate::ReadRecord;

/// A stream of aligned reads borrowed from an accessor.
pub type Reads<'a> = Box<dyn ReadRecord<Record = AlignedRead> + 'a>;

/// Access to the aligned reads of a single sample.
pub trait ReadAccessor {
    /// Reads whose aligned span overlaps the interval on the given contig. Contig names are
    /// resolved through the usual aliases; an unknown contig yields no reads.
    fn query(&mut self, contig: &str, interval: Interval<u64>) -> Result<Reads<'_>>;

    /// All reads of the sample in their storage order, unplaced reads included.
    fn scan(&mut self) -> Result<Reads<'_>>;
}

/// Opens a fresh accessor for an alignment file. Every worker opens its own accessors, so
/// accessors themselves are never shared between threads.
pub trait OpenAccessor: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn ReadAccessor>>;
}

/// An accessor that never yields anything.
pub(super) struct Exhausted;

impl ReadRecord for Exhausted {
    type Record = AlignedRead;

    fn read_record(&mut self, _: &mut Self::Record) -> Result<bool> {
        Ok(false)
    }
}

/// Find the identifier of a contig trying all of its aliases.
pub(super) fn resolve(name: &str, known: &AHashMap<String, usize>) -> Option<usize> {
    contig::aliases(name)
        .iter()
        .find_map(|alias| known.get(alias).copied())
}
