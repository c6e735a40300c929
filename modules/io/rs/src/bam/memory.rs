use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use basepile_core_rs::loc::{Interval, IntervalOp};
use eyre::{eyre, Result};

use super::accessor::{resolve, Exhausted, OpenAccessor, ReadAccessor, Reads};
use super::record::AlignedRead;
use crate::ReadRecord;

/// Alignments kept in memory and addressed by a virtual file path. Handy for small panels and
/// for exercising the pileup engine without touching the disk.
#[derive(Clone, Debug, Default)]
pub struct InMemory {
    files: AHashMap<PathBuf, Arc<Vec<AlignedRead>>>,
}

impl InMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register reads for a path. Reads are replayed in the given order by full scans.
    pub fn insert(&mut self, path: impl Into<PathBuf>, reads: Vec<AlignedRead>) -> &mut Self {
        self.files.insert(path.into(), Arc::new(reads));
        self
    }
}

impl OpenAccessor for InMemory {
    fn open(&self, path: &Path) -> Result<Box<dyn ReadAccessor>> {
        let reads = self
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| eyre!("No alignments registered for {}", path.display()))?;

        let mut contigs = AHashMap::new();
        for read in reads.iter().filter(|x| !x.contig().is_empty()) {
            let next = contigs.len();
            contigs.entry(read.contig().clone()).or_insert(next);
        }
        let names = contigs
            .iter()
            .map(|(name, id)| (*id, name.clone()))
            .collect();

        Ok(Box::new(MemoryAccessor {
            reads,
            contigs,
            names,
        }))
    }
}

struct MemoryAccessor {
    reads: Arc<Vec<AlignedRead>>,
    contigs: AHashMap<String, usize>,
    names: AHashMap<usize, String>,
}

impl ReadAccessor for MemoryAccessor {
    fn query(&mut self, contig: &str, interval: Interval<u64>) -> Result<Reads<'_>> {
        let name = match resolve(contig, &self.contigs).and_then(|id| self.names.get(&id)) {
            Some(name) => name.clone(),
            None => return Ok(Box::new(Exhausted)),
        };

        let reads = self.reads.iter().filter(move |read| {
            *read.contig() == name
                && !read.is_unmapped()
                && read.span().is_some_and(|span| span.intersects(&interval))
        });
        Ok(Box::new(Replay { reads }))
    }

    fn scan(&mut self) -> Result<Reads<'_>> {
        Ok(Box::new(Replay {
            reads: self.reads.iter(),
        }))
    }
}

struct Replay<I> {
    reads: I,
}

impl<'a, I: Iterator<Item = &'a AlignedRead>> ReadRecord for Replay<I> {
    type Record = AlignedRead;

    fn read_record(&mut self, into: &mut Self::Record) -> Result<bool> {
        match self.reads.next() {
            Some(read) => {
                into.clone_from(read);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
