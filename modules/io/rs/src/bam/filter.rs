use std::sync::Arc;

use derive_getters::Getters;
use impl_tools::autoimpl;

use super::record::AlignedRead;

/// A boolean predicate over aligned reads. Reads for which it returns `false` are rejected before
/// any base is inspected.
#[autoimpl(for<T: trait + ?Sized> &T, Box<T>, Arc<T>)]
pub trait ReadFilter: Send + Sync {
    fn evaluate(&self, read: &AlignedRead) -> bool;
}

/// Filter on SAM flags and mapping quality.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Getters)]
pub struct FlagFilter {
    // All of these flags must be set
    require: u16,
    // None of these flags may be set
    exclude: u16,
    minmapq: u8,
}

impl FlagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_require(mut self, require: u16) -> Self {
        self.require = require;
        self
    }

    pub fn with_exclude(mut self, exclude: u16) -> Self {
        self.exclude = exclude;
        self
    }

    pub fn with_minmapq(mut self, minmapq: u8) -> Self {
        self.minmapq = minmapq;
        self
    }
}

impl ReadFilter for FlagFilter {
    fn evaluate(&self, read: &AlignedRead) -> bool {
        let flags = *read.flags();
        flags & self.require == self.require
            && flags & self.exclude == 0
            && *read.mapq() >= self.minmapq
    }
}
