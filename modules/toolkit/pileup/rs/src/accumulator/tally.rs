use ahash::{AHashMap, AHashSet};
use basepile_core_rs::loc::{PerStrand, Strand};

/// Keys reported for single-base windows, in output order.
pub const BASES: [&[u8]; 5] = [b"A", b"C", b"G", b"T", b"N"];

/// A map from observed bases to values that remembers the insertion order of its keys.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Keyed<V> {
    index: AHashMap<Vec<u8>, usize>,
    entries: Vec<(Vec<u8>, V)>,
}

impl<V> Default for Keyed<V> {
    fn default() -> Self {
        Self {
            index: AHashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<V> Keyed<V> {
    pub fn get(&self, key: &[u8]) -> Option<&V> {
        self.index.get(key).map(|ind| &self.entries[*ind].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &V)> {
        self.entries.iter().map(|(key, value)| (key.as_slice(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(|(key, _)| key.as_slice())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn map<R>(&self, mut f: impl FnMut(&V) -> R) -> Keyed<R> {
        Keyed {
            index: self.index.clone(),
            entries: self
                .entries
                .iter()
                .map(|(key, value)| (key.clone(), f(value)))
                .collect(),
        }
    }
}

impl<V: Default> Keyed<V> {
    /// Single-base windows always report A, C, G, T and N, even when nothing was observed.
    pub fn seeded(single_base: bool) -> Self {
        let mut keyed = Self::default();
        if single_base {
            for base in BASES {
                keyed.get_or_insert(base);
            }
        }
        keyed
    }

    pub fn get_or_insert(&mut self, key: &[u8]) -> &mut V {
        let ind = match self.index.get(key) {
            Some(ind) => *ind,
            None => {
                let ind = self.entries.len();
                self.index.insert(key.to_vec(), ind);
                self.entries.push((key.to_vec(), V::default()));
                ind
            }
        };
        &mut self.entries[ind].1
    }
}

impl Keyed<u64> {
    /// Sum of all values.
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, x)| *x).sum()
    }

    /// Value of the key or zero.
    pub fn count(&self, key: &[u8]) -> u64 {
        self.get(key).copied().unwrap_or(0)
    }

    /// Union of two maps summing values of shared keys. Keys of `self` come first.
    pub fn merged(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for (key, value) in other.iter() {
            *merged.get_or_insert(key) += *value;
        }
        merged
    }
}

/// Per-key observations of a single (variant, sample) pair.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Tally {
    /// Read counts regardless of the strand.
    Coverage(Keyed<u64>),
    /// Read counts for each strand.
    Stranded(PerStrand<Keyed<u64>>),
    /// Distinct fragment starts for each strand.
    NovelStarts(PerStrand<Keyed<AHashSet<u64>>>),
}

/// Which tally a new accumulator starts with.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum TallyKind {
    #[default]
    Coverage,
    Stranded,
    NovelStarts,
}

impl Tally {
    pub fn new(kind: TallyKind, single_base: bool) -> Self {
        match kind {
            TallyKind::Coverage => Self::Coverage(Keyed::seeded(single_base)),
            TallyKind::Stranded => Self::Stranded(PerStrand::new(
                Keyed::seeded(single_base),
                Keyed::seeded(single_base),
            )),
            TallyKind::NovelStarts => Self::NovelStarts(PerStrand::new(
                Keyed::seeded(single_base),
                Keyed::seeded(single_base),
            )),
        }
    }

    /// Record an accepted read. `fragment_start` is only used by novel-start tallies.
    pub fn add(&mut self, key: &[u8], strand: Strand, fragment_start: u64) {
        match self {
            Self::Coverage(counts) => *counts.get_or_insert(key) += 1,
            Self::Stranded(counts) => *counts.get_mut(strand).get_or_insert(key) += 1,
            Self::NovelStarts(starts) => {
                starts
                    .get_mut(strand)
                    .get_or_insert(key)
                    .insert(fragment_start);
            }
        }
    }

    /// Collapse into plain counts: read counts for coverage, number of distinct starts otherwise.
    /// Returns the counts for both strands combined and, when available, for each strand.
    pub fn counts(&self) -> (Keyed<u64>, Option<PerStrand<Keyed<u64>>>) {
        let strands = match self {
            Self::Coverage(counts) => return (counts.clone(), None),
            Self::Stranded(counts) => counts.clone(),
            Self::NovelStarts(starts) => starts.map(|x| x.map(|set| set.len() as u64)),
        };
        (strands.forward.merged(&strands.reverse), Some(strands))
    }
}
