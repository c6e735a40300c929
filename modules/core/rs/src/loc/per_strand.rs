use derive_getters::Dissolve;
use derive_more::Constructor;

use super::strand::Strand;

/// A struct that holds data for each strand.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Dissolve, Constructor,
)]
pub struct PerStrand<T> {
    pub forward: T,
    pub reverse: T,
}

impl<T> PerStrand<T> {
    pub fn get(&self, strand: Strand) -> &T {
        match strand {
            Strand::Forward => &self.forward,
            Strand::Reverse => &self.reverse,
        }
    }

    pub fn get_mut(&mut self, strand: Strand) -> &mut T {
        match strand {
            Strand::Forward => &mut self.forward,
            Strand::Reverse => &mut self.reverse,
        }
    }

    /// Apply a function to the data of both strands.
    pub fn map<R>(&self, mut f: impl FnMut(&T) -> R) -> PerStrand<R> {
        PerStrand {
            forward: f(&self.forward),
            reverse: f(&self.reverse),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Strand, &T)> {
        [
            (Strand::Forward, &self.forward),
            (Strand::Reverse, &self.reverse),
        ]
        .into_iter()
    }
}

impl<T: Copy + std::ops::Add<Output = T>> PerStrand<T> {
    /// Sum of the values across both strands.
    pub fn total(&self) -> T {
        self.forward + self.reverse
    }
}
