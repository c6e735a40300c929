use std::fmt::{Debug, Display};
use std::sync::Arc;

use derive_getters::Dissolve;
use eyre::{ensure, Report, Result};
use impl_tools::autoimpl;
use num::{One, PrimInt};

/// Interval is a closed genomic region [start, end] in 1-based coordinates, the convention used
/// by position files, VCF and SAM. Empty intervals and a zero start are prohibited.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Dissolve)]
pub struct Interval<Idx: PrimInt> {
    start: Idx,
    end: Idx,
}

/// Trait for types that can be viewed as closed 1-based genomic intervals [start, end].
#[autoimpl(for <T: trait + ?Sized> &T, Box<T>, Arc<T>)]
#[allow(clippy::len_without_is_empty)]
pub trait IntervalOp {
    type Idx: PrimInt;

    /// First position covered by the interval-like object.
    fn start(&self) -> Self::Idx;

    /// Last position covered by the interval-like object.
    fn end(&self) -> Self::Idx;

    /// Number of positions covered by the interval-like object.
    fn len(&self) -> Self::Idx {
        self.end() - self.start() + Self::Idx::one()
    }

    /// Check if the interval-like object covers a given position.
    fn contains(&self, pos: Self::Idx) -> bool {
        self.start() <= pos && pos <= self.end()
    }

    /// Check if the interval-like object fully covers another one.
    fn covers(&self, other: &impl IntervalOp<Idx = Self::Idx>) -> bool {
        self.start() <= other.start() && other.end() <= self.end()
    }

    /// Check if two interval-like objects share at least one position.
    fn intersects(&self, other: &impl IntervalOp<Idx = Self::Idx>) -> bool {
        self.start() <= other.end() && other.start() <= self.end()
    }

    fn as_interval(&self) -> Interval<Self::Idx> {
        Interval {
            start: self.start(),
            end: self.end(),
        }
    }
}

impl<T: PrimInt> IntervalOp for Interval<T> {
    type Idx = T;

    #[inline(always)]
    fn start(&self) -> Self::Idx {
        self.start
    }
    #[inline(always)]
    fn end(&self) -> Self::Idx {
        self.end
    }
}

impl<Idx: PrimInt + Debug> Interval<Idx> {
    pub fn new(start: Idx, end: Idx) -> Result<Self> {
        ensure!(
            start >= Idx::one(),
            "Invalid interval: 1-based start must be positive, got {:?}",
            start
        );
        ensure!(
            start <= end,
            "Invalid interval: start > end ({:?} > {:?})",
            start,
            end
        );
        Ok(Self { start, end })
    }

    /// Pad the interval on both sides. The start never drops below 1.
    pub fn padded(&self, flank: Idx) -> Self {
        let start = if self.start > flank {
            (self.start - flank).max(Idx::one())
        } else {
            Idx::one()
        };
        Self {
            start,
            end: self.end.saturating_add(flank),
        }
    }

    /// The smallest interval covering all the given ones.
    pub fn hull<'a>(intervals: impl IntoIterator<Item = &'a Self>) -> Option<Self>
    where
        Idx: 'a,
    {
        intervals.into_iter().fold(None, |acc, x| match acc {
            None => Some(*x),
            Some(acc) => Some(Self {
                start: acc.start.min(x.start),
                end: acc.end.max(x.end),
            }),
        })
    }

    pub fn cast<T: PrimInt>(&self) -> Option<Interval<T>> {
        match (T::from(self.start), T::from(self.end)) {
            (Some(start), Some(end)) => Some(Interval { start, end }),
            _ => None,
        }
    }
}

/// A single-base interval at the first position.
impl<Idx: PrimInt> Default for Interval<Idx> {
    fn default() -> Self {
        Self {
            start: Idx::one(),
            end: Idx::one(),
        }
    }
}

impl<Idx: PrimInt + Display> Display for Interval<Idx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl<Idx: PrimInt + Debug> TryFrom<(Idx, Idx)> for Interval<Idx> {
    type Error = Report;

    fn try_from(value: (Idx, Idx)) -> Result<Self, Self::Error> {
        Self::new(value.0, value.1)
    }
}

impl<Idx: PrimInt> From<Interval<Idx>> for (Idx, Idx) {
    fn from(interval: Interval<Idx>) -> Self {
        (interval.start, interval.end)
    }
}
