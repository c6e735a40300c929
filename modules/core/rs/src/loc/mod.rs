pub use interval::{Interval, IntervalOp};
pub use per_strand::PerStrand;
pub use strand::Strand;

pub mod contig;
mod interval;
mod per_strand;
mod strand;
