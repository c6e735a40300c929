pub mod bam;
pub mod fasta;
pub mod positions;
mod traits;

pub use traits::ReadRecord;
