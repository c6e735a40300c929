pub use accessor::{OpenAccessor, ReadAccessor, Reads};
pub use filter::{FlagFilter, ReadFilter};
pub use memory::InMemory;
pub use reader::{BamFiles, Reader};
pub use record::{flags, AlignedRead, Cigar, CigarOp};

mod accessor;
mod filter;
mod indexed_reader;
mod memory;
mod query;
mod reader;
mod record;
