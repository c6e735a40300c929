mod indexed_reader;
mod lookup;

pub use indexed_reader::{FaiRecord, IndexedReader};
pub use lookup::{InMemory, ReferenceLookup};
