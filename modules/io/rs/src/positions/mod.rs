//! Tab-delimited files listing the genomic positions to pile up.
//!
//! Every data line yields a name, a chromosome, a 1-based inclusive interval and, depending on
//! the format, alternative bases. Header and comment lines are kept verbatim since some outputs
//! echo them back.
mod reader;

pub use reader::{parse, Format, Position, PositionFile, Reader};

const HEADER_PREFIXES: [&str; 4] = ["#", "analysis_id", "Hugo", "mutation"];

/// Check if a line of a position file is a header or a comment.
pub fn is_header(line: &str) -> bool {
    HEADER_PREFIXES.iter().any(|x| line.starts_with(x))
}
