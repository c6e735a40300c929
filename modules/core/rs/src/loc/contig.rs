//! Naming conventions for assembly contigs.
//!
//! Position files, reference indices and alignment headers disagree on how chromosomes are
//! named ("1" vs "chr1", "M" vs "MT" vs "chrM"). Positions are normalized once when loaded and
//! every lookup against an external resource goes through [`aliases`].
use std::cmp::Ordering;

const MITOCHONDRIAL: &str = "chrMT";

fn is_primary(name: &str) -> bool {
    !name.is_empty() && (name.bytes().all(|x| x.is_ascii_digit()) || name == "X" || name == "Y")
}

fn is_mitochondrial(name: &str) -> bool {
    matches!(name, "M" | "MT" | "chrM" | "chrMT")
}

/// Canonical name of a contig: autosomes and sex chromosomes get the "chr" prefix, every
/// mitochondrial spelling becomes "chrMT". Other names are kept as is.
pub fn normalize(name: &str) -> String {
    let name = name.trim();
    if is_mitochondrial(name) {
        MITOCHONDRIAL.to_string()
    } else if is_primary(name) {
        format!("chr{}", name)
    } else {
        name.to_string()
    }
}

/// Candidate names to try, in order, when the contig is missing from an external resource.
/// The first candidate is always the name itself.
pub fn aliases(name: &str) -> Vec<String> {
    let mut candidates = vec![name.to_string()];
    let mut push = |x: String| {
        if !candidates.contains(&x) {
            candidates.push(x);
        }
    };

    if is_mitochondrial(name) {
        for alias in ["chrMT", "chrM", "MT", "M"] {
            push(alias.to_string());
        }
    } else if let Some(bare) = name.strip_prefix("chr") {
        push(bare.to_string());
    } else {
        push(format!("chr{}", name));
    }

    candidates
}

/// Natural ordering of contig names, e.g. chr2 < chr10 < chrX.
pub fn ordering(a: &str, b: &str) -> Ordering {
    natord::compare(a, b)
}
