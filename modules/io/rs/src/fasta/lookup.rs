use ahash::AHashMap;
use basepile_core_rs::loc::{contig, Interval, IntervalOp};
use eyre::{eyre, Result};
use impl_tools::autoimpl;

/// Random access to reference bases.
#[autoimpl(for<T: trait + ?Sized> &mut T, Box<T>)]
pub trait ReferenceLookup {
    /// Fetch bases of a 1-based inclusive interval on the given sequence.
    fn fetch(&mut self, seqid: &str, interval: Interval<u64>, buffer: &mut Vec<u8>) -> Result<()>;

    /// Check if the sequence is known to the lookup.
    fn contains(&self, seqid: &str) -> bool;

    /// Upper-cased bases of the interval, falling back to the contig aliases (e.g. chrM and chrMT)
    /// when the sequence is not found under its own name.
    fn bases(&mut self, chromosome: &str, interval: Interval<u64>) -> Result<Vec<u8>> {
        let seqid = contig::aliases(chromosome)
            .into_iter()
            .find(|x| self.contains(x))
            .ok_or_else(|| {
                eyre!(
                    "Unknown chromosome {} (not present in the reference index)",
                    chromosome
                )
            })?;

        let mut buffer = Vec::with_capacity(interval.len() as usize);
        self.fetch(&seqid, interval, &mut buffer)?;
        buffer.make_ascii_uppercase();
        Ok(buffer)
    }
}

/// Reference sequences held in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemory {
    sequences: AHashMap<String, Vec<u8>>,
}

impl InMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, seqid: impl Into<String>, sequence: impl Into<Vec<u8>>) -> &mut Self {
        self.sequences.insert(seqid.into(), sequence.into());
        self
    }
}

impl ReferenceLookup for InMemory {
    fn fetch(&mut self, seqid: &str, interval: Interval<u64>, buffer: &mut Vec<u8>) -> Result<()> {
        let sequence = self
            .sequences
            .get(seqid)
            .ok_or_else(|| eyre!("Reference sequence ID not found: {}", seqid))?;
        let bases = sequence
            .get((interval.start() - 1) as usize..interval.end() as usize)
            .ok_or_else(|| {
                eyre!(
                    "Interval {} is out of bounds for {} (length {})",
                    interval,
                    seqid,
                    sequence.len()
                )
            })?;
        buffer.clear();
        buffer.extend_from_slice(bases);
        Ok(())
    }

    fn contains(&self, seqid: &str) -> bool {
        self.sequences.contains_key(seqid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_bases() -> Result<()> {
        let mut reference = InMemory::new();
        reference.insert("chr1", "acgtACGT").insert("chrM", "GATC");

        assert_eq!(reference.bases("chr1", Interval::new(1, 4)?)?, b"ACGT");
        assert_eq!(reference.bases("1", Interval::new(5, 5)?)?, b"A");
        assert_eq!(reference.bases("chrMT", Interval::new(2, 3)?)?, b"AT");
        assert!(reference.bases("chr1", Interval::new(8, 9)?).is_err());
        assert!(reference.bases("chr2", Interval::new(1, 1)?).is_err());
        Ok(())
    }
}
