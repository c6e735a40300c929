use std::fmt::Display;
use std::str::FromStr;

use basepile_core_rs::loc::{Interval, Strand};
use derive_getters::Getters;
use eyre::{bail, ensure, eyre, Report, Result, WrapErr};

pub mod flags {
    pub const PAIRED: u16 = 0x1;
    pub const UNMAPPED: u16 = 0x4;
    pub const REVERSE: u16 = 0x10;
    pub const SECONDARY: u16 = 0x100;
    pub const QC_FAIL: u16 = 0x200;
    pub const DUPLICATE: u16 = 0x400;
    pub const SUPPLEMENTARY: u16 = 0x800;
}

/// Alignment operators as they appear in a CIGAR string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CigarOp {
    Match,
    Insertion,
    Deletion,
    Skip,
    SoftClip,
    HardClip,
    Pad,
    SequenceMatch,
    SequenceMismatch,
}

impl CigarOp {
    pub fn consumes_reference(&self) -> bool {
        matches!(
            self,
            Self::Match | Self::Deletion | Self::Skip | Self::SequenceMatch | Self::SequenceMismatch
        )
    }

    pub fn consumes_read(&self) -> bool {
        matches!(
            self,
            Self::Match
                | Self::Insertion
                | Self::SoftClip
                | Self::SequenceMatch
                | Self::SequenceMismatch
        )
    }

    pub fn is_clip(&self) -> bool {
        matches!(self, Self::SoftClip | Self::HardClip)
    }

    pub fn symbol(&self) -> char {
        match self {
            Self::Match => 'M',
            Self::Insertion => 'I',
            Self::Deletion => 'D',
            Self::Skip => 'N',
            Self::SoftClip => 'S',
            Self::HardClip => 'H',
            Self::Pad => 'P',
            Self::SequenceMatch => '=',
            Self::SequenceMismatch => 'X',
        }
    }
}

impl TryFrom<char> for CigarOp {
    type Error = Report;

    fn try_from(value: char) -> Result<Self> {
        Ok(match value {
            'M' => Self::Match,
            'I' => Self::Insertion,
            'D' => Self::Deletion,
            'N' => Self::Skip,
            'S' => Self::SoftClip,
            'H' => Self::HardClip,
            'P' => Self::Pad,
            '=' => Self::SequenceMatch,
            'X' => Self::SequenceMismatch,
            _ => bail!("Unknown CIGAR operator: {}", value),
        })
    }
}

/// CIGAR of an aligned read: a run-length list of alignment operators.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Cigar(pub Vec<(CigarOp, u32)>);

impl Cigar {
    pub fn iter(&self) -> impl Iterator<Item = &(CigarOp, u32)> {
        self.0.iter()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn push(&mut self, op: CigarOp, len: u32) {
        self.0.push((op, len));
    }

    /// Number of reference bases spanned by the alignment.
    pub fn reference_len(&self) -> u64 {
        self.iter()
            .filter(|(op, _)| op.consumes_reference())
            .map(|(_, len)| *len as u64)
            .sum()
    }

    /// Total length of leading clips, i.e. the distance between unclipped and aligned starts.
    pub fn leading_clips(&self) -> u64 {
        self.iter()
            .take_while(|(op, _)| op.is_clip())
            .map(|(_, len)| *len as u64)
            .sum()
    }

    pub fn contains(&self, target: CigarOp) -> bool {
        self.iter().any(|(op, _)| *op == target)
    }
}

impl FromStr for Cigar {
    type Err = Report;

    fn from_str(s: &str) -> Result<Self> {
        let mut ops = Vec::new();
        let mut len: Option<u32> = None;
        for symbol in s.chars() {
            match symbol.to_digit(10) {
                Some(digit) => {
                    len = Some(
                        len.unwrap_or(0)
                            .checked_mul(10)
                            .and_then(|x| x.checked_add(digit))
                            .ok_or_else(|| eyre!("CIGAR operator is too long: {}", s))?,
                    )
                }
                None => {
                    let op = CigarOp::try_from(symbol).wrap_err_with(|| format!("CIGAR: {}", s))?;
                    let len = len
                        .take()
                        .ok_or_else(|| eyre!("CIGAR operator without a length: {}", s))?;
                    ensure!(len > 0, "Zero-length CIGAR operator: {}", s);
                    ops.push((op, len));
                }
            }
        }
        ensure!(len.is_none(), "Dangling length at the end of CIGAR: {}", s);
        Ok(Self(ops))
    }
}

impl Display for Cigar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "*");
        }
        for (op, len) in self.iter() {
            write!(f, "{}{}", len, op.symbol())?;
        }
        Ok(())
    }
}

/// An aligned read as seen by the pileup engine. Coordinates are 1-based and inclusive.
/// Instances are reused between reads to avoid reallocating the buffers.
#[derive(Clone, PartialEq, Eq, Debug, Default, Getters)]
pub struct AlignedRead {
    name: String,
    contig: String,
    // First aligned reference position, 0 for reads without a placement
    start: u64,
    flags: u16,
    mapq: u8,
    cigar: Cigar,
    sequence: Vec<u8>,
    qualities: Vec<u8>,
}

/// Quality byte BAM stores for every base of a read without qualities.
pub const MISSING_QUALITY: u8 = 0xFF;

impl AlignedRead {
    /// Make a placed read from its textual SAM-like description. All base qualities are set to 30
    /// and the mapping quality to 60.
    pub fn new(
        name: impl Into<String>,
        contig: impl Into<String>,
        start: u64,
        cigar: &str,
        sequence: &str,
    ) -> Result<Self> {
        let read = Self {
            name: name.into(),
            contig: contig.into(),
            start,
            flags: 0,
            mapq: 60,
            cigar: cigar.parse()?,
            sequence: sequence.as_bytes().to_vec(),
            qualities: vec![30; sequence.len()],
        };
        read.validate()?;
        Ok(read)
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_mapq(mut self, mapq: u8) -> Self {
        self.mapq = mapq;
        self
    }

    pub fn with_qualities(mut self, qualities: Vec<u8>) -> Result<Self> {
        ensure!(
            qualities.len() == self.sequence.len(),
            "Read {}: {} qualities for {} bases",
            self.name,
            qualities.len(),
            self.sequence.len()
        );
        self.qualities = qualities;
        Ok(self)
    }

    /// Overwrite all fields at once, reusing the allocated buffers.
    #[allow(clippy::too_many_arguments)]
    pub fn set(
        &mut self,
        name: &str,
        contig: &str,
        start: u64,
        flags: u16,
        mapq: u8,
        cigar: impl IntoIterator<Item = (CigarOp, u32)>,
        sequence: impl IntoIterator<Item = u8>,
        qualities: &[u8],
    ) {
        self.name.clear();
        self.name.push_str(name);
        self.contig.clear();
        self.contig.push_str(contig);
        self.start = start;
        self.flags = flags;
        self.mapq = mapq;

        self.cigar.clear();
        self.cigar.0.extend(cigar);
        self.sequence.clear();
        self.sequence.extend(sequence);
        self.qualities.clear();
        // BAM fills absent qualities with 0xFF
        if qualities.first() != Some(&MISSING_QUALITY) {
            self.qualities.extend_from_slice(qualities);
        }
    }

    fn validate(&self) -> Result<()> {
        let consumed: u64 = self
            .cigar
            .iter()
            .filter(|(op, _)| op.consumes_read())
            .map(|(_, len)| *len as u64)
            .sum();
        ensure!(
            consumed == self.sequence.len() as u64,
            "Read {}: CIGAR {} consumes {} bases, but the sequence has {}",
            self.name,
            self.cigar,
            consumed,
            self.sequence.len()
        );
        Ok(())
    }

    pub fn is_unmapped(&self) -> bool {
        self.flags & flags::UNMAPPED != 0 || self.start == 0 || self.cigar.0.is_empty()
    }

    pub fn is_duplicate(&self) -> bool {
        self.flags & flags::DUPLICATE != 0
    }

    pub fn strand(&self) -> Strand {
        Strand::from_reverse_flag(self.flags & flags::REVERSE != 0)
    }

    /// Last aligned reference position (inclusive).
    pub fn end(&self) -> u64 {
        (self.start + self.cigar.reference_len()).saturating_sub(1).max(self.start)
    }

    /// Reference position of the first base, including clipped ones.
    pub fn unclipped_start(&self) -> i64 {
        self.start as i64 - self.cigar.leading_clips() as i64
    }

    /// Aligned span of the read on the reference, if it is placed.
    pub fn span(&self) -> Option<Interval<u64>> {
        if self.start == 0 {
            return None;
        }
        Interval::new(self.start, self.end()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cigar_parse() -> Result<()> {
        let cigar: Cigar = "5S10M2I3D4N6M3H".parse()?;
        assert_eq!(cigar.0.len(), 7);
        assert_eq!(cigar.0[0], (CigarOp::SoftClip, 5));
        assert_eq!(cigar.0[6], (CigarOp::HardClip, 3));
        assert_eq!(cigar.reference_len(), 10 + 3 + 4 + 6);
        assert_eq!(cigar.leading_clips(), 5);
        assert_eq!(cigar.to_string(), "5S10M2I3D4N6M3H");

        for invalid in ["10", "M", "10Q", "0M", "3M4"] {
            assert!(invalid.parse::<Cigar>().is_err(), "{}", invalid);
        }
        Ok(())
    }

    #[test]
    fn test_aligned_read_coordinates() -> Result<()> {
        let read = AlignedRead::new("r1", "chr1", 100, "2H3S10M2D5M", "NNNACGTACGTACGTACG")?;
        assert_eq!(read.end(), 116);
        assert_eq!(read.unclipped_start(), 95);
        assert_eq!(read.span(), Some(Interval::new(100, 116)?));
        assert_eq!(read.qualities().len(), 18);
        assert_eq!(read.strand(), Strand::Forward);

        let read = read.with_flags(flags::REVERSE | flags::DUPLICATE);
        assert_eq!(read.strand(), Strand::Reverse);
        assert!(read.is_duplicate());
        assert!(!read.is_unmapped());
        Ok(())
    }

    #[test]
    fn test_missing_qualities() -> Result<()> {
        let mut read = AlignedRead::new("r1", "chr1", 100, "4M", "ACGT")?;
        let cigar = [(CigarOp::Match, 4)];
        read.set("r2", "chr1", 100, 0, 60, cigar, b"ACGT".iter().copied(), &[MISSING_QUALITY; 4]);
        assert!(read.qualities().is_empty());
        assert_eq!(read.sequence(), b"ACGT");

        read.set("r3", "chr1", 100, 0, 60, cigar, b"ACGT".iter().copied(), &[7, 8, 9, 10]);
        assert_eq!(read.qualities(), &[7, 8, 9, 10]);
        Ok(())
    }

    #[test]
    fn test_aligned_read_validation() {
        assert!(AlignedRead::new("r1", "chr1", 100, "5M", "ACGT").is_err());
        assert!(AlignedRead::new("r1", "chr1", 100, "2M1I1M", "ACGT").is_ok());
        assert!(AlignedRead::new("r1", "chr1", 100, "4M", "ACGT")
            .and_then(|x| x.with_qualities(vec![1, 2]))
            .is_err());
    }
}
