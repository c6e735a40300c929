use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use derive_getters::Getters;
use eyre::{bail, Report, Result};

/// Number of (variant, sample) pairs above which a full scan of every alignment file is cheaper
/// than indexed queries.
pub const SCAN_THRESHOLD: usize = 100_000;

/// Average number of variants per chromosome above which full scans are preferred.
pub const SCAN_DENSITY: usize = 1_000;

/// Layout of the result file.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum Mode {
    /// One row per (variant, sample) with base counts.
    #[default]
    Default,
    /// One row per variant with a column of base counts for every sample.
    Columns,
    /// One row per (variant, sample) with reference/alternative/other counts per strand.
    Compound,
    /// The input lines flagged when an indel is adjacent to the variant.
    IndelCheck,
}

impl FromStr for Mode {
    type Err = Report;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "default" | "snp" => Self::Default,
            "columns" => Self::Columns,
            "compound" | "compoundsnp" => Self::Compound,
            "indel-check" | "snpcheck" => Self::IndelCheck,
            _ => bail!("Unknown output mode: {}", s),
        })
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Default => "default",
            Self::Columns => "columns",
            Self::Compound => "compound",
            Self::IndelCheck => "indel-check",
        };
        write!(f, "{}", name)
    }
}

/// How alignment files are traversed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum Strategy {
    /// Decide from the size of the input.
    #[default]
    Auto,
    /// One merged indexed query per chromosome and sample.
    Probe,
    /// One forward scan of every alignment file.
    Scan,
    /// One indexed query per variant and sample.
    PerVariant,
}

impl Strategy {
    /// Resolve `Auto` into a concrete strategy; other strategies are returned as is.
    pub fn resolve(self, variants: usize, samples: usize, chromosomes: usize) -> Self {
        match self {
            Self::Auto => {
                let pairs = variants.saturating_mul(samples);
                let dense = variants > chromosomes.max(1).saturating_mul(SCAN_DENSITY);
                if pairs > SCAN_THRESHOLD || dense {
                    Self::Scan
                } else {
                    Self::Probe
                }
            }
            other => other,
        }
    }
}

impl FromStr for Strategy {
    type Err = Report;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "auto" => Self::Auto,
            "probe" | "chr" => Self::Probe,
            "scan" | "bam" => Self::Scan,
            "per-variant" | "position" => Self::PerVariant,
            _ => bail!("Unknown traversal strategy: {}", s),
        })
    }
}

impl Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Probe => "probe",
            Self::Scan => "scan",
            Self::PerVariant => "per-variant",
        };
        write!(f, "{}", name)
    }
}

/// Named presets of read-level filters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum Profile {
    #[default]
    Standard,
    Torrent,
    Rna,
    Dna,
}

impl Profile {
    pub fn apply(&self, config: Config) -> Config {
        match self {
            Self::Standard => config
                .with_min_base_quality(None)
                .with_min_mapping_quality(None)
                .with_strand_specific(true)
                .with_include_indels(true)
                .with_include_introns(true),
            Self::Torrent => config
                .with_min_base_quality(Some(0))
                .with_min_mapping_quality(Some(1))
                .with_strand_specific(false),
            Self::Rna => config
                .with_min_base_quality(Some(7))
                .with_min_mapping_quality(Some(10))
                .with_novel_starts(true)
                .with_strand_specific(false),
            Self::Dna => config
                .with_min_base_quality(Some(10))
                .with_min_mapping_quality(Some(10))
                .with_include_introns(false)
                .with_strand_specific(false),
        }
    }
}

impl FromStr for Profile {
    type Err = Report;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "standard" => Self::Standard,
            "torrent" => Self::Torrent,
            "rna" => Self::Rna,
            "dna" => Self::Dna,
            _ => bail!("Unknown profile: {}", s),
        })
    }
}

/// Settings of a pileup run.
#[derive(Clone, PartialEq, Eq, Debug, Getters)]
pub struct Config {
    threads: usize,
    mode: Mode,
    strategy: Strategy,
    min_base_quality: Option<u8>,
    min_mapping_quality: Option<u8>,
    include_duplicates: bool,
    include_indels: bool,
    include_introns: bool,
    strand_specific: bool,
    novel_starts: bool,
    // Capacity of both pipeline queues
    queue_capacity: usize,
    // Margin added around merged indexed queries
    flank: u64,
    timeout: Duration,
    #[doc(hidden)]
    #[getter(skip)]
    stop_sink_after: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: 1,
            mode: Mode::Default,
            strategy: Strategy::Auto,
            min_base_quality: None,
            min_mapping_quality: None,
            include_duplicates: false,
            include_indels: true,
            include_introns: true,
            strand_specific: true,
            novel_starts: false,
            queue_capacity: 100_000,
            flank: 250,
            timeout: Duration::from_secs(60 * 60 * 60),
            stop_sink_after: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_min_base_quality(mut self, quality: Option<u8>) -> Self {
        self.min_base_quality = quality;
        self
    }

    pub fn with_min_mapping_quality(mut self, quality: Option<u8>) -> Self {
        self.min_mapping_quality = quality;
        self
    }

    pub fn with_include_duplicates(mut self, include: bool) -> Self {
        self.include_duplicates = include;
        self
    }

    pub fn with_include_indels(mut self, include: bool) -> Self {
        self.include_indels = include;
        self
    }

    pub fn with_include_introns(mut self, include: bool) -> Self {
        self.include_introns = include;
        self
    }

    pub fn with_strand_specific(mut self, strand_specific: bool) -> Self {
        self.strand_specific = strand_specific;
        self
    }

    pub fn with_novel_starts(mut self, novel_starts: bool) -> Self {
        self.novel_starts = novel_starts;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_flank(mut self, flank: u64) -> Self {
        self.flank = flank;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Make the writer stop after the given number of rows without finishing the output.
    #[doc(hidden)]
    pub fn with_stop_sink_after(mut self, rows: Option<usize>) -> Self {
        self.stop_sink_after = rows;
        self
    }

    pub(crate) fn stop_sink_after(&self) -> Option<usize> {
        self.stop_sink_after
    }
}
