use std::sync::Arc;

use basepile_core_rs::loc::{IntervalOp, PerStrand, Strand};
use basepile_io_rs::bam::{AlignedRead, CigarOp, ReadFilter};
use derive_getters::{Dissolve, Getters};
use eyre::{Result, WrapErr};
use log::debug;

pub use tally::{Keyed, Tally, TallyKind, BASES};

use crate::config::{Config, Mode};
use crate::variant::{Sample, Variant};

pub mod decode;
mod tally;

/// Read-level settings shared by all accumulators of a run.
#[derive(Clone, Getters)]
pub struct Rules {
    min_base_quality: Option<u8>,
    min_mapping_quality: Option<u8>,
    include_duplicates: bool,
    include_indels: bool,
    include_introns: bool,
    // Count reads with indels next to the variant start
    check_indels: bool,
    tally: TallyKind,
    #[getter(skip)]
    filter: Option<Arc<dyn ReadFilter>>,
}

impl Rules {
    pub fn new(config: &Config) -> Self {
        let tally = if *config.mode() == Mode::Compound {
            TallyKind::Stranded
        } else if *config.novel_starts() {
            TallyKind::NovelStarts
        } else if *config.strand_specific() {
            TallyKind::Stranded
        } else {
            TallyKind::Coverage
        };

        Self {
            min_base_quality: *config.min_base_quality(),
            min_mapping_quality: *config.min_mapping_quality(),
            include_duplicates: *config.include_duplicates(),
            include_indels: *config.include_indels(),
            include_introns: *config.include_introns(),
            check_indels: *config.mode() == Mode::IndelCheck,
            tally,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Arc<dyn ReadFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn filter(&self) -> Option<&dyn ReadFilter> {
        self.filter.as_deref()
    }
}

/// What happened to a single read offered to an accumulator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Outcome {
    Accepted,
    // Rejected before decoding
    Unmapped,
    OutsideWindow,
    Duplicate,
    Filtered,
    Indel,
    Intron,
    // Rejected after decoding
    NotCovered,
    LowBaseQuality,
    LowMappingQuality,
}

/// Per-read bookkeeping. Every examined read ends up in exactly one of `passed_filters`,
/// `failed_base_quality`, `failed_mapping_quality`, `unmapped_at_position` or `rejected`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct Counters {
    pub total_examined: u64,
    pub passed_filters: u64,
    pub positive_strand: u64,
    pub negative_strand: u64,
    pub failed_base_quality: u64,
    pub failed_mapping_quality: u64,
    pub unmapped_at_position: u64,
    pub rejected: u64,
    pub indel_adjacent: u64,
}

impl Counters {
    /// Check that the outcome counters add up to the number of examined reads.
    pub fn is_consistent(&self) -> bool {
        self.total_examined
            == self.passed_filters
                + self.failed_base_quality
                + self.failed_mapping_quality
                + self.unmapped_at_position
                + self.rejected
            && self.passed_filters == self.positive_strand + self.negative_strand
    }
}

/// Pileup state of a single (variant, sample) pair. Owned by one worker and consumed by
/// [`Accumulator::finalize`].
pub struct Accumulator<'a> {
    variant: Arc<Variant>,
    sample: Arc<Sample>,
    rules: &'a Rules,
    tally: Tally,
    counters: Counters,
    bases: Vec<u8>,
    qualities: Vec<u8>,
}

impl<'a> Accumulator<'a> {
    pub fn new(variant: Arc<Variant>, sample: Arc<Sample>, rules: &'a Rules) -> Self {
        let tally = Tally::new(*rules.tally(), variant.is_single_base());
        let length = variant.len();
        Self {
            variant,
            sample,
            rules,
            tally,
            counters: Counters::default(),
            bases: Vec::with_capacity(length),
            qualities: Vec::with_capacity(length),
        }
    }

    pub fn variant(&self) -> &Arc<Variant> {
        &self.variant
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    /// Offer a read overlapping the variant. Rejections are reported as outcomes; only broken
    /// alignments are errors.
    pub fn add(&mut self, read: &AlignedRead) -> Result<Outcome> {
        self.counters.total_examined += 1;
        if let Some(outcome) = self.screen(read) {
            self.counters.rejected += 1;
            return Ok(outcome);
        }

        let covered = decode::deconvolve(
            read,
            self.variant.interval(),
            &mut self.bases,
            &mut self.qualities,
        )
        .wrap_err_with(|| {
            format!(
                "Failed to decode read {} of sample {} at {} {}:{}",
                read.name(),
                self.sample.name(),
                self.variant.name(),
                self.variant.chromosome(),
                self.variant.interval()
            )
        })?;
        // Flagged even when the read misses part of the window
        if self.rules.check_indels && decode::indel_adjacent(read, self.variant.start()) {
            self.counters.indel_adjacent += 1;
        }
        if !covered {
            self.counters.unmapped_at_position += 1;
            return Ok(Outcome::NotCovered);
        }

        if let Some(minimum) = self.rules.min_base_quality {
            if self.qualities.iter().any(|x| *x < minimum) {
                self.counters.failed_base_quality += 1;
                return Ok(Outcome::LowBaseQuality);
            }
        }
        if let Some(minimum) = self.rules.min_mapping_quality {
            if *read.mapq() < minimum {
                self.counters.failed_mapping_quality += 1;
                return Ok(Outcome::LowMappingQuality);
            }
        }

        self.bases.make_ascii_uppercase();
        let strand = read.strand();
        // 5' end of the fragment
        let fragment_start = match strand {
            Strand::Forward => *read.start(),
            Strand::Reverse => read.end(),
        };
        self.tally.add(&self.bases, strand, fragment_start);

        self.counters.passed_filters += 1;
        match strand {
            Strand::Forward => self.counters.positive_strand += 1,
            Strand::Reverse => self.counters.negative_strand += 1,
        }
        Ok(Outcome::Accepted)
    }

    fn screen(&self, read: &AlignedRead) -> Option<Outcome> {
        if read.is_unmapped() {
            return Some(Outcome::Unmapped);
        }
        if !read.span().is_some_and(|x| x.covers(self.variant.interval())) {
            return Some(Outcome::OutsideWindow);
        }
        if read.is_duplicate() && !self.rules.include_duplicates {
            return Some(Outcome::Duplicate);
        }
        if let Some(filter) = self.rules.filter() {
            if !filter.evaluate(read) {
                return Some(Outcome::Filtered);
            }
        }

        let cigar = read.cigar();
        if !self.rules.include_indels
            && (cigar.contains(CigarOp::Insertion) || cigar.contains(CigarOp::Deletion))
        {
            return Some(Outcome::Indel);
        }
        if !self.rules.include_introns && cigar.contains(CigarOp::Skip) {
            return Some(Outcome::Intron);
        }
        None
    }

    pub fn finalize(self) -> Pileup {
        let c = &self.counters;
        debug!(
            "{} {}:{} in {}: {} / {} reads passed, {} not mapped at the position, {} / {} failed base / mapping quality",
            self.variant.name(),
            self.variant.chromosome(),
            self.variant.interval(),
            self.sample.name(),
            c.passed_filters,
            c.total_examined,
            c.unmapped_at_position,
            c.failed_base_quality,
            c.failed_mapping_quality
        );

        let (totals, strands) = self.tally.counts();
        Pileup {
            variant: self.variant,
            sample: self.sample,
            totals,
            strands,
            counters: self.counters,
        }
    }
}

/// Final counts of a (variant, sample) pair.
#[derive(Clone, PartialEq, Eq, Debug, Dissolve, Getters)]
pub struct Pileup {
    variant: Arc<Variant>,
    sample: Arc<Sample>,
    // Both strands combined
    totals: Keyed<u64>,
    // Per-strand counts, if tracked
    strands: Option<PerStrand<Keyed<u64>>>,
    counters: Counters,
}

impl Pileup {
    /// Counts of the reference bases and of everything else.
    pub fn reference_split(&self) -> (u64, u64) {
        let reference = self.totals.count(self.variant.reference());
        (reference, self.totals.total() - reference)
    }
}
