use std::collections::hash_map::Entry;
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use basepile_core_rs::loc::{Interval, IntervalOp};
use basepile_io_rs::bam::{AlignedRead, ReadAccessor};
use basepile_io_rs::ReadRecord;
use crossbeam_channel::{Receiver, Sender};
use eyre::{ensure, OptionExt, Result, WrapErr};
use log::{debug, info, warn};

use super::shared::{pull, push, Flow, Pulled, Shared};
use super::source::WorkUnit;
use super::{OutputRow, Workload};
use crate::accumulator::Accumulator;
use crate::config::Mode;
use crate::format;
use crate::variant::{Sample, Variant};

/// Reads between two checks of the failure flag.
const CANCEL_CHECK: u64 = 10_000;
/// Scanned reads between two progress messages.
const SCAN_PROGRESS: u64 = 10_000_000;

/// Turns finished accumulators into output rows.
struct Emitter<'a> {
    rows: Sender<OutputRow>,
    shared: &'a Shared,
    mode: Mode,
    stranded: bool,
}

impl Emitter<'_> {
    fn emit(&self, accumulators: Vec<Accumulator<'_>>) -> Result<Flow> {
        for accumulator in accumulators {
            let pileup = accumulator.finalize();
            let row = OutputRow {
                variant: *pileup.variant().ordinal(),
                sample: *pileup.sample().ordinal(),
                text: format::row(&pileup, self.mode, self.stranded),
            };
            let flow = push(
                &self.rows,
                row,
                self.shared,
                || self.shared.sink_alive(),
                "pileup writer is gone but workers are still producing rows",
            )?;
            if flow == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }
}

/// Accumulators of the chromosome currently visited by a full scan.
struct Visit<'a> {
    contig: String,
    accumulators: Vec<Accumulator<'a>>,
}

pub struct Worker<'a> {
    id: usize,
    workload: &'a Workload,
    shared: &'a Shared,
    out: Emitter<'a>,
    // Accessors opened by this worker, by sample ordinal
    accessors: AHashMap<usize, Box<dyn ReadAccessor>>,
    read: AlignedRead,
    processed: usize,
}

impl<'a> Worker<'a> {
    pub fn new(
        id: usize,
        workload: &'a Workload,
        shared: &'a Shared,
        rows: Sender<OutputRow>,
    ) -> Self {
        let out = Emitter {
            rows,
            shared,
            mode: *workload.config.mode(),
            stranded: *workload.config.strand_specific(),
        };
        Self {
            id,
            workload,
            shared,
            out,
            accessors: AHashMap::new(),
            read: AlignedRead::default(),
            processed: 0,
        }
    }

    /// Process units until the queue is drained or the pipeline fails.
    pub fn run(mut self, units: Receiver<WorkUnit>) -> Result<()> {
        debug!("Pileup worker {} started", self.id);
        loop {
            let unit = match pull(&units, self.shared) {
                Pulled::Item(unit) => unit,
                Pulled::Drained => break,
                Pulled::Cancelled => {
                    debug!("Pileup worker {} cancelled", self.id);
                    return Ok(());
                }
            };

            let flow = match &unit {
                WorkUnit::Chromosome(chromosome) => self.chromosome(chromosome),
                WorkUnit::Sample(sample) => self.scan(sample),
                WorkUnit::Variant(variant) => self.variant(variant),
            }
            .wrap_err_with(|| format!("Failed to pile up {}", unit))?;
            if flow == Flow::Stop {
                debug!("Pileup worker {} cancelled", self.id);
                return Ok(());
            }

            self.processed += 1;
            if self.processed % 10_000 == 0 {
                info!("Pileup worker {}: {} units done", self.id, self.processed);
            }
        }
        debug!(
            "Pileup worker {} finished after {} work units",
            self.id, self.processed
        );
        Ok(())
    }

    /// Query the hull of all variants of the chromosome in every sample.
    fn chromosome(&mut self, chromosome: &str) -> Result<Flow> {
        let workload = self.workload;
        let variants = match workload.by_chromosome.get(chromosome) {
            Some(variants) => variants,
            None => return Ok(Flow::Continue),
        };
        let window = hull(variants, *workload.config.flank())?;

        for sample in &workload.samples {
            let mut accumulators = workload.accumulators(chromosome, sample);
            {
                let accessor = cached(&mut self.accessors, workload, sample)?;
                let mut reads = accessor.query(chromosome, window)?;
                let flow = pile(
                    reads.as_mut(),
                    &mut self.read,
                    &mut accumulators,
                    self.shared,
                )?;
                if flow == Flow::Stop {
                    return Ok(Flow::Stop);
                }
            }
            if self.out.emit(accumulators)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    /// Query the variant window in every sample.
    fn variant(&mut self, variant: &Arc<Variant>) -> Result<Flow> {
        let workload = self.workload;
        for sample in &workload.samples {
            let mut accumulators = vec![Accumulator::new(
                variant.clone(),
                sample.clone(),
                &workload.rules,
            )];
            {
                let accessor = cached(&mut self.accessors, workload, sample)?;
                let mut reads = accessor.query(variant.chromosome(), *variant.interval())?;
                let flow = pile(
                    reads.as_mut(),
                    &mut self.read,
                    &mut accumulators,
                    self.shared,
                )?;
                if flow == Flow::Stop {
                    return Ok(Flow::Stop);
                }
            }
            if self.out.emit(accumulators)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    /// Stream all reads of the sample once. Reads must be grouped by contig: a contig showing up
    /// again after another one is an error. Chromosomes without reads get zero-coverage rows.
    fn scan(&mut self, sample: &Arc<Sample>) -> Result<Flow> {
        let workload = self.workload;
        let mut accessor = workload.open(sample)?;
        let mut reads = accessor.scan()?;

        let mut visited: AHashSet<String> = AHashSet::new();
        let mut piled: AHashSet<&str> = AHashSet::new();
        let mut current: Option<Visit> = None;
        let mut seen = 0u64;

        while reads.read_record(&mut self.read)? {
            seen += 1;
            if seen % CANCEL_CHECK == 0 && self.shared.is_failed() {
                return Ok(Flow::Stop);
            }
            if seen % SCAN_PROGRESS == 0 {
                info!(
                    "Pileup worker {}: scanned {} reads of {}",
                    self.id,
                    seen,
                    sample.name()
                );
            }
            // Unplaced reads come last and never overlap anything
            if self.read.contig().is_empty() {
                continue;
            }

            if current
                .as_ref()
                .is_none_or(|visit| visit.contig != *self.read.contig())
            {
                if let Some(previous) = current.take() {
                    if self.out.emit(previous.accumulators)? == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }

                let contig = self.read.contig().clone();
                ensure!(
                    !visited.contains(&contig),
                    "Alignments of {} are not sorted by coordinate: reads on {} appear again after other contigs",
                    sample.path().display(),
                    contig
                );
                visited.insert(contig.clone());

                let accumulators = match workload.locate(&contig) {
                    Some(chromosome) if piled.insert(chromosome) => {
                        workload.accumulators(chromosome, sample)
                    }
                    Some(chromosome) => {
                        warn!(
                            "Contig {} of {} is an alias of the already visited {}, skipping it",
                            contig,
                            sample.path().display(),
                            chromosome
                        );
                        Vec::new()
                    }
                    None => Vec::new(),
                };
                current = Some(Visit {
                    contig,
                    accumulators,
                });
            }

            if let Some(visit) = current.as_mut() {
                offer(&self.read, &mut visit.accumulators)?;
            }
        }
        drop(reads);

        if let Some(last) = current.take() {
            if self.out.emit(last.accumulators)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }

        for chromosome in workload.chromosomes() {
            if piled.contains(chromosome) {
                continue;
            }
            let accumulators = workload.accumulators(chromosome, sample);
            if self.out.emit(accumulators)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }
}

/// Accessor of the sample opened by this worker, opening it on first use.
fn cached<'m>(
    accessors: &'m mut AHashMap<usize, Box<dyn ReadAccessor>>,
    workload: &Workload,
    sample: &Sample,
) -> Result<&'m mut Box<dyn ReadAccessor>> {
    match accessors.entry(*sample.ordinal()) {
        Entry::Occupied(entry) => Ok(entry.into_mut()),
        Entry::Vacant(entry) => Ok(entry.insert(workload.open(sample)?)),
    }
}

/// Smallest window covering all variants, extended by the flank on both sides.
fn hull(variants: &[Arc<Variant>], flank: u64) -> Result<Interval<u64>> {
    let window = Interval::hull(variants.iter().map(|x| x.interval()))
        .ok_or_eyre("No variants to query")?;
    Ok(window.padded(flank))
}

fn pile<R>(
    reads: &mut R,
    read: &mut AlignedRead,
    accumulators: &mut [Accumulator],
    shared: &Shared,
) -> Result<Flow>
where
    R: ReadRecord<Record = AlignedRead> + ?Sized,
{
    let mut seen = 0u64;
    while reads.read_record(read)? {
        seen += 1;
        if seen % CANCEL_CHECK == 0 && shared.is_failed() {
            return Ok(Flow::Stop);
        }
        offer(read, accumulators)?;
    }
    Ok(Flow::Continue)
}

/// Offer the read to every accumulator whose variant starts within the aligned span of the read.
/// Accumulators must be sorted by the variant start.
fn offer(read: &AlignedRead, accumulators: &mut [Accumulator]) -> Result<()> {
    let span = match read.span() {
        Some(span) => span,
        None => return Ok(()),
    };
    let first = accumulators.partition_point(|x| x.variant().start() < span.start());
    for accumulator in accumulators[first..]
        .iter_mut()
        .take_while(|x| x.variant().start() <= span.end())
    {
        accumulator.add(read)?;
    }
    Ok(())
}
