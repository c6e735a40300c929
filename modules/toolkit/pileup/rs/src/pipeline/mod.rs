//! Concurrent pileup over many alignment files.
//!
//! A run has three kinds of stages connected by bounded queues:
//! a reader that splits the workload into [`WorkUnit`]s, a pool of workers that pile up reads for
//! every unit, and a single writer that collects formatted rows and produces the result file.
//! Any stage can fail the whole run; all other stages then stop at their next check of the shared
//! failure flag, and the coordinator removes partial outputs before reporting every error.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Instant;

use ahash::AHashMap;
use basepile_core_rs::loc::contig;
use basepile_core_rs::parallelism;
use basepile_io_rs::bam::{OpenAccessor, ReadAccessor, ReadFilter};
use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};
use eyre::{bail, ensure, eyre, Report, Result, WrapErr};
use itertools::Itertools;
use log::{debug, info, warn};

pub use sink::spill_path;
pub use source::WorkUnit;

use crate::accumulator::{Accumulator, Rules};
use crate::config::{Config, Mode, Strategy};
use crate::variant::{Sample, Variant};
use shared::{Completion, Shared, Stage};
use sink::Sink;
use worker::Worker;

mod shared;
mod sink;
mod source;
mod worker;

type Job<'a> = Box<dyn FnOnce() -> Result<()> + Send + 'a>;

/// A formatted pileup of a (variant, sample) pair.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) struct OutputRow {
    pub variant: usize,
    pub sample: usize,
    pub text: String,
}

/// Read-only state shared by all stages of a run.
pub(crate) struct Workload {
    config: Config,
    strategy: Strategy,
    rules: Rules,
    samples: Vec<Arc<Sample>>,
    variants: Vec<Arc<Variant>>,
    // Variants of each chromosome sorted by start
    by_chromosome: AHashMap<String, Vec<Arc<Variant>>>,
    // Output rank of each variant, indexed by the variant ordinal
    ranks: Vec<usize>,
    // Header lines of the position file
    header: Vec<String>,
    accessors: Arc<dyn OpenAccessor>,
}

impl Workload {
    /// Chromosomes with at least one variant, in natural order.
    fn chromosomes(&self) -> Vec<&str> {
        self.by_chromosome
            .keys()
            .map(|x| x.as_str())
            .sorted_by(|a, b| contig::ordering(a, b).then_with(|| a.cmp(b)))
            .collect()
    }

    /// Variant chromosome matching a contig of an alignment file.
    fn locate(&self, contig: &str) -> Option<&str> {
        contig::aliases(contig).iter().find_map(|alias| {
            self.by_chromosome
                .get_key_value(alias.as_str())
                .map(|(key, _)| key.as_str())
        })
    }

    /// Fresh accumulators for all variants of the chromosome, sorted by start.
    fn accumulators(&self, chromosome: &str, sample: &Arc<Sample>) -> Vec<Accumulator<'_>> {
        self.by_chromosome
            .get(chromosome)
            .map(|variants| {
                variants
                    .iter()
                    .map(|x| Accumulator::new(x.clone(), sample.clone(), &self.rules))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn open(&self, sample: &Sample) -> Result<Box<dyn ReadAccessor>> {
        self.accessors.open(sample.path()).wrap_err_with(|| {
            format!(
                "Failed to open alignments of {} ({})",
                sample.name(),
                sample.path().display()
            )
        })
    }
}

/// Pileup of a set of variants across a set of alignment files.
pub struct Pipeline {
    config: Config,
    variants: Vec<Arc<Variant>>,
    samples: Vec<Arc<Sample>>,
    header: Vec<String>,
    accessors: Arc<dyn OpenAccessor>,
    filter: Option<Arc<dyn ReadFilter>>,
}

impl Pipeline {
    /// Variants and samples must be listed in the order of their ordinals.
    pub fn new(
        config: Config,
        variants: Vec<Arc<Variant>>,
        samples: Vec<Arc<Sample>>,
        accessors: Arc<dyn OpenAccessor>,
    ) -> Result<Self> {
        ensure!(!samples.is_empty(), "At least one alignment file is required");
        for (ind, variant) in variants.iter().enumerate() {
            ensure!(
                *variant.ordinal() == ind,
                "Variant {} has ordinal {}, expected {}",
                variant.name(),
                variant.ordinal(),
                ind
            );
        }
        for (ind, sample) in samples.iter().enumerate() {
            ensure!(
                *sample.ordinal() == ind,
                "Sample {} has ordinal {}, expected {}",
                sample.name(),
                sample.ordinal(),
                ind
            );
        }
        if *config.mode() == Mode::Compound {
            if let Some(variant) = variants.iter().find(|x| x.alt().is_none()) {
                bail!(
                    "Compound mode requires an alternative allele for every position, missing for: {}",
                    variant.line()
                );
            }
        }

        Ok(Self {
            config,
            variants,
            samples,
            header: Vec::new(),
            accessors,
            filter: None,
        })
    }

    /// Header lines of the position file, echoed by some output layouts.
    pub fn with_header(mut self, header: Vec<String>) -> Self {
        self.header = header;
        self
    }

    /// Extra predicate every read must pass.
    pub fn with_filter(mut self, filter: Arc<dyn ReadFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the pileup and write the result to `output`. On failure, no partial output is left
    /// behind and the returned error lists every failure of every stage.
    pub fn run(&self, output: impl AsRef<Path>) -> Result<()> {
        let output = output.as_ref();
        let workload = self.workload();
        let units = source::units(&workload);
        let workers = parallelism::workers(*self.config.threads(), units.len());
        info!(
            "Piling up {} positions in {} alignment files: {} traversal, {} work units, {} workers",
            workload.variants.len(),
            workload.samples.len(),
            workload.strategy,
            units.len(),
            workers
        );

        let shared = Shared::new(workers);
        execute(&workload, units, workers, &shared, output);

        let errors = shared.into_errors();
        if errors.is_empty() {
            info!("Pileup finished: {}", output.display());
            return Ok(());
        }

        for path in [output.to_path_buf(), spill_path(output)] {
            if path.exists() {
                if let Err(err) = std::fs::remove_file(&path) {
                    warn!("Failed to remove {}: {}", path.display(), err);
                }
            }
        }
        Err(combine(errors))
    }

    fn workload(&self) -> Workload {
        let mut by_chromosome: AHashMap<String, Vec<Arc<Variant>>> = AHashMap::new();
        for variant in &self.variants {
            by_chromosome
                .entry(variant.chromosome().clone())
                .or_default()
                .push(variant.clone());
        }
        for variants in by_chromosome.values_mut() {
            variants.sort_by_key(|x| (x.start(), x.end(), *x.ordinal()));
        }

        let mut order: Vec<usize> = (0..self.variants.len()).collect();
        order.sort_by(|a, b| self.variants[*a].cmp(&self.variants[*b]).then(a.cmp(b)));
        let mut ranks = vec![0; order.len()];
        for (rank, ind) in order.into_iter().enumerate() {
            ranks[ind] = rank;
        }

        let strategy = self.config.strategy().resolve(
            self.variants.len(),
            self.samples.len(),
            by_chromosome.len(),
        );
        let mut rules = Rules::new(&self.config);
        if let Some(filter) = &self.filter {
            rules = rules.with_filter(filter.clone());
        }

        Workload {
            config: self.config.clone(),
            strategy,
            rules,
            samples: self.samples.clone(),
            variants: self.variants.clone(),
            by_chromosome,
            ranks,
            header: self.header.clone(),
            accessors: self.accessors.clone(),
        }
    }
}

/// Run all stages to completion. Errors are recorded in `shared`.
fn execute(
    workload: &Workload,
    units: Vec<WorkUnit>,
    workers: usize,
    shared: &Shared,
    output: &Path,
) {
    let capacity = *workload.config.queue_capacity();
    let (units_tx, units_rx) = bounded(capacity);
    let (rows_tx, rows_rx) = bounded(capacity);
    let (events_tx, events_rx) = unbounded();

    let mut jobs: Vec<(Stage, Job<'_>)> = Vec::with_capacity(workers + 2);
    let (rows, path) = (rows_rx.clone(), output.to_path_buf());
    jobs.push((
        Stage::Sink,
        Box::new(move || Sink::new(workload, shared, path).run(rows)),
    ));
    for ind in 0..workers {
        let (units, rows) = (units_rx.clone(), rows_tx.clone());
        jobs.push((
            Stage::Worker(ind),
            Box::new(move || Worker::new(ind, workload, shared, rows).run(units)),
        ));
    }
    drop(rows_tx);
    jobs.push((
        Stage::Reader,
        Box::new(move || source::run(units, units_tx, shared)),
    ));

    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(jobs.len());
        for (stage, job) in jobs {
            match spawn(scope, stage, shared, events_tx.clone(), job) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    shared.fail(stage, err);
                    break;
                }
            }
        }
        drop(events_tx);

        let timeout = *workload.config.timeout();
        let deadline = Instant::now().checked_add(timeout);
        let mut finished = 0;
        while finished < handles.len() {
            let event = match deadline {
                Some(deadline) => events_rx.recv_deadline(deadline),
                None => events_rx
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };
            match event {
                Ok(stage) => {
                    finished += 1;
                    debug!("{} finished", stage);
                    if stage == Stage::Sink && !shared.sink_drained() && !shared.is_failed() {
                        shared.fail(
                            stage,
                            eyre!("Writer finished before all pileup rows were received"),
                        );
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    shared.fail("pileup", eyre!("Pileup did not finish within {:?}", timeout));
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        for handle in handles {
            // Panics are recorded by the completion guards
            let _ = handle.join();
        }
    });

    if !shared.is_failed() {
        if !units_rx.is_empty() {
            shared.fail(
                "pileup",
                eyre!("{} work units were never processed", units_rx.len()),
            );
        }
        if !rows_rx.is_empty() {
            shared.fail(
                "pileup",
                eyre!("{} pileup rows were never written", rows_rx.len()),
            );
        }
    }
}

fn spawn<'scope, 'env>(
    scope: &'scope Scope<'scope, 'env>,
    stage: Stage,
    shared: &'env Shared,
    events: Sender<Stage>,
    job: Job<'env>,
) -> Result<ScopedJoinHandle<'scope, ()>> {
    thread::Builder::new()
        .name(stage.to_string())
        .spawn_scoped(scope, move || {
            let _completion = Completion::new(stage, shared, events);
            if let Err(err) = job() {
                shared.fail(stage, err);
            }
        })
        .wrap_err_with(|| format!("Failed to spawn {}", stage))
}

fn combine(mut errors: Vec<Report>) -> Report {
    if errors.len() == 1 {
        return errors.swap_remove(0);
    }
    let details = errors.iter().map(|x| format!("{:?}", x)).join("\n\n");
    eyre!("Pileup failed with {} errors:\n\n{}", errors.len(), details)
}

#[cfg(test)]
mod tests {
    use basepile_io_rs::bam::InMemory;
    use basepile_io_rs::positions::{Format, PositionFile};

    use super::*;

    fn pipeline(config: Config, lines: &str, reference: &[&str]) -> Result<Pipeline> {
        let positions = PositionFile::read(lines.as_bytes(), Format::Tab)?;
        let variants = positions
            .positions()
            .iter()
            .zip(reference)
            .map(|(x, bases)| Ok(Arc::new(Variant::new(x, bases.as_bytes().to_vec())?)))
            .collect::<Result<Vec<_>>>()?;
        let samples = Sample::from_paths(["a.bam", "b.bam"]);
        Pipeline::new(config, variants, samples, Arc::new(InMemory::new()))
    }

    #[test]
    fn test_workload_layout() -> Result<()> {
        let lines = "v0\tchr10\t5\t5\nv1\tchr2\t9\t9\nv2\tchr2\t3\t4\nv3\tMT\t1\t1\n";
        let pipeline = pipeline(Config::new(), lines, &["A", "C", "GT", "A"])?;
        let workload = pipeline.workload();

        assert_eq!(workload.chromosomes(), ["chr2", "chr10", "chrMT"]);
        assert_eq!(workload.ranks, [2, 1, 0, 3]);
        assert_eq!(workload.strategy, Strategy::Probe);

        let starts: Vec<_> = workload.by_chromosome["chr2"]
            .iter()
            .map(|x| x.start())
            .collect();
        assert_eq!(starts, [3, 9]);

        assert_eq!(workload.locate("2"), Some("chr2"));
        assert_eq!(workload.locate("chrM"), Some("chrMT"));
        assert_eq!(workload.locate("chr3"), None);
        Ok(())
    }

    #[test]
    fn test_compound_requires_alt() -> Result<()> {
        let config = Config::new().with_mode(Mode::Compound);
        assert!(pipeline(config, "v0\tchr1\t5\t5\n", &["A"]).is_err());
        Ok(())
    }

    #[test]
    fn test_combine_errors() {
        let single = combine(vec![eyre!("first")]);
        assert_eq!(single.to_string(), "first");

        let multiple = combine(vec![eyre!("first"), eyre!("second")]);
        let message = multiple.to_string();
        assert!(message.contains("2 errors"));
        assert!(message.contains("first"));
        assert!(message.contains("second"));
    }
}
