use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crossbeam_channel::Sender;
use eyre::Result;
use log::info;

use super::shared::{push, Flow, Shared};
use super::Workload;
use crate::config::Strategy;
use crate::variant::{Sample, Variant};

/// Progress is reported every that many queued units.
const REPORT_EVERY: usize = 10_000;

/// A self-contained piece of work for a single worker.
#[derive(Clone, Debug)]
pub enum WorkUnit {
    /// All variants of a chromosome, queried in every sample.
    Chromosome(String),
    /// A full scan of a single sample.
    Sample(Arc<Sample>),
    /// A single variant, queried in every sample.
    Variant(Arc<Variant>),
}

impl Display for WorkUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkUnit::Chromosome(chromosome) => write!(f, "chromosome {}", chromosome),
            WorkUnit::Sample(sample) => {
                write!(f, "sample {} ({})", sample.name(), sample.path().display())
            }
            WorkUnit::Variant(variant) => write!(
                f,
                "variant {} at {}:{}",
                variant.name(),
                variant.chromosome(),
                variant.interval()
            ),
        }
    }
}

/// Split the workload into units according to the traversal strategy.
pub fn units(workload: &Workload) -> Vec<WorkUnit> {
    match workload.strategy {
        Strategy::Scan => workload
            .samples
            .iter()
            .cloned()
            .map(WorkUnit::Sample)
            .collect(),
        Strategy::PerVariant => workload
            .variants
            .iter()
            .cloned()
            .map(WorkUnit::Variant)
            .collect(),
        Strategy::Probe | Strategy::Auto => workload
            .chromosomes()
            .into_iter()
            .map(|x| WorkUnit::Chromosome(x.to_string()))
            .collect(),
    }
}

/// Feed all units to the workers. Stops quietly once the pipeline fails.
pub fn run(units: Vec<WorkUnit>, queue: Sender<WorkUnit>, shared: &Shared) -> Result<()> {
    let total = units.len();
    info!("Queueing {} work units", total);

    for (ind, unit) in units.into_iter().enumerate() {
        let flow = push(
            &queue,
            unit,
            shared,
            || shared.workers_alive() > 0,
            "no pileup workers left but reading is not complete",
        )?;
        if flow == Flow::Stop {
            info!("Reading cancelled after {} / {} work units", ind, total);
            return Ok(());
        }
        if (ind + 1) % REPORT_EVERY == 0 {
            info!("Queued {} / {} work units", ind + 1, total);
        }
    }

    info!("Queued all {} work units", total);
    Ok(())
}
