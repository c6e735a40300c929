use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use eyre::{bail, eyre, Report, Result};
use log::error;

/// Interval between checks of the failure flag while blocked on a queue.
pub const POLL: Duration = Duration::from_millis(20);

/// A thread of the pipeline.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Stage {
    Reader,
    Worker(usize),
    Sink,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Reader => write!(f, "pileup-reader"),
            Stage::Worker(ind) => write!(f, "pileup-worker-{}", ind),
            Stage::Sink => write!(f, "pileup-writer"),
        }
    }
}

/// Whether a stage should keep going.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Flow {
    Continue,
    Stop,
}

/// Result of a blocking receive.
pub enum Pulled<T> {
    Item(T),
    // All producers are gone and the queue is empty
    Drained,
    // The pipeline has failed
    Cancelled,
}

/// State visible to all stages of a running pipeline.
pub struct Shared {
    failed: AtomicBool,
    errors: Mutex<Vec<Report>>,
    workers_alive: AtomicUsize,
    sink_alive: AtomicBool,
    sink_drained: AtomicBool,
}

impl Shared {
    pub fn new(workers: usize) -> Self {
        Self {
            failed: AtomicBool::new(false),
            errors: Mutex::new(Vec::new()),
            workers_alive: AtomicUsize::new(workers),
            sink_alive: AtomicBool::new(true),
            sink_drained: AtomicBool::new(false),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Record a fatal error and cancel all stages.
    pub fn fail(&self, origin: impl Display, err: Report) {
        error!("{} failed: {:?}", origin, err);
        let err = err.wrap_err(format!("{} failed", origin));
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(err);
        self.failed.store(true, Ordering::Release);
    }

    pub fn workers_alive(&self) -> usize {
        self.workers_alive.load(Ordering::Acquire)
    }

    pub fn sink_alive(&self) -> bool {
        self.sink_alive.load(Ordering::Acquire)
    }

    pub fn mark_drained(&self) {
        self.sink_drained.store(true, Ordering::Release);
    }

    pub fn sink_drained(&self) -> bool {
        self.sink_drained.load(Ordering::Acquire)
    }

    pub fn into_errors(self) -> Vec<Report> {
        self.errors
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Signals the end of a stage, panics included, once dropped.
pub struct Completion<'a> {
    stage: Stage,
    shared: &'a Shared,
    events: Sender<Stage>,
}

impl<'a> Completion<'a> {
    pub fn new(stage: Stage, shared: &'a Shared, events: Sender<Stage>) -> Self {
        Self {
            stage,
            shared,
            events,
        }
    }
}

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.shared
                .fail(self.stage, eyre!("Thread panicked, see the log for details"));
        }
        match self.stage {
            Stage::Worker(_) => {
                self.shared.workers_alive.fetch_sub(1, Ordering::AcqRel);
            }
            Stage::Sink => self.shared.sink_alive.store(false, Ordering::Release),
            Stage::Reader => {}
        }
        // The coordinator may be gone after a timeout
        let _ = self.events.send(self.stage);
    }
}

/// Send an item, blocking while the queue is full. Returns `Flow::Stop` if the pipeline fails
/// meanwhile; fails if the consumers are gone.
pub fn push<T>(
    queue: &Sender<T>,
    mut item: T,
    shared: &Shared,
    consumers_alive: impl Fn() -> bool,
    gone: &str,
) -> Result<Flow> {
    loop {
        match queue.send_timeout(item, POLL) {
            Ok(()) => return Ok(Flow::Continue),
            Err(SendTimeoutError::Timeout(returned)) => {
                if shared.is_failed() {
                    return Ok(Flow::Stop);
                }
                if !consumers_alive() {
                    bail!("{}", gone);
                }
                item = returned;
            }
            Err(SendTimeoutError::Disconnected(_)) => bail!("{}", gone),
        }
    }
}

/// Receive an item, blocking while the queue is empty and producers are still around.
pub fn pull<T>(queue: &Receiver<T>, shared: &Shared) -> Pulled<T> {
    loop {
        if shared.is_failed() {
            return Pulled::Cancelled;
        }
        match queue.recv_timeout(POLL) {
            Ok(item) => return Pulled::Item(item),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Pulled::Drained,
        }
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::{bounded, unbounded};

    use super::*;

    #[test]
    fn test_push_full_queue() -> Result<()> {
        let shared = Shared::new(1);
        let (tx, rx) = bounded(1);
        assert_eq!(push(&tx, 1, &shared, || true, "gone")?, Flow::Continue);

        // Full queue without consumers
        assert!(push(&tx, 2, &shared, || false, "no consumers").is_err());

        // Full queue of a failed pipeline
        shared.fail(Stage::Reader, eyre!("boom"));
        assert_eq!(push(&tx, 3, &shared, || true, "gone")?, Flow::Stop);

        assert_eq!(rx.len(), 1);
        assert_eq!(shared.into_errors().len(), 1);
        Ok(())
    }

    #[test]
    fn test_pull() {
        let shared = Shared::new(1);
        let (tx, rx) = unbounded();
        tx.send(1).unwrap();
        drop(tx);
        assert!(matches!(pull(&rx, &shared), Pulled::Item(1)));
        assert!(matches!(pull(&rx, &shared), Pulled::Drained));

        let (_tx, rx) = unbounded::<usize>();
        shared.fail(Stage::Sink, eyre!("boom"));
        assert!(matches!(pull(&rx, &shared), Pulled::Cancelled));
    }

    #[test]
    fn test_completion() {
        let shared = Shared::new(2);
        let (events, received) = unbounded();
        drop(Completion::new(Stage::Worker(0), &shared, events.clone()));
        drop(Completion::new(Stage::Sink, &shared, events));

        assert_eq!(shared.workers_alive(), 1);
        assert!(!shared.sink_alive());
        assert_eq!(received.iter().collect::<Vec<_>>(), [Stage::Worker(0), Stage::Sink]);
        assert!(!shared.is_failed());
    }
}
