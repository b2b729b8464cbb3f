//! Step execution for one analysis run.
//!
//! In monoprocessor mode the owner thread runs every step itself. In multiprocessor mode a
//! scoped pool of workers pulls step indices from a shared counter and sends payloads back
//! over a bounded channel; the owner thread is the only one that combines. A worker stops
//! pulling as soon as the run is cancelled or aborted, and the owner keeps draining the
//! channel until every worker has hung up.

use super::configurators::RunningMode;
use super::error::EngineError;
use super::job::{Analysis, PayloadOf, StepRunner};
use super::progress::StatusReporter;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::thread;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionSummary {
    pub steps: usize,
    pub completed: usize,
    pub failed: Vec<(usize, String)>,
    pub cancelled: bool,
}

enum StepMessage<P> {
    Done(usize, P),
    Failed(usize, EngineError),
    Crashed(usize, String),
    Unavailable(EngineError),
}

/// Runs every step of `runner` and combines the payloads into `analysis`.
///
/// # Errors
///
/// A failed step (unless the analysis tolerates them), a panicking worker, a worker that
/// could not start, or a failed combine aborts the run with that error.
#[instrument(
    skip_all,
    name = "executor",
    fields(steps = runner.n_steps(), workers = mode.workers())
)]
pub fn execute<A: Analysis>(
    analysis: &mut A,
    runner: &A::Runner,
    mode: RunningMode,
    status: &StatusReporter,
) -> Result<ExecutionSummary, EngineError> {
    let steps = runner.n_steps();
    status.start(steps);
    let result = match mode {
        RunningMode::Multiprocessor(_) if mode.workers() > 1 && steps > 1 => {
            run_parallel(analysis, runner, mode.workers().min(steps), status)
        }
        _ => run_serial(analysis, runner, status),
    };
    status.finish();
    result
}

fn run_serial<A: Analysis>(
    analysis: &mut A,
    runner: &A::Runner,
    status: &StatusReporter,
) -> Result<ExecutionSummary, EngineError> {
    let steps = runner.n_steps();
    let mut reducer = Reducer::new(analysis, steps, status);
    let mut worker = runner.open_worker()?;
    for index in 0..steps {
        if status.is_stopped() {
            break;
        }
        let message = match runner.run_step(&mut worker, index) {
            Ok(payload) => StepMessage::Done(index, payload),
            Err(e) => StepMessage::Failed(index, e),
        };
        reducer.accept(message)?;
    }
    reducer.finish()
}

fn run_parallel<A: Analysis>(
    analysis: &mut A,
    runner: &A::Runner,
    workers: usize,
    status: &StatusReporter,
) -> Result<ExecutionSummary, EngineError> {
    let steps = runner.n_steps();
    let next = AtomicUsize::new(0);
    let abort = AtomicBool::new(false);
    let (tx, rx) = mpsc::sync_channel::<StepMessage<PayloadOf<A>>>(2 * workers);
    debug!(workers, "Starting worker pool.");

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let (next, abort) = (&next, &abort);
            scope.spawn(move || work(runner, next, abort, status, tx));
        }
        drop(tx);

        let mut reducer = Reducer::new(analysis, steps, status);
        let mut error: Option<EngineError> = None;
        for message in rx {
            if error.is_some() {
                continue;
            }
            if let Err(e) = reducer.accept(message) {
                abort.store(true, Ordering::SeqCst);
                error = Some(e);
            }
        }
        match error {
            Some(e) => Err(e),
            None => reducer.finish(),
        }
    })
}

fn work<R: StepRunner>(
    runner: &R,
    next: &AtomicUsize,
    abort: &AtomicBool,
    status: &StatusReporter,
    tx: SyncSender<StepMessage<R::Payload>>,
) {
    let mut worker = match catch_unwind(AssertUnwindSafe(|| runner.open_worker())) {
        Ok(Ok(worker)) => worker,
        Ok(Err(e)) => {
            let _ = tx.send(StepMessage::Unavailable(e));
            return;
        }
        Err(panic) => {
            let _ = tx.send(StepMessage::Unavailable(EngineError::Internal(format!(
                "worker failed to start: {}",
                panic_message(panic.as_ref())
            ))));
            return;
        }
    };
    while !abort.load(Ordering::SeqCst) && !status.is_stopped() {
        let index = next.fetch_add(1, Ordering::SeqCst);
        if index >= runner.n_steps() {
            break;
        }
        let message = match catch_unwind(AssertUnwindSafe(|| runner.run_step(&mut worker, index))) {
            Ok(Ok(payload)) => StepMessage::Done(index, payload),
            Ok(Err(e)) => StepMessage::Failed(index, e),
            Err(panic) => StepMessage::Crashed(index, panic_message(panic.as_ref())),
        };
        let crashed = matches!(message, StepMessage::Crashed(..));
        if tx.send(message).is_err() || crashed {
            break;
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Owner-side bookkeeping: combines payloads, in index order when the analysis asks for it.
struct Reducer<'r, 's, A: Analysis> {
    analysis: &'r mut A,
    status: &'r StatusReporter<'s>,
    ordered: bool,
    tolerant: bool,
    steps: usize,
    pending: BTreeMap<usize, Option<PayloadOf<A>>>,
    next_index: usize,
    completed: usize,
    failed: Vec<(usize, String)>,
}

impl<'r, 's, A: Analysis> Reducer<'r, 's, A> {
    fn new(analysis: &'r mut A, steps: usize, status: &'r StatusReporter<'s>) -> Self {
        Self {
            ordered: analysis.requires_ordered_combine(),
            tolerant: analysis.continue_on_step_error(),
            analysis,
            status,
            steps,
            pending: BTreeMap::new(),
            next_index: 0,
            completed: 0,
            failed: Vec::new(),
        }
    }

    fn accept(&mut self, message: StepMessage<PayloadOf<A>>) -> Result<(), EngineError> {
        match message {
            StepMessage::Done(index, payload) => {
                self.completed += 1;
                self.status.update();
                self.deliver(index, Some(payload))
            }
            StepMessage::Failed(index, e) if self.tolerant => {
                warn!(step = index, error = %e, "Step failed; skipping it.");
                self.failed.push((index, e.to_string()));
                self.status.update();
                self.deliver(index, None)
            }
            StepMessage::Failed(index, e) => Err(EngineError::StepFailed {
                index,
                message: e.to_string(),
            }),
            StepMessage::Crashed(index, message) => {
                Err(EngineError::WorkerCrashed { index, message })
            }
            StepMessage::Unavailable(e) => Err(e),
        }
    }

    fn deliver(&mut self, index: usize, payload: Option<PayloadOf<A>>) -> Result<(), EngineError> {
        if !self.ordered {
            return match payload {
                Some(payload) => self.analysis.combine(index, payload),
                None => Ok(()),
            };
        }
        self.pending.insert(index, payload);
        while let Some(entry) = self.pending.remove(&self.next_index) {
            if let Some(payload) = entry {
                self.analysis.combine(self.next_index, payload)?;
            }
            self.next_index += 1;
        }
        Ok(())
    }

    fn finish(self) -> Result<ExecutionSummary, EngineError> {
        let resolved = self.completed + self.failed.len();
        let cancelled = resolved < self.steps;
        if cancelled && !self.status.is_stopped() {
            return Err(EngineError::Internal(format!(
                "only {resolved} of {} steps were run",
                self.steps
            )));
        }
        if !self.pending.is_empty() {
            debug!(
                buffered = self.pending.len(),
                "Dropping out-of-order payloads after cancellation."
            );
        }
        Ok(ExecutionSummary {
            steps: self.steps,
            completed: self.completed,
            failed: self.failed,
            cancelled,
        })
    }
}
