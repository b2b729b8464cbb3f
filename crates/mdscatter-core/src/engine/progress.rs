use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub enum Progress {
    PhaseStart { name: &'static str },
    PhaseFinish,

    TaskStart { total_steps: u64 },
    TaskIncrement,
    TaskFinish,

    Message(String),
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }
}

/// Shared run status of one job: step counting, ETA and the cancellation flag.
///
/// One reporter is passed by reference into every run. Workers only read
/// [`StatusReporter::is_stopped`]; the owner thread drives the counters.
#[derive(Default)]
pub struct StatusReporter<'a> {
    stopped: AtomicBool,
    total: AtomicU64,
    done: AtomicU64,
    started: Mutex<Option<Instant>>,
    progress: ProgressReporter<'a>,
}

impl<'a> StatusReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            progress: ProgressReporter::with_callback(callback),
            ..Self::default()
        }
    }

    /// Requests cancellation. Takes effect between steps.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn start(&self, total_steps: usize) {
        self.total.store(total_steps as u64, Ordering::SeqCst);
        self.done.store(0, Ordering::SeqCst);
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Instant::now());
        }
        self.progress.report(Progress::TaskStart {
            total_steps: total_steps as u64,
        });
    }

    /// Records one finished step.
    pub fn update(&self) {
        self.done.fetch_add(1, Ordering::SeqCst);
        self.progress.report(Progress::TaskIncrement);
    }

    pub fn finish(&self) {
        self.progress.report(Progress::TaskFinish);
    }

    pub fn phase(&self, name: &'static str) {
        self.progress.report(Progress::PhaseStart { name });
    }

    pub fn phase_finish(&self) {
        self.progress.report(Progress::PhaseFinish);
    }

    pub fn message(&self, message: impl Into<String>) {
        self.progress.report(Progress::Message(message.into()));
    }

    pub fn steps_done(&self) -> u64 {
        self.done.load(Ordering::SeqCst)
    }

    pub fn total_steps(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.started
            .lock()
            .ok()
            .and_then(|started| started.map(|t| t.elapsed()))
    }

    /// Remaining time extrapolated from the mean duration of the steps done so far.
    pub fn eta(&self) -> Option<Duration> {
        let done = self.steps_done();
        let total = self.total_steps();
        if done == 0 {
            return None;
        }
        let elapsed = self.elapsed()?;
        let per_step = elapsed.as_secs_f64() / done as f64;
        Some(Duration::from_secs_f64(per_step * total.saturating_sub(done) as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn counts_steps_and_forwards_events() {
        let increments = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&increments);
        let status = StatusReporter::with_callback(Box::new(move |event| {
            if matches!(event, Progress::TaskIncrement) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        }));
        assert!(status.eta().is_none());
        status.start(4);
        status.update();
        status.update();
        assert_eq!(status.steps_done(), 2);
        assert_eq!(status.total_steps(), 4);
        assert!(status.eta().is_some());
        assert_eq!(increments.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stop_is_visible_across_threads() {
        let status = StatusReporter::new();
        std::thread::scope(|scope| {
            scope.spawn(|| status.stop());
        });
        assert!(status.is_stopped());
    }
}
