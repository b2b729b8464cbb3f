//! The job abstraction.
//!
//! An analysis is written against [`Analysis`]: it declares its settings, turns a resolved
//! [`Configuration`] into a [`StepRunner`], folds step payloads back in with
//! [`Analysis::combine`] and produces its output in [`Analysis::finalize`].
//!
//! The split keeps the parallel part honest. A runner is shared read-only by every worker
//! and each worker owns its scratch state ([`StepRunner::Worker`]), usually an open
//! trajectory reader. Only the owner thread ever holds `&mut` to the analysis.
//!
//! [`AnalysisJob`] wraps an analysis into the object-safe [`Job`] stored in the engine's
//! job registry and drives configuration, execution, output and the log file.

use super::configurators::input::{OUTPUT_FILES, RUNNING_MODE};
use super::configurators::{Configuration, OutputFiles, Parameters, RunningMode, Setting};
use super::context::Engine;
use super::error::EngineError;
use super::executor::{self, ExecutionSummary};
use super::output::{OutputData, with_suffix, write_output};
use super::progress::StatusReporter;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

/// How a run ended, as seen by [`Analysis::finalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
    Failed,
}

/// Per-step work of one analysis, shared by all workers.
pub trait StepRunner: Sync {
    /// Scratch state owned by one worker for the whole run.
    type Worker;
    type Payload: Send;

    fn n_steps(&self) -> usize;

    fn open_worker(&self) -> Result<Self::Worker, EngineError>;

    fn run_step(&self, worker: &mut Self::Worker, index: usize)
    -> Result<Self::Payload, EngineError>;
}

pub type PayloadOf<A> = <<A as Analysis>::Runner as StepRunner>::Payload;

pub trait Analysis: Send {
    type Runner: StepRunner;

    const NAME: &'static str;

    fn settings(&self) -> Vec<Setting>;

    fn initialize(
        &mut self,
        config: &Configuration,
        engine: &Engine,
    ) -> Result<Self::Runner, EngineError>;

    fn combine(&mut self, index: usize, payload: PayloadOf<Self>) -> Result<(), EngineError>;

    /// Called exactly once per run that got past configuration, whatever the outcome.
    fn finalize(&mut self, status: RunStatus) -> Result<Option<OutputData>, EngineError>;

    /// Payloads are combined in step-index order, buffering early arrivals.
    fn requires_ordered_combine(&self) -> bool {
        false
    }

    /// A failing step is logged and skipped instead of aborting the run.
    fn continue_on_step_error(&self) -> bool {
        false
    }

    /// Output is written for cancelled and failed runs too.
    fn writes_partial_output(&self) -> bool {
        false
    }
}

/// Summary of a run that got as far as execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobReport {
    pub steps: usize,
    pub completed_steps: usize,
    pub failed_steps: Vec<(usize, String)>,
    pub files: Vec<PathBuf>,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum JobOutcome {
    Completed(JobReport),
    Cancelled(JobReport),
    Failed(EngineError),
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }

    pub fn files(&self) -> &[PathBuf] {
        match self {
            JobOutcome::Completed(report) | JobOutcome::Cancelled(report) => &report.files,
            JobOutcome::Failed(_) => &[],
        }
    }

    pub fn into_result(self) -> Result<JobReport, EngineError> {
        match self {
            JobOutcome::Completed(report) => Ok(report),
            JobOutcome::Cancelled(_) => Err(EngineError::Cancelled("job was stopped".to_string())),
            JobOutcome::Failed(e) => Err(e),
        }
    }
}

/// Object-safe face of a job, as stored in the engine's registry.
pub trait Job: Send {
    fn name(&self) -> &'static str;

    fn settings(&self) -> Vec<Setting>;

    fn run(&mut self, engine: &Engine, parameters: &Parameters, status: &StatusReporter)
    -> JobOutcome;
}

pub type JobFactory = fn() -> Box<dyn Job>;

/// Registry factory for any default-constructible analysis.
pub fn boxed<A: Analysis + Default + 'static>() -> Box<dyn Job> {
    Box::new(AnalysisJob::new(A::default()))
}

#[derive(Debug, Default)]
pub struct AnalysisJob<A> {
    analysis: A,
}

impl<A: Analysis> AnalysisJob<A> {
    pub fn new(analysis: A) -> Self {
        Self { analysis }
    }

    pub fn analysis(&self) -> &A {
        &self.analysis
    }

    pub fn into_inner(self) -> A {
        self.analysis
    }

    fn execute(
        &mut self,
        engine: &Engine,
        config: &Configuration,
        status: &StatusReporter,
    ) -> (Result<ExecutionSummary, EngineError>, Result<Option<OutputData>, EngineError>) {
        let runner = match self.analysis.initialize(config, engine) {
            Ok(runner) => runner,
            Err(e) => {
                let finalized = self.analysis.finalize(RunStatus::Failed);
                return (Err(e), finalized);
            }
        };
        let mode = config
            .get::<RunningMode>(RUNNING_MODE)
            .copied()
            .unwrap_or_default();

        status.phase("Running");
        let execution = executor::execute(&mut self.analysis, &runner, mode, status);
        status.phase_finish();
        drop(runner);

        let run_status = match &execution {
            Ok(summary) if summary.cancelled => RunStatus::Cancelled,
            Ok(_) => RunStatus::Completed,
            Err(_) => RunStatus::Failed,
        };
        let finalized = self.analysis.finalize(run_status);
        (execution, finalized)
    }
}

impl<A: Analysis> Job for AnalysisJob<A> {
    fn name(&self) -> &'static str {
        A::NAME
    }

    fn settings(&self) -> Vec<Setting> {
        self.analysis.settings()
    }

    #[instrument(skip_all, name = "job", fields(job = A::NAME))]
    fn run(
        &mut self,
        engine: &Engine,
        parameters: &Parameters,
        status: &StatusReporter,
    ) -> JobOutcome {
        let started = Instant::now();
        status.phase("Configuration");
        let configured = engine.configure(&self.analysis.settings(), parameters);
        status.phase_finish();
        let config = match configured {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "Invalid job parameters.");
                return JobOutcome::Failed(e.into());
            }
        };
        let header = config.header(A::NAME);
        let output = config.get::<OutputFiles>(OUTPUT_FILES).ok().cloned();

        let (execution, finalized) = self.execute(engine, &config, status);
        let (summary, mut failure) = match execution {
            Ok(summary) => (Some(summary), None),
            Err(e) => (None, Some(e)),
        };
        let cancelled = summary.as_ref().is_some_and(|s| s.cancelled);
        let write_data = (failure.is_none() && !cancelled) || self.analysis.writes_partial_output();

        let mut report = JobReport {
            elapsed: started.elapsed(),
            ..JobReport::default()
        };
        if let Some(summary) = summary {
            report.steps = summary.steps;
            report.completed_steps = summary.completed;
            report.failed_steps = summary.failed;
        }

        match (finalized, &output) {
            (Ok(Some(data)), Some(output)) if write_data => {
                let written =
                    write_output(engine.formats(), &output.root, &output.formats, &data, &header);
                match written {
                    Ok(files) => report.files = files,
                    Err(e) => {
                        failure.get_or_insert(e.into());
                    }
                }
            }
            (Err(e), _) => {
                failure.get_or_insert(e);
            }
            _ => {}
        }

        if let Some(output) = output.as_ref().filter(|o| o.log) {
            let path = with_suffix(&output.root, ".log");
            let text = run_log(&header, &report, cancelled, failure.as_ref());
            match std::fs::write(&path, text) {
                Ok(()) => report.files.push(path),
                Err(e) => warn!(path = %path.display(), error = %e, "Could not write the run log."),
            }
        }

        if let Some(e) = failure {
            error!(error = %e, "Job failed.");
            return JobOutcome::Failed(e);
        }
        if cancelled {
            warn!(completed = report.completed_steps, steps = report.steps, "Job cancelled.");
            return JobOutcome::Cancelled(report);
        }
        info!(
            steps = report.steps,
            files = report.files.len(),
            elapsed = ?report.elapsed,
            "Job completed."
        );
        JobOutcome::Completed(report)
    }
}

fn run_log(
    header: &str,
    report: &JobReport,
    cancelled: bool,
    failure: Option<&EngineError>,
) -> String {
    let mut text = String::from(header);
    let state = match (failure, cancelled) {
        (Some(_), _) => "failed",
        (None, true) => "cancelled",
        (None, false) => "completed",
    };
    let _ = writeln!(text, "\n# status: {state}");
    let _ = writeln!(text, "# steps: {}/{}", report.completed_steps, report.steps);
    let _ = writeln!(text, "# elapsed: {:.3} s", report.elapsed.as_secs_f64());
    for (index, message) in &report.failed_steps {
        let _ = writeln!(text, "# skipped step {index}: {message}");
    }
    if let Some(e) = failure {
        let _ = writeln!(text, "# error: {e}");
    }
    for file in &report.files {
        let _ = writeln!(text, "# output: {}", file.display());
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use crate::engine::testing::{Squares, test_engine};

    fn parameters(dir: &std::path::Path, extra: &[(&str, Value)]) -> Parameters {
        let mut parameters = Parameters::new();
        parameters.insert(
            "output_files".into(),
            Value::from([
                ("root", Value::from(dir.join("squares").to_string_lossy().to_string())),
                ("formats", Value::from(vec!["ASCII"])),
                ("log", Value::from(true)),
            ]),
        );
        for (name, value) in extra {
            parameters.insert(name.to_string(), value.clone());
        }
        parameters
    }

    #[test]
    fn completed_run_writes_output_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine();
        let mut job = AnalysisJob::new(Squares::default());
        let outcome = job.run(&engine, &parameters(dir.path(), &[]), &StatusReporter::new());

        let JobOutcome::Completed(report) = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!((report.steps, report.completed_steps), (8, 8));
        assert_eq!(job.analysis().sum, 140.0);
        assert_eq!(job.analysis().finalized, vec![RunStatus::Completed]);
        let log = dir.path().join("squares.log");
        assert!(report.files.contains(&log));
        let text = std::fs::read_to_string(log).unwrap();
        assert!(text.starts_with("job = \"squares\""));
        assert!(text.contains("# status: completed"));
    }

    #[test]
    fn invalid_parameters_fail_before_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine();
        let mut job = AnalysisJob::new(Squares::default());
        let params = parameters(dir.path(), &[("stpes", Value::from(3))]);
        let outcome = job.run(&engine, &params, &StatusReporter::new());

        assert!(matches!(outcome, JobOutcome::Failed(EngineError::Config(_))));
        assert!(job.analysis().finalized.is_empty());
    }

    #[test]
    fn cancelled_run_finalizes_but_writes_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine();
        let status = StatusReporter::new();
        status.stop();
        let mut job = AnalysisJob::new(Squares::default());
        let outcome = job.run(&engine, &parameters(dir.path(), &[]), &status);

        assert!(matches!(outcome, JobOutcome::Cancelled(_)), "{outcome:?}");
        assert_eq!(job.analysis().finalized, vec![RunStatus::Cancelled]);
        let written: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(written.len(), 1, "only the run log is written");
    }

    #[test]
    fn step_failure_aborts_and_reports_the_step() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine();
        let mut job = AnalysisJob::new(Squares {
            fail_at: Some(3),
            ..Squares::default()
        });
        let outcome = job.run(&engine, &parameters(dir.path(), &[]), &StatusReporter::new());

        match outcome {
            JobOutcome::Failed(EngineError::StepFailed { index, .. }) => assert_eq!(index, 3),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(job.analysis().finalized, vec![RunStatus::Failed]);
        let log = std::fs::read_to_string(dir.path().join("squares.log")).unwrap();
        assert!(log.contains("# status: failed"));
    }

    #[test]
    fn tolerant_analysis_skips_failed_steps() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine();
        let mut job = AnalysisJob::new(Squares {
            fail_at: Some(2),
            tolerant: true,
            ..Squares::default()
        });
        let outcome = job.run(&engine, &parameters(dir.path(), &[]), &StatusReporter::new());

        let report = outcome.into_result().unwrap();
        assert_eq!(report.completed_steps, 7);
        assert_eq!(report.failed_steps.len(), 1);
        assert_eq!(report.failed_steps[0].0, 2);
        assert_eq!(job.analysis().sum, 136.0);
    }

    #[test]
    fn header_lists_effective_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine();
        let settings = Squares::default().settings();
        let config = engine
            .configure(&settings, &parameters(dir.path(), &[("steps", Value::from(3))]))
            .unwrap();
        let header = config.header("squares");
        let parsed: toml::Table = toml::from_str(&header).unwrap();
        assert_eq!(parsed["job"].as_str(), Some("squares"));
        assert_eq!(parsed["parameters"]["steps"].as_integer(), Some(3));
        assert_eq!(parsed["parameters"]["running_mode"].as_str(), Some("monoprocessor"));
    }
}
