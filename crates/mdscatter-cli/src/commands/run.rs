use crate::cli::RunArgs;
use crate::config::{DefaultsConfig, JobFile, JobRequest, ParameterBuilder};
use crate::data::DataManager;
use crate::error::{CliError, Result};
use crate::ui::{CliProgressHandler, UiEvent};
use mdscatter::engine::Engine;
use mdscatter::engine::job::{JobOutcome, JobReport};
use mdscatter::engine::progress::StatusReporter;
use mdscatter::workflows;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task;
use tracing::{info, warn};

pub async fn run(
    args: RunArgs,
    threads: Option<usize>,
    ui_sender: mpsc::Sender<UiEvent>,
) -> Result<()> {
    info!("Initializing data manager...");
    let data_manager = DataManager::new()?;
    let mut engine = workflows::engine_with(data_manager.load_atoms()?)?;
    engine.set_instruments(data_manager.load_settings()?.instruments);

    let request = prepare(&engine, &args, &DefaultsConfig { threads })?;
    info!(
        "Running '{}' with parameters: {:?}",
        request.job,
        request.parameters.keys().collect::<Vec<_>>()
    );

    let handler = CliProgressHandler::new(ui_sender);
    let status = Arc::new(StatusReporter::with_callback(handler.get_callback()));

    let mut worker = {
        let status = Arc::clone(&status);
        let JobRequest { job, parameters } = request.clone();
        task::spawn_blocking(move || engine.run_job(&job, &parameters, &status))
    };

    let finished = tokio::select! {
        joined = &mut worker => Some(joined),
        _ = tokio::signal::ctrl_c() => None,
    };
    let joined = match finished {
        Some(joined) => joined,
        None => {
            warn!("Interrupt received, stopping after the current step.");
            status.stop();
            worker.await
        }
    };
    let outcome = joined
        .map_err(|e| CliError::Other(anyhow::anyhow!("Job worker failed: {}", e)))??;

    report(&request.job, outcome)
}

/// Merges the parameter file, overrides and CLI defaults for `args.job`.
fn prepare(engine: &Engine, args: &RunArgs, defaults: &DefaultsConfig) -> Result<JobRequest> {
    let settings = engine.job_settings(&args.job)?;
    let job = engine.jobs().canonical_name(&args.job).unwrap_or(args.job.as_str());

    let mut builder = ParameterBuilder::new(job, &settings);
    if let Some(path) = &args.config {
        builder = builder.file(JobFile::from_file(path)?)?;
    }
    Ok(builder
        .assignments(&args.set_values)?
        .input(args.input.as_deref())?
        .output(args.output.as_deref())?
        .build(defaults))
}

fn print_files(report: &JobReport) {
    for file in &report.files {
        println!("  {}", file.display());
    }
}

fn report(job: &str, outcome: JobOutcome) -> Result<()> {
    match outcome {
        JobOutcome::Completed(report) => {
            for (step, reason) in &report.failed_steps {
                warn!("Step {} failed: {}", step, reason);
            }
            println!(
                "✓ {job} finished {} step(s) in {:.2?}. Written:",
                report.completed_steps, report.elapsed
            );
            print_files(&report);
            Ok(())
        }
        JobOutcome::Cancelled(report) => {
            println!(
                "{job} stopped after {}/{} step(s). Partial results:",
                report.completed_steps, report.steps
            );
            print_files(&report);
            Err(CliError::Cancelled(job.to_string()))
        }
        JobOutcome::Failed(e) => Err(e.into()),
    }
}
