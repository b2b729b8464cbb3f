use super::configurators::input::{OUTPUT_FILES, RUNNING_MODE};
use super::configurators::scalars::INTEGER;
use super::config::ConfigError;
use super::configurators::{Configuration, Instrument, Parameters, RunningMode, Setting};
use super::context::Engine;
use super::error::EngineError;
use super::job::{Analysis, RunStatus, StepRunner};
use super::executor::execute;
use super::output::OutputData;
use super::progress::StatusReporter;
use crate::core::io::trajectory_writer::{FrameUnits, TrajectoryWriter, TrajectoryWriterOptions};
use crate::core::models::configuration::Configuration as Frame;
use crate::core::models::system::tests::water_system;
use crate::core::models::unit_cell::UnitCell;
use crate::core::value::Value;
use nalgebra::Vector3;
use std::path::{Path, PathBuf};

pub(crate) const SPACING: f64 = 1.0;
pub(crate) const TIME_STEP: f64 = 0.1;

/// Engine with every built-in job and one instrument named `backscattering`.
pub(crate) fn test_engine() -> Engine {
    let mut engine = crate::workflows::default_engine().unwrap();
    engine.set_instruments(vec![Instrument {
        name: "backscattering".into(),
        description: "test instrument".into(),
        resolution: Some(Value::List(vec![
            Value::from("lorentzian"),
            Value::from([("sigma", 0.01)]),
        ])),
    }]);
    engine
}

/// Resolves the settings of `analysis`. Nothing is written in tests, so a missing
/// `output_files` gets a placeholder root.
pub(crate) fn configure<A: Analysis>(
    analysis: &A,
    engine: &Engine,
    parameters: &Parameters,
) -> Result<Configuration, ConfigError> {
    let settings = analysis.settings();
    let mut parameters = parameters.clone();
    if settings.iter().any(|s| s.name == OUTPUT_FILES) {
        parameters
            .entry(OUTPUT_FILES.to_string())
            .or_insert_with(|| Value::from("unwritten"));
    }
    engine.configure(&settings, &parameters)
}

/// Configures, runs and finalizes `analysis` in-process.
pub(crate) fn run_finalized<A: Analysis>(
    analysis: &mut A,
    engine: &Engine,
    parameters: &Parameters,
    mode: RunningMode,
) -> Option<OutputData> {
    let config = configure(analysis, engine, parameters).unwrap();
    let runner = analysis.initialize(&config, engine).unwrap();
    execute(analysis, &runner, mode, &StatusReporter::new()).unwrap();
    drop(runner);
    analysis.finalize(RunStatus::Completed).unwrap()
}

/// [`run_finalized`] for analyses that always produce output data.
pub(crate) fn run_analysis<A: Analysis>(
    analysis: &mut A,
    engine: &Engine,
    parameters: &Parameters,
    mode: RunningMode,
) -> OutputData {
    run_finalized(analysis, engine, parameters, mode).unwrap()
}

/// Offset of the molecule `m` in frame `f`; small, smooth and different per molecule.
pub(crate) fn drift(m: usize, f: usize) -> Vector3<f64> {
    let (m, f) = (m as f64, f as f64);
    Vector3::new(
        0.01 * (0.3 * f + m).sin(),
        0.01 * (0.2 * f + 2.0 * m).cos() - 0.01 * (2.0 * m).cos(),
        0.002 * f * (1.0 + 0.1 * m),
    )
}

pub(crate) fn water_positions(n_side: usize, frame: usize) -> Vec<Vector3<f64>> {
    let bent = 104.5f64.to_radians();
    let h1 = Vector3::new(0.1, 0.0, 0.0);
    let h2 = Vector3::new(0.1 * bent.cos(), 0.1 * bent.sin(), 0.0);
    let mut positions = Vec::with_capacity(3 * n_side.pow(3));
    let mut m = 0;
    for i in 0..n_side {
        for j in 0..n_side {
            for k in 0..n_side {
                let center = Vector3::new(i as f64, j as f64, k as f64).add_scalar(0.5) * SPACING
                    + drift(m, frame);
                positions.extend([center, center + h1, center + h2]);
                m += 1;
            }
        }
    }
    positions
}

/// Writes `n_side³` rigid waters on a cubic grid, translating a little every frame.
pub(crate) fn water_box(
    dir: &Path,
    n_side: usize,
    n_frames: usize,
    periodic: bool,
    velocities: bool,
) -> PathBuf {
    let path = dir.join("waterbox.mdt");
    let system = water_system(n_side.pow(3));
    let mut writer =
        TrajectoryWriter::create(&path, &system, n_frames, TrajectoryWriterOptions::default())
            .unwrap();
    for f in 0..n_frames {
        let cell = periodic.then(|| UnitCell::cubic(n_side as f64 * SPACING).unwrap());
        let mut frame = Frame::new(water_positions(n_side, f), cell);
        if velocities {
            let next = water_positions(n_side, f + 1);
            let current = water_positions(n_side, f);
            let v = next.iter().zip(&current).map(|(a, b)| (a - b) / TIME_STEP).collect();
            frame.set_variable("velocities", v).unwrap();
        }
        writer
            .dump_configuration(&frame, f as f64 * TIME_STEP, &FrameUnits::default())
            .unwrap();
    }
    writer.close().unwrap();
    path
}

/// Sums `i²` over its steps; knobs make steps fail or panic.
#[derive(Debug, Default)]
pub(crate) struct Squares {
    pub fail_at: Option<usize>,
    pub panic_at: Option<usize>,
    pub ordered: bool,
    pub tolerant: bool,
    pub partial: bool,
    pub combined: Vec<usize>,
    pub sum: f64,
    pub finalized: Vec<RunStatus>,
}

pub(crate) struct SquaresRunner {
    steps: usize,
    fail_at: Option<usize>,
    panic_at: Option<usize>,
}

impl SquaresRunner {
    pub fn new(steps: usize, fail_at: Option<usize>, panic_at: Option<usize>) -> Self {
        Self {
            steps,
            fail_at,
            panic_at,
        }
    }
}

impl StepRunner for SquaresRunner {
    type Worker = ();
    type Payload = f64;

    fn n_steps(&self) -> usize {
        self.steps
    }

    fn open_worker(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn run_step(&self, _: &mut (), index: usize) -> Result<f64, EngineError> {
        if self.panic_at == Some(index) {
            panic!("step {index} exploded");
        }
        if self.fail_at == Some(index) {
            return Err(EngineError::Internal(format!("step {index} refused")));
        }
        Ok((index * index) as f64)
    }
}

impl Analysis for Squares {
    type Runner = SquaresRunner;

    const NAME: &'static str = "squares";

    fn settings(&self) -> Vec<Setting> {
        vec![
            Setting::new("steps", INTEGER).default_value(8).option("mini", 1),
            Setting::new("output_files", OUTPUT_FILES),
            Setting::new("running_mode", RUNNING_MODE),
        ]
    }

    fn initialize(
        &mut self,
        config: &Configuration,
        _: &Engine,
    ) -> Result<SquaresRunner, EngineError> {
        let steps = *config.get::<i64>("steps")? as usize;
        Ok(SquaresRunner::new(steps, self.fail_at, self.panic_at))
    }

    fn combine(&mut self, index: usize, payload: f64) -> Result<(), EngineError> {
        self.combined.push(index);
        self.sum += payload;
        Ok(())
    }

    fn finalize(&mut self, status: RunStatus) -> Result<Option<OutputData>, EngineError> {
        self.finalized.push(status);
        let mut data = OutputData::new();
        data.add_line("sum", vec![self.sum], "au", &[])?;
        Ok(Some(data))
    }

    fn requires_ordered_combine(&self) -> bool {
        self.ordered
    }

    fn continue_on_step_error(&self) -> bool {
        self.tolerant
    }

    fn writes_partial_output(&self) -> bool {
        self.partial
    }
}
