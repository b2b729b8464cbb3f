//! Mean-square displacement over a correlation window.
//!
//! `MSD(τ) = ⟨|P(r(t + τ) − r(t))|²⟩_t` for `τ` below the window, where `P` is the
//! configured projection. Every time origin is used.

use super::common::{self, SpeciesSums};
use crate::core::atoms::AtomsDatabase;
use crate::core::io::trajectory::Trajectory;
use crate::core::models::entity::AtomGroup;
use crate::engine::configurators::{
    Configuration, FrameSelection, Grouping, InputTrajectory, Projection, Setting, Weights,
};
use crate::engine::context::Engine;
use crate::engine::error::EngineError;
use crate::engine::job::{Analysis, RunStatus, StepRunner};
use crate::engine::output::OutputData;
use nalgebra::Vector3;
use std::path::PathBuf;

pub const NAME: &str = "msd";

/// Mean-square displacement of one path for lags `0..window`.
pub fn mean_square_displacement(
    path: &[Vector3<f64>],
    window: usize,
    projection: &Projection,
) -> Vec<f64> {
    let n = path.len();
    (0..window)
        .map(|lag| {
            if lag >= n {
                return 0.0;
            }
            let origins = n - lag;
            let sum: f64 = (0..origins)
                .map(|t| projection.project(&(path[t + lag] - path[t])).norm_squared())
                .sum();
            sum / origins as f64
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct Msd {
    state: Option<MsdState>,
}

#[derive(Debug)]
struct MsdState {
    time: Vec<f64>,
    weights: Weights,
    sums: SpeciesSums,
}

pub struct MsdRunner {
    path: PathBuf,
    frames: FrameSelection,
    window: usize,
    projection: Projection,
    groups: Vec<AtomGroup>,
    database: AtomsDatabase,
}

impl StepRunner for MsdRunner {
    type Worker = Trajectory;
    type Payload = Vec<f64>;

    fn n_steps(&self) -> usize {
        self.groups.len()
    }

    fn open_worker(&self) -> Result<Trajectory, EngineError> {
        common::open(&self.path)
    }

    fn run_step(&self, reader: &mut Trajectory, index: usize) -> Result<Vec<f64>, EngineError> {
        let path = common::group_path(reader, &self.groups[index], &self.database, &self.frames)?;
        Ok(mean_square_displacement(&path, self.window, &self.projection))
    }
}

impl Analysis for Msd {
    type Runner = MsdRunner;

    const NAME: &'static str = NAME;

    fn settings(&self) -> Vec<Setting> {
        vec![
            common::trajectory(),
            common::frames(),
            common::correlation_window(),
            common::projection(),
            common::atom_selection(),
            common::atom_transmutation(),
            common::grouping_level("atom"),
            common::weights("equal"),
            common::output_files(&["HDF"]),
            common::running_mode(),
        ]
    }

    fn initialize(
        &mut self,
        config: &Configuration,
        engine: &Engine,
    ) -> Result<MsdRunner, EngineError> {
        let input = config.get::<InputTrajectory>(common::TRAJECTORY_PARAM)?;
        let frames = config.get::<FrameSelection>(common::FRAMES_PARAM)?;
        let window = *config.get::<i64>("frames_correlation_window")? as usize;
        let projection = *config.get::<Projection>("projection")?;
        let grouping = config.get::<Grouping>(common::GROUPING_PARAM)?;
        let weights = config.get::<Weights>(common::WEIGHTS_PARAM)?;

        self.state = Some(MsdState {
            time: frames.duration[..window].to_vec(),
            weights: weights.clone(),
            sums: SpeciesSums::new(grouping, window),
        });
        Ok(MsdRunner {
            path: input.path.clone(),
            frames: frames.clone(),
            window,
            projection,
            groups: grouping.groups.clone(),
            database: engine.atoms().clone(),
        })
    }

    fn combine(&mut self, index: usize, payload: Vec<f64>) -> Result<(), EngineError> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| EngineError::Internal("MSD combined before initialization".into()))?;
        state.sums.add(index, &payload)
    }

    fn finalize(&mut self, status: RunStatus) -> Result<Option<OutputData>, EngineError> {
        let Some(state) = self.state.take() else {
            return Ok(None);
        };
        if status != RunStatus::Completed {
            return Ok(None);
        }
        let mut data = OutputData::new();
        data.add_line("time", state.time, "ps", &[])?;
        let total = state.sums.weighted_total(&state.weights);
        common::add_species_lines(&mut data, "msd", state.sums.means(), total, "nm2", "time")?;
        Ok(Some(data))
    }
}
