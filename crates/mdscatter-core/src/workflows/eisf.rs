//! Elastic incoherent structure factor.
//!
//! For every group the EISF at a shell is `|⟨exp(i q·r(t))⟩_t|²` averaged over the shell's
//! vectors, with `r(t)` the unwrapped path of the group. Groups are averaged per species
//! and the species are summed with their weight factors.

use super::common::{self, SpeciesSums};
use crate::core::atoms::AtomsDatabase;
use crate::core::io::trajectory::Trajectory;
use crate::core::models::entity::AtomGroup;
use crate::engine::configurators::{
    Configuration, FrameSelection, Grouping, InputTrajectory, QVectorSet, Setting, Weights,
};
use crate::engine::context::Engine;
use crate::engine::error::EngineError;
use crate::engine::job::{Analysis, RunStatus, StepRunner};
use crate::engine::output::OutputData;
use nalgebra::Vector3;
use std::path::PathBuf;
use tracing::info;

pub const NAME: &str = "eisf";

#[derive(Debug, Default)]
pub struct Eisf {
    state: Option<EisfState>,
}

#[derive(Debug)]
struct EisfState {
    q: Vec<f64>,
    weights: Weights,
    sums: SpeciesSums,
}

pub struct EisfRunner {
    path: PathBuf,
    frames: FrameSelection,
    groups: Vec<AtomGroup>,
    shells: Vec<Vec<Vector3<f64>>>,
    database: AtomsDatabase,
}

/// `|⟨exp(i q·r)⟩_t|²` averaged over `vectors`.
pub fn shell_eisf(vectors: &[Vector3<f64>], path: &[Vector3<f64>]) -> f64 {
    if vectors.is_empty() || path.is_empty() {
        return 0.0;
    }
    let n = path.len() as f64;
    let total: f64 = vectors
        .iter()
        .map(|q| {
            let (re, im) = path.iter().fold((0.0, 0.0), |(re, im), r| {
                let (sin, cos) = q.dot(r).sin_cos();
                (re + cos, im + sin)
            });
            (re * re + im * im) / (n * n)
        })
        .sum();
    total / vectors.len() as f64
}

impl StepRunner for EisfRunner {
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
        Ok(self.shells.iter().map(|shell| shell_eisf(shell, &path)).collect())
    }
}

impl Analysis for Eisf {
    type Runner = EisfRunner;

    const NAME: &'static str = NAME;

    fn settings(&self) -> Vec<Setting> {
        vec![
            common::trajectory(),
            common::frames(),
            common::q_vectors(),
            common::atom_selection(),
            common::atom_transmutation(),
            common::grouping_level("atom"),
            common::weights("b_incoherent2"),
            common::output_files(&["HDF"]),
            common::running_mode(),
        ]
    }

    fn initialize(
        &mut self,
        config: &Configuration,
        engine: &Engine,
    ) -> Result<EisfRunner, EngineError> {
        let input = config.get::<InputTrajectory>(common::TRAJECTORY_PARAM)?;
        let frames = config.get::<FrameSelection>(common::FRAMES_PARAM)?;
        let q_vectors = config.get::<QVectorSet>("q_vectors")?;
        let grouping = config.get::<Grouping>(common::GROUPING_PARAM)?;
        let weights = config.get::<Weights>(common::WEIGHTS_PARAM)?;
        info!(
            groups = grouping.len(),
            shells = q_vectors.shells.len(),
            frames = frames.number(),
            "EISF initialized."
        );

        self.state = Some(EisfState {
            q: q_vectors.q_values(),
            weights: weights.clone(),
            sums: SpeciesSums::new(grouping, q_vectors.shells.len()),
        });
        Ok(EisfRunner {
            path: input.path.clone(),
            frames: frames.clone(),
            groups: grouping.groups.clone(),
            shells: q_vectors.shells.iter().map(|s| s.vectors.clone()).collect(),
            database: engine.atoms().clone(),
        })
    }

    fn combine(&mut self, index: usize, payload: Vec<f64>) -> Result<(), EngineError> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| EngineError::Internal("EISF combined before initialization".into()))?;
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
        data.add_line("q", state.q, "1/nm", &[])?;
        let total = state.sums.weighted_total(&state.weights);
        common::add_species_lines(&mut data, "eisf", state.sums.means(), total, "au", "q")?;
        Ok(Some(data))
    }
}
