//! Root-mean-square deviation from a reference frame.
//!
//! Each group contributes its squared displacement from its own position at the
//! reference frame. The per-species means are combined with the weight factors before
//! taking the square root.

use super::common::{self, SpeciesSums};
use crate::core::atoms::AtomsDatabase;
use crate::core::io::trajectory::Trajectory;
use crate::core::models::entity::AtomGroup;
use crate::engine::configurators::input::FRAME_INDEX;
use crate::engine::configurators::{
    Configuration, FrameSelection, Grouping, InputTrajectory, Setting, Weights,
};
use crate::engine::context::Engine;
use crate::engine::error::EngineError;
use crate::engine::job::{Analysis, RunStatus, StepRunner};
use crate::engine::output::OutputData;
use std::path::PathBuf;

pub const NAME: &str = "rmsd";
const REFERENCE_FRAME_PARAM: &str = "reference_frame";

#[derive(Debug, Default)]
pub struct Rmsd {
    state: Option<RmsdState>,
}

#[derive(Debug)]
struct RmsdState {
    time: Vec<f64>,
    weights: Weights,
    sums: SpeciesSums,
}

pub struct RmsdRunner {
    path: PathBuf,
    frames: FrameSelection,
    reference: usize,
    groups: Vec<AtomGroup>,
    database: AtomsDatabase,
}

impl StepRunner for RmsdRunner {
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
        let origin = path[self.reference];
        Ok(path.iter().map(|r| (r - origin).norm_squared()).collect())
    }
}

impl Analysis for Rmsd {
    type Runner = RmsdRunner;

    const NAME: &'static str = NAME;

    fn settings(&self) -> Vec<Setting> {
        vec![
            common::trajectory(),
            common::frames(),
            Setting::new(REFERENCE_FRAME_PARAM, FRAME_INDEX)
                .default_value(0)
                .depends_on("frames", common::FRAMES_PARAM),
            common::atom_selection(),
            common::atom_transmutation(),
            common::grouping_level("atom"),
            common::weights("mass"),
            common::output_files(&["HDF"]),
            common::running_mode(),
        ]
    }

    fn initialize(
        &mut self,
        config: &Configuration,
        engine: &Engine,
    ) -> Result<RmsdRunner, EngineError> {
        let input = config.get::<InputTrajectory>(common::TRAJECTORY_PARAM)?;
        let frames = config.get::<FrameSelection>(common::FRAMES_PARAM)?;
        let grouping = config.get::<Grouping>(common::GROUPING_PARAM)?;
        let weights = config.get::<Weights>(common::WEIGHTS_PARAM)?;
        let reference = *config.get::<i64>(REFERENCE_FRAME_PARAM)? as usize;

        self.state = Some(RmsdState {
            time: frames.duration.clone(),
            weights: weights.clone(),
            sums: SpeciesSums::new(grouping, frames.number()),
        });
        Ok(RmsdRunner {
            path: input.path.clone(),
            frames: frames.clone(),
            reference,
            groups: grouping.groups.clone(),
            database: engine.atoms().clone(),
        })
    }

    fn combine(&mut self, index: usize, payload: Vec<f64>) -> Result<(), EngineError> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| EngineError::Internal("RMSD combined before initialization".into()))?;
        state.sums.add(index, &payload)
    }

    fn finalize(&mut self, status: RunStatus) -> Result<Option<OutputData>, EngineError> {
        let Some(state) = self.state.take() else {
            return Ok(None);
        };
        if status != RunStatus::Completed {
            return Ok(None);
        }
        let total = state
            .sums
            .weighted_total(&state.weights)
            .into_iter()
            .map(f64::sqrt)
            .collect();
        let per_species = state
            .sums
            .means()
            .into_iter()
            .map(|(species, msd)| (species, msd.into_iter().map(f64::sqrt).collect()))
            .collect();

        let mut data = OutputData::new();
        data.add_line("time", state.time, "ps", &[])?;
        common::add_species_lines(&mut data, "rmsd", per_species, total, "nm", "time")?;
        Ok(Some(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use crate::engine::configurators::{Parameters, RunningMode};
    use crate::engine::config::ConfigError;
    use crate::engine::testing::{configure, run_analysis, test_engine, water_box};

    fn parameters(trajectory: &std::path::Path, extra: &[(&str, Value)]) -> Parameters {
        let mut parameters = Parameters::from([(
            "trajectory".to_string(),
            Value::from(trajectory.to_string_lossy().to_string()),
        )]);
        for (k, v) in extra {
            parameters.insert(k.to_string(), v.clone());
        }
        parameters
    }

    #[test]
    fn rmsd_starts_at_zero_and_grows() {
        let dir = tempfile::tempdir().unwrap();
        let trajectory = water_box(dir.path(), 2, 10, true, false);
        let params = parameters(&trajectory, &[]);
        let data = run_analysis(
            &mut Rmsd::default(),
            &test_engine(),
            &params,
            RunningMode::Monoprocessor,
        );

        let time = &data.get("time").unwrap().data;
        assert_eq!(time.len(), 10);
        assert_eq!(time[0], 0.0);
        let total = &data.get("rmsd_total").unwrap().data;
        assert_eq!(total[0], 0.0);
        assert!(total.iter().all(|v| v.is_finite() && *v >= 0.0));
        assert!(total[9] > total[1]);
        assert!(data.get("rmsd_H").is_some() && data.get("rmsd_O").is_some());
    }

    #[test]
    fn reference_frame_outside_selection_fails() {
        let dir = tempfile::tempdir().unwrap();
        let trajectory = water_box(dir.path(), 1, 4, false, false);
        let engine = test_engine();
        let params = parameters(&trajectory, &[("reference_frame", Value::from(4))]);
        let err = configure(&Rmsd::default(), &engine, &params).err().unwrap();
        assert!(matches!(
            err,
            ConfigError::OutOfRange { name: "reference_frame", ref max, .. }
                if max.as_deref() == Some("3")
        ));

        let strided = parameters(
            &trajectory,
            &[
                ("frames", Value::List(vec![Value::Int(0), Value::Null, Value::Int(2)])),
                ("reference_frame", Value::from(2)),
            ],
        );
        assert!(configure(&Rmsd::default(), &engine, &strided).is_err());
        let inside = parameters(&trajectory, &[("reference_frame", Value::from(3))]);
        assert!(configure(&Rmsd::default(), &engine, &inside).is_ok());
    }

    #[test]
    fn molecule_grouping_uses_centres_of_mass() {
        let dir = tempfile::tempdir().unwrap();
        let trajectory = water_box(dir.path(), 2, 5, true, false);
        let params = parameters(
            &trajectory,
            &[("grouping_level", Value::from("molecule")), ("reference_frame", Value::from(2))],
        );
        let data = run_analysis(
            &mut Rmsd::default(),
            &test_engine(),
            &params,
            RunningMode::Multiprocessor(2),
        );
        assert_eq!(data.get("rmsd_total").unwrap().data[2], 0.0);
        assert!(data.get("rmsd_H2O").is_some());
    }
}
