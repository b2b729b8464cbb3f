//! Rigid-body motion of atom groups.
//!
//! Every group is made whole by nearest image in each selected frame and superposed onto
//! itself at the reference frame with mass weights. The fit gives the orientation
//! quaternion `(w, x, y, z)` and the residual RMS; the unwrapped centre of mass gives the
//! translation.

use super::common;
use crate::core::atoms::AtomsDatabase;
use crate::core::io::trajectory::Trajectory;
use crate::core::models::entity::AtomGroup;
use crate::core::utils::geometry::{minimum_image, superpose};
use crate::engine::config::ConfigError;
use crate::engine::configurators::scalars::INTEGER;
use crate::engine::configurators::{
    Configuration, FrameSelection, Grouping, InputTrajectory, Setting,
};
use crate::engine::context::Engine;
use crate::engine::error::EngineError;
use crate::engine::job::{Analysis, RunStatus, StepRunner};
use crate::engine::output::OutputData;
use nalgebra::{UnitQuaternion, Vector3};
use std::path::PathBuf;

pub const NAME: &str = "rigid_body_trajectory";

/// Fit results of one group over the selected frames.
#[derive(Debug, Clone, PartialEq)]
pub struct RigidBodyPath {
    pub quaternions: Vec<UnitQuaternion<f64>>,
    pub coms: Vec<Vector3<f64>>,
    pub rms: Vec<f64>,
}

#[derive(Debug, Default)]
pub struct RigidBodyTrajectory {
    state: Option<RigidBodyState>,
}

#[derive(Debug)]
struct RigidBodyState {
    time: Vec<f64>,
    groups: Vec<String>,
    paths: Vec<Option<RigidBodyPath>>,
}

pub struct RigidBodyRunner {
    path: PathBuf,
    frames: FrameSelection,
    reference: usize,
    groups: Vec<AtomGroup>,
    database: AtomsDatabase,
}

impl RigidBodyRunner {
    fn whole_group(
        &self,
        reader: &mut Trajectory,
        atoms: &[usize],
        frame: usize,
    ) -> Result<Vec<Vector3<f64>>, EngineError> {
        let coordinates = reader.coordinates(frame)?;
        let anchor = coordinates[atoms[0]];
        Ok(match reader.unit_cell(frame)? {
            Some(cell) => atoms
                .iter()
                .map(|&i| anchor + minimum_image(&(coordinates[i] - anchor), &cell))
                .collect(),
            None => atoms.iter().map(|&i| coordinates[i]).collect(),
        })
    }
}

impl StepRunner for RigidBodyRunner {
    type Worker = Trajectory;
    type Payload = RigidBodyPath;

    fn n_steps(&self) -> usize {
        self.groups.len()
    }

    fn open_worker(&self) -> Result<Trajectory, EngineError> {
        common::open(&self.path)
    }

    fn run_step(
        &self,
        reader: &mut Trajectory,
        index: usize,
    ) -> Result<RigidBodyPath, EngineError> {
        let group = &self.groups[index];
        let coms = common::group_path(reader, group, &self.database, &self.frames)?;
        let n_frames = self.frames.number();
        if group.atoms.len() < 2 {
            return Ok(RigidBodyPath {
                quaternions: vec![UnitQuaternion::identity(); n_frames],
                coms,
                rms: vec![0.0; n_frames],
            });
        }

        let system = reader.chemical_system().clone();
        let masses = group
            .atoms
            .iter()
            .map(|&i| Ok(self.database.numeric(&system.atom(i)?.symbol, "mass")?))
            .collect::<Result<Vec<f64>, EngineError>>()?;
        let reference =
            self.whole_group(reader, &group.atoms, self.frames.indices[self.reference])?;

        let mut quaternions = Vec::with_capacity(n_frames);
        let mut rms = Vec::with_capacity(n_frames);
        for &frame in &self.frames.indices {
            let target = self.whole_group(reader, &group.atoms, frame)?;
            let fit = superpose(&reference, &target, &masses)?;
            quaternions.push(fit.rotation);
            rms.push(fit.rms);
        }
        Ok(RigidBodyPath {
            quaternions,
            coms,
            rms,
        })
    }
}

impl Analysis for RigidBodyTrajectory {
    type Runner = RigidBodyRunner;

    const NAME: &'static str = NAME;

    fn settings(&self) -> Vec<Setting> {
        vec![
            common::trajectory(),
            common::frames(),
            Setting::new("reference_frame", INTEGER)
                .default_value(0)
                .option("mini", 0),
            common::atom_selection(),
            common::atom_transmutation(),
            common::grouping_level("molecule"),
            common::output_files(&["HDF"]),
            common::running_mode(),
        ]
    }

    fn initialize(
        &mut self,
        config: &Configuration,
        engine: &Engine,
    ) -> Result<RigidBodyRunner, EngineError> {
        let input = config.get::<InputTrajectory>(common::TRAJECTORY_PARAM)?;
        let frames = config.get::<FrameSelection>(common::FRAMES_PARAM)?;
        let grouping = config.get::<Grouping>(common::GROUPING_PARAM)?;
        let reference = *config.get::<i64>("reference_frame")? as usize;
        if reference >= frames.number() {
            return Err(ConfigError::OutOfRange {
                name: "reference_frame",
                value: reference.to_string(),
                min: Some("0".into()),
                max: Some((frames.number() - 1).to_string()),
            }
            .into());
        }

        self.state = Some(RigidBodyState {
            time: frames.duration.clone(),
            groups: grouping.groups.iter().map(|g| g.name.clone()).collect(),
            paths: vec![None; grouping.len()],
        });
        Ok(RigidBodyRunner {
            path: input.path.clone(),
            frames: frames.clone(),
            reference,
            groups: grouping.groups.clone(),
            database: engine.atoms().clone(),
        })
    }

    fn combine(&mut self, index: usize, payload: RigidBodyPath) -> Result<(), EngineError> {
        let slot = self
            .state
            .as_mut()
            .and_then(|s| s.paths.get_mut(index))
            .ok_or_else(|| EngineError::Internal(format!("no rigid body {index}")))?;
        *slot = Some(payload);
        Ok(())
    }

    fn finalize(&mut self, status: RunStatus) -> Result<Option<OutputData>, EngineError> {
        let Some(state) = self.state.take() else {
            return Ok(None);
        };
        if status != RunStatus::Completed {
            return Ok(None);
        }
        let (n_groups, n_frames) = (state.paths.len(), state.time.len());
        let mut quaternions = Vec::with_capacity(n_groups * n_frames * 4);
        let mut coms = Vec::with_capacity(n_groups * n_frames * 3);
        let mut rms = Vec::with_capacity(n_groups * n_frames);
        for (name, path) in state.groups.iter().zip(&state.paths) {
            let path = path
                .as_ref()
                .ok_or_else(|| {
                    EngineError::Internal(format!("rigid body {name} was not computed"))
                })?;
            for q in &path.quaternions {
                quaternions.extend([q.w, q.i, q.j, q.k]);
            }
            coms.extend(path.coms.iter().flat_map(|c| [c.x, c.y, c.z]));
            rms.extend_from_slice(&path.rms);
        }

        let mut data = OutputData::new();
        data.add_line("time", state.time, "ps", &[])?;
        let axes = ["group", "time", "component"];
        data.add_array("quaternions", &[n_groups, n_frames, 4], quaternions, "au", &axes)?;
        data.add_array("coms", &[n_groups, n_frames, 3], coms, "nm", &axes)?;
        data.add_array("rms", &[n_groups, n_frames], rms, "nm", &["group", "time"])?;
        Ok(Some(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use crate::engine::configurators::{Parameters, RunningMode};
    use crate::engine::testing::{run_analysis, test_engine, water_box};

    #[test]
    fn translating_waters_do_not_rotate() {
        let dir = tempfile::tempdir().unwrap();
        let trajectory = water_box(dir.path(), 2, 4, true, false);
        let params = Parameters::from([(
            "trajectory".to_string(),
            Value::from(trajectory.to_string_lossy().to_string()),
        )]);
        let data = run_analysis(
            &mut RigidBodyTrajectory::default(),
            &test_engine(),
            &params,
            RunningMode::Multiprocessor(2),
        );

        let quaternions = data.get("quaternions").unwrap();
        assert_eq!(quaternions.shape, vec![8, 4, 4]);
        for q in quaternions.data.chunks_exact(4) {
            assert!((q[0] - 1.0).abs() < 1e-9, "{q:?}");
        }
        assert!(data.get("rms").unwrap().data.iter().all(|r| r.abs() < 1e-9));

        let coms = data.get("coms").unwrap();
        assert_eq!(coms.shape, vec![8, 4, 3]);
        // Group 0 moves by the drift of molecule 0 between frames 0 and 3.
        let start = Vector3::new(coms.data[0], coms.data[1], coms.data[2]);
        let end = Vector3::new(coms.data[9], coms.data[10], coms.data[11]);
        let expected = crate::engine::testing::drift(0, 3) - crate::engine::testing::drift(0, 0);
        assert!((end - start - expected).norm() < 1e-9);
    }

    #[test]
    fn single_atoms_keep_identity_orientation() {
        let dir = tempfile::tempdir().unwrap();
        let trajectory = water_box(dir.path(), 1, 3, false, false);
        let params = Parameters::from([
            ("trajectory".to_string(), Value::from(trajectory.to_string_lossy().to_string())),
            ("grouping_level".to_string(), Value::from("atom")),
        ]);
        let data = run_analysis(
            &mut RigidBodyTrajectory::default(),
            &test_engine(),
            &params,
            RunningMode::Monoprocessor,
        );
        let quaternions = &data.get("quaternions").unwrap().data;
        assert_eq!(quaternions.len(), 3 * 3 * 4);
        assert!(quaternions.chunks_exact(4).all(|q| q == [1.0, 0.0, 0.0, 0.0]));
    }
}
