//! Rebuilds the chemistry of a trajectory from its bond connectivity.
//!
//! Bonds are detected on a few sampled frames, every connected component becomes one
//! molecule named after its Hill formula, and the selected frames are rewritten with the
//! atoms renumbered molecule by molecule and each molecule made whole in the primary cell.

use super::common;
use crate::core::connectivity::{self, ConnectivityOptions};
use crate::core::io::trajectory::Trajectory;
use crate::core::io::trajectory_writer::{FrameUnits, TrajectoryWriter};
use crate::core::models::configuration::{COORDINATES, Configuration as Frame};
use crate::core::models::system::ChemicalSystem;
use crate::engine::configurators::scalars::{FLOAT, INTEGER};
use crate::engine::configurators::{
    Configuration, FrameSelection, InputTrajectory, OutputTrajectory, Setting,
};
use crate::engine::context::Engine;
use crate::engine::error::EngineError;
use crate::engine::job::{Analysis, RunStatus, StepRunner};
use crate::engine::output::OutputData;
use nalgebra::Vector3;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub const NAME: &str = "molecule_finder";

#[derive(Default)]
pub struct MoleculeFinder {
    writer: Option<TrajectoryWriter>,
    units: FrameUnits,
}

impl std::fmt::Debug for MoleculeFinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoleculeFinder")
            .field("open", &self.writer.is_some())
            .finish()
    }
}

pub struct MoleculeFinderRunner {
    path: PathBuf,
    frames: FrameSelection,
    system: Arc<ChemicalSystem>,
    /// Old atom index of every new atom.
    permutation: Vec<usize>,
}

/// `frame` with its atoms reordered by `permutation`.
fn permute(frame: &Frame, permutation: &[usize]) -> Result<Frame, EngineError> {
    let pick = |rows: &[Vector3<f64>]| -> Vec<Vector3<f64>> {
        permutation.iter().map(|&old| rows[old]).collect()
    };
    let mut out = Frame::new(pick(frame.coordinates()), frame.unit_cell().cloned());
    for name in frame.variable_names() {
        if name == COORDINATES {
            continue;
        }
        out.set_variable(name, pick(frame.variable(name)?))?;
    }
    Ok(out)
}

impl StepRunner for MoleculeFinderRunner {
    type Worker = Trajectory;
    type Payload = (f64, Frame);

    fn n_steps(&self) -> usize {
        self.frames.number()
    }

    fn open_worker(&self) -> Result<Trajectory, EngineError> {
        common::open(&self.path)
    }

    fn run_step(&self, reader: &mut Trajectory, index: usize) -> Result<(f64, Frame), EngineError> {
        let source = reader.configuration(self.frames.indices[index])?;
        let permuted = permute(&source, &self.permutation)?;
        let mut whole = permuted.contiguous_configuration(&self.system)?;
        whole.set_unit_cell(permuted.unit_cell().cloned());
        Ok((self.frames.time[index], whole))
    }
}

impl Analysis for MoleculeFinder {
    type Runner = MoleculeFinderRunner;

    const NAME: &'static str = NAME;

    fn settings(&self) -> Vec<Setting> {
        vec![
            common::trajectory(),
            common::frames(),
            Setting::new("tolerance", FLOAT)
                .label("Bond tolerance on the covalent radii sum")
                .default_value(connectivity::DEFAULT_TOLERANCE)
                .option("mini", 0.0),
            Setting::new("bond_frames", INTEGER)
                .label("Frames inspected for bonds")
                .default_value(connectivity::DEFAULT_SAMPLED_FRAMES as i64)
                .option("mini", 1),
            common::output_trajectory(),
            common::running_mode(),
        ]
    }

    fn initialize(
        &mut self,
        config: &Configuration,
        engine: &Engine,
    ) -> Result<MoleculeFinderRunner, EngineError> {
        let input = config.get::<InputTrajectory>(common::TRAJECTORY_PARAM)?;
        let frames = config.get::<FrameSelection>(common::FRAMES_PARAM)?;
        let output = config.get::<OutputTrajectory>(common::OUTPUT_TRAJECTORY_PARAM)?;
        let options = ConnectivityOptions {
            tolerance: *config.get::<f64>("tolerance")?,
            frames: *config.get::<i64>("bond_frames")? as usize,
        };

        let mut reader = input.reader()?;
        let bonds = connectivity::detect_bonds(&mut reader, engine.atoms(), &options)?;
        let mut bonded = (*input.system).clone();
        connectivity::apply_bonds(&mut bonded, &bonds)?;
        let (system, permutation) = connectivity::rebuild_molecules(&bonded)?;
        info!(
            bonds = bonds.len(),
            molecules = system.unique_molecules().len(),
            "Chemistry rebuilt."
        );

        let mut writer = TrajectoryWriter::create(
            &output.path,
            &system,
            frames.number(),
            output.writer_options(None),
        )?;
        writer.set_metadata("header", &config.header(NAME));
        self.writer = Some(writer);
        Ok(MoleculeFinderRunner {
            path: input.path.clone(),
            frames: frames.clone(),
            system: Arc::new(system),
            permutation,
        })
    }

    fn combine(&mut self, _index: usize, (time, frame): (f64, Frame)) -> Result<(), EngineError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| EngineError::Internal("molecule finder has no open writer".into()))?;
        writer.dump_configuration(&frame, time, &self.units)?;
        Ok(())
    }

    fn finalize(&mut self, _status: RunStatus) -> Result<Option<OutputData>, EngineError> {
        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }
        Ok(None)
    }

    fn requires_ordered_combine(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::trajectory_writer::TrajectoryWriterOptions;
    use crate::core::models::builder::EntityBuilder;
    use crate::core::models::entity::EntityKind;
    use crate::core::models::unit_cell::UnitCell;
    use crate::core::value::Value;
    use crate::engine::configurators::{Parameters, RunningMode};
    use crate::engine::testing::{run_finalized, test_engine, water_positions};

    /// Waters stored as loose atoms: all oxygens first, then all hydrogens.
    fn scrambled_water(dir: &std::path::Path, n_side: usize, n_frames: usize) -> PathBuf {
        let n = n_side.pow(3);
        let mut system = ChemicalSystem::new("loose");
        for i in 0..n {
            system.add_chemical_entity(EntityBuilder::atom("O", &format!("O{i}"))).unwrap();
        }
        for i in 0..2 * n {
            system.add_chemical_entity(EntityBuilder::atom("H", &format!("H{i}"))).unwrap();
        }
        let path = dir.join("loose.mdt");
        let mut writer =
            TrajectoryWriter::create(&path, &system, n_frames, TrajectoryWriterOptions::default())
                .unwrap();
        for f in 0..n_frames {
            let shift = Vector3::new(-0.55, 0.0, 0.0);
            let waters: Vec<_> =
                water_positions(n_side, f).into_iter().map(|r| r + shift).collect();
            let mut positions: Vec<_> = waters.iter().step_by(3).copied().collect();
            for m in 0..n {
                positions.extend([waters[3 * m + 1], waters[3 * m + 2]]);
            }
            // Oxygens at x = -0.05 fold to the far side of the cell, away from their hydrogens.
            let cell = UnitCell::cubic(n_side as f64).unwrap();
            let mut frame = Frame::new(positions, Some(cell));
            frame.fold_coordinates().unwrap();
            writer.dump_configuration(&frame, 0.1 * f as f64, &FrameUnits::default()).unwrap();
        }
        writer.close().unwrap();
        path
    }

    #[test]
    fn loose_atoms_become_whole_waters() {
        let dir = tempfile::tempdir().unwrap();
        let input = scrambled_water(dir.path(), 2, 3);
        let output = dir.path().join("molecules.mdt");
        let params = Parameters::from([
            ("trajectory".to_string(), Value::from(input.to_string_lossy().to_string())),
            ("output_trajectory".to_string(), Value::from(output.to_string_lossy().to_string())),
        ]);
        let mut finder = MoleculeFinder::default();
        run_finalized(&mut finder, &test_engine(), &params, RunningMode::Multiprocessor(2));

        let mut rebuilt = Trajectory::open(&output).unwrap();
        assert_eq!(rebuilt.len(), 3);
        let system = rebuilt.chemical_system().clone();
        assert_eq!(system.unique_molecules(), ["H2O"]);
        let molecules: Vec<_> = system
            .top_level_entities()
            .iter()
            .filter(|&&id| system.entity(id).unwrap().kind == EntityKind::Molecule)
            .collect();
        assert_eq!(molecules.len() * 3, system.number_of_atoms());
        for &&id in &molecules {
            let atoms = system.atoms_of(id);
            assert_eq!(atoms.len(), 3);
            assert_eq!(system.formula(&atoms), "H2O");
        }

        let coordinates = rebuilt.coordinates(1).unwrap();
        for &&id in &molecules {
            let atoms = system.atoms_of(id);
            for &h in &atoms[1..] {
                assert!((coordinates[h] - coordinates[atoms[0]]).norm() < 0.2);
            }
        }
    }
}
