#![allow(dead_code)]

use mdscatter::core::io::store::StoreReader;
use mdscatter::core::io::trajectory_writer::{FrameUnits, TrajectoryWriter, TrajectoryWriterOptions};
use mdscatter::core::models::builder::EntityBuilder;
use mdscatter::core::models::configuration::Configuration;
use mdscatter::core::models::system::ChemicalSystem;
use mdscatter::core::models::unit_cell::UnitCell;
use mdscatter::core::value::Value;
use mdscatter::engine::configurators::Parameters;
use mdscatter::engine::progress::StatusReporter;
use mdscatter::engine::Engine;
use mdscatter::workflows;
use nalgebra::Vector3;
use std::path::{Path, PathBuf};

pub const BOX: f64 = 10.0;
pub const N_SIDE: usize = 2;
pub const N_WATERS: usize = N_SIDE * N_SIDE * N_SIDE;
pub const N_ATOMS: usize = 3 * N_WATERS;
pub const TIME_STEP: f64 = 0.5;

/// Constant velocity of water `m`, a few 1e-4 nm per frame.
fn velocity(m: usize) -> Vector3<f64> {
    let m = m as f64;
    Vector3::new(1.0 + 0.1 * m, 0.5 - 0.05 * m, 0.2 + 0.02 * m) * 1e-4
}

/// Rigid waters on a coarse grid in a [`BOX`] nm cube, each moving in a straight line.
pub fn water_positions(frame: usize) -> Vec<Vector3<f64>> {
    let bent = 104.5f64.to_radians();
    let h1 = Vector3::new(0.1, 0.0, 0.0);
    let h2 = Vector3::new(0.1 * bent.cos(), 0.1 * bent.sin(), 0.0);
    let spacing = BOX / N_SIDE as f64;
    let mut positions = Vec::with_capacity(N_ATOMS);
    let mut m = 0;
    for i in 0..N_SIDE {
        for j in 0..N_SIDE {
            for k in 0..N_SIDE {
                let centre = Vector3::new(i as f64, j as f64, k as f64).add_scalar(0.5) * spacing
                    + velocity(m) * frame as f64;
                positions.extend([centre, centre + h1, centre + h2]);
                m += 1;
            }
        }
    }
    positions
}

/// Eight waters, either as molecules or as loose atoms in the same order.
pub fn water_system(loose: bool) -> ChemicalSystem {
    let mut system = ChemicalSystem::new("waterbox");
    for m in 0..N_WATERS {
        let atoms = [
            EntityBuilder::atom("O", "OW"),
            EntityBuilder::atom("H", "HW1"),
            EntityBuilder::atom("H", "HW2"),
        ];
        if loose {
            for atom in atoms {
                system.add_chemical_entity(atom).unwrap();
            }
        } else {
            let water =
                EntityBuilder::molecule(&format!("WAT{}", m + 1), "WAT").with_children(atoms);
            system.add_chemical_entity(water).unwrap();
        }
    }
    system
}

/// Writes `n_frames` frames of the periodic water box to `dir/name`.
pub fn write_water_box(dir: &Path, name: &str, n_frames: usize, loose: bool) -> PathBuf {
    let path = dir.join(name);
    let system = water_system(loose);
    let mut writer =
        TrajectoryWriter::create(&path, &system, n_frames, TrajectoryWriterOptions::default())
            .unwrap();
    for f in 0..n_frames {
        let frame = Configuration::new(water_positions(f), Some(UnitCell::cubic(BOX).unwrap()));
        writer
            .dump_configuration(&frame, f as f64 * TIME_STEP, &FrameUnits::default())
            .unwrap();
    }
    writer.close().unwrap();
    path
}

pub fn engine() -> Engine {
    workflows::default_engine().unwrap()
}

pub fn parameters(trajectory: &Path, root: &Path, extra: Vec<(&str, Value)>) -> Parameters {
    let mut parameters = Parameters::from([
        ("trajectory".to_string(), Value::from(trajectory.to_string_lossy().to_string())),
        (
            "output_files".to_string(),
            Value::from([
                ("root", Value::from(root.to_string_lossy().to_string())),
                ("formats", Value::from(vec!["HDF"])),
            ]),
        ),
    ]);
    for (name, value) in extra {
        parameters.insert(name.to_string(), value);
    }
    parameters
}

/// Runs job `name` to completion and opens its store output.
pub fn run_to_store(engine: &Engine, name: &str, parameters: &Parameters) -> StoreReader {
    let report = engine
        .run_job(name, parameters, &StatusReporter::new())
        .unwrap()
        .into_result()
        .unwrap();
    let store = report
        .files
        .iter()
        .find(|f| f.extension().is_some_and(|e| e == "h5"))
        .unwrap();
    StoreReader::open(store).unwrap()
}
