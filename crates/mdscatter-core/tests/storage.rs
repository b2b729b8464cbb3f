mod common;

use mdscatter::core::io::trajectory::Trajectory;
use mdscatter::core::io::trajectory_writer::{
    FrameUnits, Precision, TrajectoryWriter, TrajectoryWriterOptions,
};
use mdscatter::core::models::configuration::Configuration;
use mdscatter::core::models::unit_cell::UnitCell;
use mdscatter::core::qvectors;
use mdscatter::core::value::Value;
use nalgebra::{Matrix3, Vector3};

fn frames() -> Vec<(Vec<Vector3<f64>>, UnitCell)> {
    (0..3)
        .map(|f| {
            let positions = common::water_positions(f)
                .into_iter()
                .map(|r| r + Vector3::new(1.0 / 3.0, 0.1 * f as f64, std::f64::consts::PI / 100.0))
                .collect();
            let side = 10.0 + 0.01 * f as f64;
            let cell = UnitCell::new(Matrix3::new(
                side, 0.0, 0.0, 0.1, side, 0.0, 0.0, 0.2, side,
            ))
            .unwrap();
            (positions, cell)
        })
        .collect()
}

fn write(path: &std::path::Path, precision: Precision) {
    let system = common::water_system(false);
    let options = TrajectoryWriterOptions {
        precision,
        ..TrajectoryWriterOptions::default()
    };
    let mut writer = TrajectoryWriter::create(path, &system, 3, options).unwrap();
    for (f, (positions, cell)) in frames().into_iter().enumerate() {
        let frame = Configuration::new(positions, Some(cell));
        writer.dump_configuration(&frame, 0.25 * f as f64, &FrameUnits::default()).unwrap();
    }
    writer.close().unwrap();
}

#[test]
fn double_precision_round_trip_is_exact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f64.mdt");
    write(&path, Precision::F64);

    let mut trajectory = Trajectory::open(&path).unwrap();
    assert_eq!(trajectory.len(), 3);
    assert_eq!(trajectory.n_atoms(), common::N_ATOMS);
    assert_eq!(trajectory.time(), [0.0, 0.25, 0.5]);
    for (f, (positions, cell)) in frames().into_iter().enumerate() {
        assert_eq!(trajectory.coordinates(f).unwrap(), positions);
        assert_eq!(trajectory.unit_cell(f).unwrap().unwrap().direct(), cell.direct());
    }
}

#[test]
fn single_precision_round_trip_is_within_one_ulp() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f32.mdt");
    write(&path, Precision::F32);

    let mut trajectory = Trajectory::open(&path).unwrap();
    for (f, (positions, _)) in frames().into_iter().enumerate() {
        let read = trajectory.coordinates(f).unwrap();
        for (a, b) in read.iter().zip(&positions) {
            for k in 0..3 {
                let expected = b[k] as f32;
                let got = a[k] as f32;
                assert!(
                    (got.to_bits() as i64 - expected.to_bits() as i64).abs() <= 1,
                    "{got} vs {expected}"
                );
            }
        }
    }
}

#[test]
fn chemical_system_survives_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("system.mdt");
    write(&path, Precision::F64);

    let original = common::water_system(false);
    let trajectory = Trajectory::open(&path).unwrap();
    let loaded = trajectory.chemical_system();
    assert_eq!(loaded.number_of_atoms(), original.number_of_atoms());
    for (a, b) in loaded.atom_list().iter().zip(original.atom_list()) {
        assert_eq!((a.index, &a.name, &a.symbol), (b.index, &b.name, &b.symbol));
    }
    assert_eq!(loaded.unique_molecules(), original.unique_molecules());
}

#[test]
fn linear_lattice_shell_holds_unit_multiples_of_the_axis() {
    let parameters = Value::from([
        ("shells", Value::from(vec![0.0, 5.0, 0.5])),
        ("n_vectors", Value::from(10)),
        ("width", Value::from(0.1)),
        ("axis", Value::from(vec![1i64, 0, 0])),
        ("seed", Value::from(0)),
    ]);
    let cell = UnitCell::cubic(1.0).unwrap();
    let shells = qvectors::create("linear_lattice", &parameters)
        .unwrap()
        .generate(Some(&cell))
        .unwrap();
    let unit = shells.iter().find(|s| (s.q - 1.0).abs() < 1e-12).unwrap();
    assert!(!unit.is_empty());
    for v in &unit.vectors {
        assert!((0.95..=1.05).contains(&v.x.abs()), "{v:?}");
        assert_eq!((v.y, v.z), (0.0, 0.0));
    }

    let again = qvectors::create("LINEAR_LATTICE", &parameters)
        .unwrap()
        .generate(Some(&cell))
        .unwrap();
    assert_eq!(shells, again);
}
