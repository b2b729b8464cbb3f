use crate::core::atoms::{AtomsDatabase, AtomsDatabaseError};
use crate::core::io::trajectory::{Trajectory, TrajectoryError};
use crate::core::models::builder::EntityBuilder;
use crate::core::models::error::ModelError;
use crate::core::models::system::ChemicalSystem;
use crate::core::models::unit_cell::UnitCell;
use crate::core::utils::geometry::minimum_image;
use nalgebra::Vector3;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::{info, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub const DEFAULT_TOLERANCE: f64 = 0.2;
pub const DEFAULT_SAMPLED_FRAMES: usize = 3;

#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error(transparent)]
    Trajectory(#[from] TrajectoryError),
    #[error(transparent)]
    Atoms(#[from] AtomsDatabaseError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Cannot detect bonds in an empty trajectory")]
    EmptyTrajectory,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectivityOptions {
    /// Relative slack on the sum of covalent radii.
    pub tolerance: f64,
    /// Number of evenly spaced frames inspected.
    pub frames: usize,
}

impl Default for ConnectivityOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            frames: DEFAULT_SAMPLED_FRAMES,
        }
    }
}

/// Evenly spaced frame indices over `[0, length)`, first and last included.
pub fn sampled_frames(length: usize, count: usize) -> Vec<usize> {
    match (length, count) {
        (0, _) | (_, 0) => Vec::new(),
        (_, 1) => vec![0],
        _ => {
            let mut frames: Vec<usize> = (0..count)
                .map(|k| (k * (length - 1) + (count - 1) / 2) / (count - 1))
                .collect();
            frames.dedup();
            frames
        }
    }
}

/// Bonded pairs `(i, j)`, `i < j`, found in any sampled frame.
#[instrument(skip_all, name = "detect_bonds")]
pub fn detect_bonds(
    trajectory: &mut Trajectory,
    database: &AtomsDatabase,
    options: &ConnectivityOptions,
) -> Result<Vec<(usize, usize)>, ConnectivityError> {
    if trajectory.is_empty() {
        return Err(ConnectivityError::EmptyTrajectory);
    }
    let radii = trajectory
        .chemical_system()
        .atom_list()
        .iter()
        .map(|atom| database.numeric(&atom.symbol, "covalent_radius"))
        .collect::<Result<Vec<f64>, _>>()?;

    let frames = sampled_frames(trajectory.len(), options.frames);
    let mut snapshots = Vec::with_capacity(frames.len());
    for &frame in &frames {
        snapshots.push((trajectory.coordinates(frame)?, trajectory.unit_cell(frame)?));
    }

    let scale = 1.0 + options.tolerance;
    let n = radii.len();
    let bonded_to = |i: usize| -> Vec<(usize, usize)> {
        (i + 1..n)
            .filter(|&j| {
                let cutoff = (radii[i] + radii[j]) * scale;
                snapshots
                    .iter()
                    .any(|(coords, cell)| distance(&coords[i], &coords[j], cell.as_ref()) <= cutoff)
            })
            .map(|j| (i, j))
            .collect()
    };

    #[cfg(feature = "parallel")]
    let bonds: Vec<(usize, usize)> = (0..n).into_par_iter().flat_map_iter(bonded_to).collect();
    #[cfg(not(feature = "parallel"))]
    let bonds: Vec<(usize, usize)> = (0..n).flat_map(bonded_to).collect();

    info!(
        bonds = bonds.len(),
        frames = frames.len(),
        "Bond detection complete."
    );
    Ok(bonds)
}

fn distance(a: &Vector3<f64>, b: &Vector3<f64>, cell: Option<&UnitCell>) -> f64 {
    let delta = b - a;
    match cell {
        Some(cell) => minimum_image(&delta, cell).norm(),
        None => delta.norm(),
    }
}

/// Replaces the bond table of `system` with `bonds`.
pub fn apply_bonds(
    system: &mut ChemicalSystem,
    bonds: &[(usize, usize)],
) -> Result<(), ConnectivityError> {
    system.clear_bonds();
    for &(a, b) in bonds {
        system.add_bond(a, b)?;
    }
    Ok(())
}

/// Connected components of the bond graph, each sorted, ordered by their lowest atom.
pub fn connected_components(system: &ChemicalSystem) -> Vec<Vec<usize>> {
    let n = system.number_of_atoms();
    let mut seen = vec![false; n];
    let mut components = Vec::new();
    for start in 0..n {
        if seen[start] {
            continue;
        }
        seen[start] = true;
        let mut component = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            for next in system.bonded(current) {
                if !seen[next] {
                    seen[next] = true;
                    component.push(next);
                    queue.push_back(next);
                }
            }
        }
        component.sort_unstable();
        components.push(component);
    }
    components
}

/// Regroups atoms into one molecule per connected component.
///
/// Isolated atoms stay top-level atoms. Returns the new system and, for every new atom
/// index, the index it had in `system`.
pub fn rebuild_molecules(
    system: &ChemicalSystem,
) -> Result<(ChemicalSystem, Vec<usize>), ConnectivityError> {
    let components = connected_components(system);
    let mut rebuilt = ChemicalSystem::new(system.name());
    let mut permutation = Vec::with_capacity(system.number_of_atoms());
    for component in &components {
        let atoms = component
            .iter()
            .map(|&i| {
                let atom = system.atom(i)?;
                let builder = EntityBuilder::atom(&atom.symbol, &atom.name);
                Ok(if atom.ghost { builder.ghost() } else { builder })
            })
            .collect::<Result<Vec<_>, ModelError>>()?;
        let entity = match <[EntityBuilder; 1]>::try_from(atoms) {
            Ok([single]) => single,
            Err(atoms) => {
                let formula = system.formula(component);
                EntityBuilder::molecule(&formula, &formula).with_children(atoms)
            }
        };
        rebuilt.add_chemical_entity(entity)?;
        permutation.extend_from_slice(component);
    }

    let mut old_to_new = vec![0; permutation.len()];
    for (new, &old) in permutation.iter().enumerate() {
        old_to_new[old] = new;
    }
    for (a, b) in system.bond_pairs() {
        rebuilt.add_bond(old_to_new[a], old_to_new[b])?;
    }
    Ok((rebuilt, permutation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::trajectory_writer::{FrameUnits, TrajectoryWriter, TrajectoryWriterOptions};
    use crate::core::models::configuration::Configuration;
    use tempfile::tempdir;

    fn flat_system(symbols: &[&str]) -> ChemicalSystem {
        let mut system = ChemicalSystem::new("flat");
        for (i, s) in symbols.iter().enumerate() {
            system
                .add_chemical_entity(EntityBuilder::atom(s, &format!("{s}{i}")))
                .unwrap();
        }
        system
    }

    #[test]
    fn sampled_frames_are_evenly_spaced() {
        assert_eq!(sampled_frames(10, 3), [0, 5, 9]);
        assert_eq!(sampled_frames(2, 3), [0, 1]);
        assert_eq!(sampled_frames(1, 3), [0]);
        assert!(sampled_frames(0, 3).is_empty());
    }

    #[test]
    fn detects_water_bonds_across_periodic_boundary() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("w.h5");
        // O near the +x face, its hydrogens wrapped to the -x side.
        let system = flat_system(&["O", "H", "H"]);
        let mut writer =
            TrajectoryWriter::create(&path, &system, 1, TrajectoryWriterOptions::default())
                .unwrap();
        let conf = Configuration::new(
            vec![
                Vector3::new(0.98, 0.0, 0.0),
                Vector3::new(-0.96, 0.03, 0.0),
                Vector3::new(0.98, 0.0, 0.0957),
            ],
            Some(UnitCell::cubic(2.0).unwrap()),
        );
        writer.dump_configuration(&conf, 0.0, &FrameUnits::default()).unwrap();
        writer.close().unwrap();

        let mut traj = Trajectory::open(&path).unwrap();
        let db = AtomsDatabase::builtin().unwrap();
        let bonds = detect_bonds(&mut traj, &db, &ConnectivityOptions::default()).unwrap();
        assert_eq!(bonds, [(0, 1), (0, 2)]);
    }

    #[test]
    fn rebuild_molecules_groups_components_and_reports_permutation() {
        let mut system = flat_system(&["H", "O", "Ar", "H"]);
        apply_bonds(&mut system, &[(0, 1), (1, 3)]).unwrap();
        let (rebuilt, permutation) = rebuild_molecules(&system).unwrap();
        assert_eq!(permutation, [0, 1, 3, 2]);
        assert_eq!(rebuilt.top_level_entities().len(), 2);
        assert_eq!(rebuilt.unique_molecules(), ["H2O"]);
        assert_eq!(rebuilt.bond_pairs(), [(0, 1), (1, 2)]);
        assert_eq!(rebuilt.atom(3).unwrap().symbol, "Ar");
    }
}
