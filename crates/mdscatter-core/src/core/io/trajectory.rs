use super::codec::CodecError;
use super::store::{StoreError, StoreReader};
use crate::core::atoms::{AtomsDatabase, AtomsDatabaseError};
use crate::core::models::configuration::{COORDINATES, Configuration};
use crate::core::models::error::ModelError;
use crate::core::models::system::ChemicalSystem;
use crate::core::models::unit_cell::UnitCell;
use crate::core::utils::geometry::{center_of_mass, minimum_image};
use crate::core::utils::units::UnitsError;
use nalgebra::Vector3;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub const CONFIGURATION_GROUP: &str = "configuration";
pub const METADATA_GROUP: &str = "metadata";
pub const UNIT_CELL: &str = "unit_cell";
pub const TIME: &str = "time";

#[derive(Debug, Error)]
pub enum TrajectoryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Units(#[from] UnitsError),
    #[error(transparent)]
    Atoms(#[from] AtomsDatabaseError),
    #[error("Frame {index} is out of range for a trajectory of {length} frames")]
    InvalidFrame { index: usize, length: usize },
    #[error("Trajectory does not store the variable '{0}'")]
    MissingVariable(String),
    #[error("Incompatible chemical system: expected {expected} atoms, found {found}")]
    IncompatibleChemicalSystem { expected: usize, found: usize },
    #[error("Invalid frame range {first}..{last} step {step} for {length} frames")]
    InvalidRange {
        first: usize,
        last: usize,
        step: usize,
        length: usize,
    },
    #[error("Frame {index} breaks the periodicity established by the first frame")]
    InconsistentPeriodicity { index: usize },
    #[error("Atom selection is empty")]
    EmptySelection,
}

/// Random-access reader over a trajectory store.
///
/// The chemical system and time axis are loaded once at open and shared between handles
/// created by [`Trajectory::reopen`]. Every frame read copies its arrays out of the store.
#[derive(Debug)]
pub struct Trajectory {
    store: StoreReader,
    system: Arc<ChemicalSystem>,
    time: Arc<Vec<f64>>,
    variables: Arc<Vec<String>>,
    length: usize,
    periodic: bool,
}

impl Trajectory {
    pub fn open(path: &Path) -> Result<Self, TrajectoryError> {
        let mut store = StoreReader::open(path)?;
        let system = ChemicalSystem::load(&mut store)?;

        let coordinates = store.dataset(&variable_path(COORDINATES))?.clone();
        let found = coordinates.row_len() / 3;
        if coordinates.row_len() % 3 != 0 || found != system.number_of_atoms() {
            return Err(TrajectoryError::IncompatibleChemicalSystem {
                expected: system.number_of_atoms(),
                found,
            });
        }
        let length = coordinates.rows();

        let time_path = variable_path(TIME);
        let time = if store.has_dataset(&time_path) {
            store.read_f64(&time_path)?
        } else {
            (0..length).map(|i| i as f64).collect()
        };
        check_time_axis(path, &time, length)?;
        let periodic = store.has_dataset(&variable_path(UNIT_CELL));
        let variables: Vec<String> = store
            .datasets_in(CONFIGURATION_GROUP)
            .into_iter()
            .filter(|name| ![COORDINATES, UNIT_CELL, TIME].contains(name))
            .map(str::to_string)
            .collect();

        Ok(Self {
            store,
            system: Arc::new(system),
            time: Arc::new(time),
            variables: Arc::new(variables),
            length,
            periodic,
        })
    }

    /// An independent read handle over the same file.
    pub fn reopen(&self) -> Result<Self, TrajectoryError> {
        Ok(Self {
            store: self.store.reopen()?,
            system: Arc::clone(&self.system),
            time: Arc::clone(&self.time),
            variables: Arc::clone(&self.variables),
            length: self.length,
            periodic: self.periodic,
        })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn n_atoms(&self) -> usize {
        self.system.number_of_atoms()
    }

    pub fn chemical_system(&self) -> &Arc<ChemicalSystem> {
        &self.system
    }

    pub fn is_periodic(&self) -> bool {
        self.periodic
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Spacing of the first two frames, or 1 ps for single-frame trajectories.
    pub fn time_step(&self) -> f64 {
        match self.time.as_slice() {
            [t0, t1, ..] => t1 - t0,
            _ => 1.0,
        }
    }

    /// Per-frame arrays stored besides coordinates, e.g. `velocities`.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn has_variable(&self, name: &str) -> bool {
        name == COORDINATES || self.variables.iter().any(|v| v == name)
    }

    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.store
            .group_attributes(METADATA_GROUP)
            .cloned()
            .unwrap_or_default()
    }

    fn check_frame(&self, index: usize) -> Result<(), TrajectoryError> {
        if index >= self.length {
            return Err(TrajectoryError::InvalidFrame {
                index,
                length: self.length,
            });
        }
        Ok(())
    }

    pub fn coordinates(&mut self, index: usize) -> Result<Vec<Vector3<f64>>, TrajectoryError> {
        self.variable(COORDINATES, index)
    }

    pub fn variable(
        &mut self,
        name: &str,
        index: usize,
    ) -> Result<Vec<Vector3<f64>>, TrajectoryError> {
        self.check_frame(index)?;
        if !self.has_variable(name) {
            return Err(TrajectoryError::MissingVariable(name.to_string()));
        }
        let flat = self.store.read_f64_rows(&variable_path(name), index, 1)?;
        Ok(flat
            .chunks_exact(3)
            .map(|c| Vector3::new(c[0], c[1], c[2]))
            .collect())
    }

    pub fn unit_cell(&mut self, index: usize) -> Result<Option<UnitCell>, TrajectoryError> {
        self.check_frame(index)?;
        if !self.periodic {
            return Ok(None);
        }
        let flat = self.store.read_f64_rows(&variable_path(UNIT_CELL), index, 1)?;
        Ok(Some(UnitCell::from_row_slice(&flat)?))
    }

    pub fn configuration(&mut self, index: usize) -> Result<Configuration, TrajectoryError> {
        let cell = self.unit_cell(index)?;
        let mut conf = Configuration::new(self.coordinates(index)?, cell);
        for name in self.variables.clone().iter() {
            let data = self.variable(name, index)?;
            conf.set_variable(name, data)?;
        }
        Ok(conf)
    }

    /// Frame indices `first, first + step, …` below `last`.
    pub fn frame_indices(
        &self,
        first: usize,
        last: usize,
        step: usize,
    ) -> Result<Vec<usize>, TrajectoryError> {
        if step == 0 || first >= last || last > self.length {
            return Err(TrajectoryError::InvalidRange {
                first,
                last,
                step,
                length: self.length,
            });
        }
        Ok((first..last).step_by(step).collect())
    }

    /// Mass-weighted centre-of-mass trajectory of `atoms`.
    ///
    /// With periodic cells the atoms are gathered around the first one by nearest image
    /// before averaging, and successive centres are unwrapped so the path has no jumps.
    pub fn read_com_trajectory(
        &mut self,
        atoms: &[usize],
        database: &AtomsDatabase,
        first: usize,
        last: usize,
        step: usize,
    ) -> Result<Vec<Vector3<f64>>, TrajectoryError> {
        let Some(&anchor) = atoms.first() else {
            return Err(TrajectoryError::EmptySelection);
        };
        let masses = atoms
            .iter()
            .map(|&i| {
                let atom = self.system.atom(i)?;
                Ok(database.numeric(&atom.symbol, "mass")?)
            })
            .collect::<Result<Vec<f64>, TrajectoryError>>()?;

        let mut out: Vec<Vector3<f64>> = Vec::new();
        for frame in self.frame_indices(first, last, step)? {
            let coords = self.coordinates(frame)?;
            let cell = self.unit_cell(frame)?;
            let positions: Vec<Vector3<f64>> = match &cell {
                Some(cell) => atoms
                    .iter()
                    .map(|&i| coords[anchor] + minimum_image(&(coords[i] - coords[anchor]), cell))
                    .collect(),
                None => atoms.iter().map(|&i| coords[i]).collect(),
            };
            let com = center_of_mass(&positions, &masses);
            out.push(unwrap_step(out.last(), com, cell.as_ref()));
        }
        Ok(out)
    }

    /// Path of a single atom, optionally unwrapped across periodic boundaries.
    pub fn read_atomic_trajectory(
        &mut self,
        atom: usize,
        first: usize,
        last: usize,
        step: usize,
        unwrap: bool,
    ) -> Result<Vec<Vector3<f64>>, TrajectoryError> {
        self.system.atom(atom)?;
        let mut out: Vec<Vector3<f64>> = Vec::new();
        for frame in self.frame_indices(first, last, step)? {
            let position = self.coordinates(frame)?[atom];
            let cell = if unwrap { self.unit_cell(frame)? } else { None };
            out.push(unwrap_step(out.last(), position, cell.as_ref()));
        }
        Ok(out)
    }
}

fn unwrap_step(
    previous: Option<&Vector3<f64>>,
    current: Vector3<f64>,
    cell: Option<&UnitCell>,
) -> Vector3<f64> {
    match (previous, cell) {
        (Some(prev), Some(cell)) => prev + minimum_image(&(current - prev), cell),
        _ => current,
    }
}

/// The time axis must hold one value per frame, in non-decreasing order.
fn check_time_axis(path: &Path, time: &[f64], length: usize) -> Result<(), StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.to_string_lossy().to_string(),
        reason,
    };
    if time.len() != length {
        return Err(corrupt(format!(
            "time axis holds {} values for {length} frames",
            time.len()
        )));
    }
    if let Some(i) = time
        .windows(2)
        .position(|w| w[1].partial_cmp(&w[0]).is_none_or(|o| o.is_lt()))
    {
        return Err(corrupt(format!(
            "time decreases between frames {i} and {}",
            i + 1
        )));
    }
    Ok(())
}

pub fn variable_path(name: &str) -> String {
    format!("{CONFIGURATION_GROUP}/{name}")
}
