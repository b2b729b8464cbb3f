//! Settings and helpers shared by the built-in analyses.

use crate::core::atoms::AtomsDatabase;
use crate::core::io::trajectory::Trajectory;
use crate::core::models::configuration::VELOCITIES;
use crate::core::models::entity::AtomGroup;
use crate::core::utils::geometry::center_of_mass;
use crate::core::value::Value;
use crate::engine::configurators::input::{
    FRAMES, INPUT_FILE, OUTPUT_FILES, OUTPUT_TRAJECTORY, RUNNING_MODE,
};
use crate::engine::configurators::physics::{
    CORRELATION_WINDOW, INSTRUMENT, INSTRUMENT_RESOLUTION, INTERPOLATION_ORDER, PROJECTION,
    Q_VECTORS,
};
use crate::engine::configurators::selection::{
    ATOM_SELECTION, ATOM_TRANSMUTATION, GROUPING_LEVEL, WEIGHTS,
};
use crate::engine::configurators::{FrameSelection, Grouping, Setting, Weights};
use crate::engine::error::EngineError;
use crate::engine::output::{FormatError, OutputData};
use nalgebra::Vector3;
use std::collections::BTreeMap;
use std::path::Path;

pub const TRAJECTORY_PARAM: &str = "trajectory";
pub const FRAMES_PARAM: &str = "frames";
pub const SELECTION_PARAM: &str = "atom_selection";
pub const TRANSMUTATION_PARAM: &str = "atom_transmutation";
pub const GROUPING_PARAM: &str = "grouping_level";
pub const WEIGHTS_PARAM: &str = "weights";
pub const OUTPUT_PARAM: &str = "output_files";
pub const OUTPUT_TRAJECTORY_PARAM: &str = "output_trajectory";
pub const RUNNING_MODE_PARAM: &str = "running_mode";

pub fn trajectory() -> Setting {
    Setting::new(TRAJECTORY_PARAM, INPUT_FILE).label("Input trajectory")
}

pub fn frames() -> Setting {
    Setting::new(FRAMES_PARAM, FRAMES).depends_on("trajectory", TRAJECTORY_PARAM)
}

pub fn atom_selection() -> Setting {
    Setting::new(SELECTION_PARAM, ATOM_SELECTION).depends_on("trajectory", TRAJECTORY_PARAM)
}

pub fn atom_transmutation() -> Setting {
    Setting::new(TRANSMUTATION_PARAM, ATOM_TRANSMUTATION)
        .depends_on("trajectory", TRAJECTORY_PARAM)
        .depends_on("selection", SELECTION_PARAM)
}

pub fn grouping_level(default: &str) -> Setting {
    Setting::new(GROUPING_PARAM, GROUPING_LEVEL)
        .default_value(default)
        .depends_on("trajectory", TRAJECTORY_PARAM)
        .depends_on("selection", SELECTION_PARAM)
        .depends_on("transmutation", TRANSMUTATION_PARAM)
}

pub fn weights(default: &str) -> Setting {
    Setting::new(WEIGHTS_PARAM, WEIGHTS)
        .default_value(default)
        .depends_on("trajectory", TRAJECTORY_PARAM)
        .depends_on("grouping", GROUPING_PARAM)
        .depends_on("transmutation", TRANSMUTATION_PARAM)
}

pub fn q_vectors() -> Setting {
    Setting::new("q_vectors", Q_VECTORS).depends_on("trajectory", TRAJECTORY_PARAM)
}

pub fn instrument() -> Setting {
    Setting::new("instrument", INSTRUMENT)
}

pub fn instrument_resolution() -> Setting {
    Setting::new("instrument_resolution", INSTRUMENT_RESOLUTION)
        .depends_on("instrument", "instrument")
}

pub fn interpolation_order() -> Setting {
    Setting::new("interpolation_order", INTERPOLATION_ORDER)
        .depends_on("trajectory", TRAJECTORY_PARAM)
}

pub fn projection() -> Setting {
    Setting::new("projection", PROJECTION)
}

pub fn correlation_window() -> Setting {
    Setting::new("frames_correlation_window", CORRELATION_WINDOW)
        .depends_on("frames", FRAMES_PARAM)
}

pub fn output_files(formats: &[&str]) -> Setting {
    Setting::new(OUTPUT_PARAM, OUTPUT_FILES).option("formats", Value::from(formats.to_vec()))
}

pub fn output_trajectory() -> Setting {
    Setting::new(OUTPUT_TRAJECTORY_PARAM, OUTPUT_TRAJECTORY)
}

pub fn running_mode() -> Setting {
    Setting::new(RUNNING_MODE_PARAM, RUNNING_MODE)
}

pub(crate) fn open(path: &Path) -> Result<Trajectory, EngineError> {
    Ok(Trajectory::open(path)?)
}

/// Unwrapped path of `group` over the selected frames: the atom itself for single-atom
/// groups, the centre of mass otherwise.
pub(crate) fn group_path(
    reader: &mut Trajectory,
    group: &AtomGroup,
    database: &AtomsDatabase,
    frames: &FrameSelection,
) -> Result<Vec<Vector3<f64>>, EngineError> {
    let (first, last, step) = (frames.first, frames.last, frames.step);
    let path = match group.atoms.as_slice() {
        [atom] => reader.read_atomic_trajectory(*atom, first, last, step, true)?,
        atoms => reader.read_com_trajectory(atoms, database, first, last, step)?,
    };
    Ok(path)
}

/// Stored velocities of `group` over the selected frames, mass-weighted for multi-atom
/// groups.
pub(crate) fn group_velocities(
    reader: &mut Trajectory,
    group: &AtomGroup,
    database: &AtomsDatabase,
    frames: &FrameSelection,
) -> Result<Vec<Vector3<f64>>, EngineError> {
    let system = reader.chemical_system().clone();
    let masses = group
        .atoms
        .iter()
        .map(|&i| Ok(database.numeric(&system.atom(i)?.symbol, "mass")?))
        .collect::<Result<Vec<f64>, EngineError>>()?;
    let mut out = Vec::with_capacity(frames.number());
    for &frame in &frames.indices {
        let velocities = reader.variable(VELOCITIES, frame)?;
        let members: Vec<Vector3<f64>> = group.atoms.iter().map(|&i| velocities[i]).collect();
        out.push(center_of_mass(&members, &masses));
    }
    Ok(out)
}

/// Finite-difference velocities of a path sampled every `dt`: forward differences for
/// order 1, central differences for order 2. End points use one-sided differences.
pub(crate) fn differentiate(path: &[Vector3<f64>], dt: f64, order: i64) -> Vec<Vector3<f64>> {
    let n = path.len();
    if n < 2 {
        return vec![Vector3::zeros(); n];
    }
    (0..n)
        .map(|i| match (order, i) {
            (_, 0) => (path[1] - path[0]) / dt,
            (_, i) if i == n - 1 => (path[n - 1] - path[n - 2]) / dt,
            (1, i) => (path[i + 1] - path[i]) / dt,
            (_, i) => (path[i + 1] - path[i - 1]) / (2.0 * dt),
        })
        .collect()
}

/// Running per-species sums of equally long series, one series per group.
#[derive(Debug, Clone, Default)]
pub(crate) struct SpeciesSums {
    species: Vec<String>,
    sums: BTreeMap<String, Vec<f64>>,
    counts: BTreeMap<String, usize>,
}

impl SpeciesSums {
    pub fn new(grouping: &Grouping, len: usize) -> Self {
        let mut sums = BTreeMap::new();
        for name in grouping.species_names() {
            sums.insert(name.to_string(), vec![0.0; len]);
        }
        Self {
            species: grouping.species.clone(),
            sums,
            counts: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, group: usize, values: &[f64]) -> Result<(), EngineError> {
        let species = self
            .species
            .get(group)
            .ok_or_else(|| EngineError::Internal(format!("no group {group}")))?;
        let sum = self
            .sums
            .get_mut(species)
            .ok_or_else(|| EngineError::Internal(format!("no species {species}")))?;
        if sum.len() != values.len() {
            return Err(EngineError::Internal(format!(
                "group {group} produced {} values, expected {}",
                values.len(),
                sum.len()
            )));
        }
        for (s, v) in sum.iter_mut().zip(values) {
            *s += v;
        }
        *self.counts.entry(species.clone()).or_default() += 1;
        Ok(())
    }

    /// Per-species averages over the groups combined so far.
    pub fn means(&self) -> BTreeMap<&str, Vec<f64>> {
        self.sums
            .iter()
            .map(|(species, sum)| {
                let n = self.counts.get(species).copied().unwrap_or(0).max(1) as f64;
                (species.as_str(), sum.iter().map(|s| s / n).collect())
            })
            .collect()
    }

    /// `Σ_s factor(s) · mean_s`, point by point.
    pub fn weighted_total(&self, weights: &Weights) -> Vec<f64> {
        let means = self.means();
        let len = self.sums.values().next().map_or(0, Vec::len);
        (0..len)
            .map(|i| weights.weighted_sum(means.iter().map(|(s, m)| (*s, m[i]))))
            .collect()
    }
}

/// Adds `{prefix}_{species}` for every species and `{prefix}_total`.
pub(crate) fn add_species_lines(
    data: &mut OutputData,
    prefix: &str,
    per_species: BTreeMap<&str, Vec<f64>>,
    total: Vec<f64>,
    units: &str,
    axis: &str,
) -> Result<(), FormatError> {
    for (species, values) in per_species {
        data.add_line(&format!("{prefix}_{species}"), values, units, &[axis])?;
    }
    data.add_line(&format!("{prefix}_total"), total, units, &[axis])
}
