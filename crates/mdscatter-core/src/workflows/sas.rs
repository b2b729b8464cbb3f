//! Solvent-accessible surface.
//!
//! A probe of radius ρ rolls over spheres of radius `covalent + ρ`. Each selected atom's
//! sphere is sampled along golden-spiral directions; a sample counts when it lies outside
//! every other atom's sphere, and the atom's surface is the accessible fraction of
//! `4π(covalent + ρ)²`.

use super::common;
use crate::core::io::trajectory::Trajectory;
use crate::core::models::unit_cell::UnitCell;
use crate::core::utils::geometry::{golden_spiral, minimum_image};
use crate::engine::configurators::scalars::{FLOAT, INTEGER};
use crate::engine::configurators::{
    AtomSelection, Configuration, FrameSelection, InputTrajectory, Setting,
};
use crate::engine::context::Engine;
use crate::engine::error::EngineError;
use crate::engine::job::{Analysis, RunStatus, StepRunner};
use crate::engine::output::OutputData;
use nalgebra::Vector3;
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::path::PathBuf;

pub const NAME: &str = "sas";

/// Accessible surface of each atom in `targets`.
///
/// `radii` are the probe-inflated radii of all atoms in `positions`.
pub fn accessible_surface(
    positions: &[Vector3<f64>],
    radii: &[f64],
    targets: &[usize],
    directions: &[Vector3<f64>],
    cell: Option<&UnitCell>,
) -> Vec<f64> {
    let delta = |from: usize, to: usize| {
        let d = positions[to] - positions[from];
        match cell {
            Some(cell) => minimum_image(&d, cell),
            None => d,
        }
    };
    targets
        .iter()
        .map(|&i| {
            let neighbours: Vec<(Vector3<f64>, f64)> = (0..positions.len())
                .filter(|&j| j != i)
                .map(|j| (delta(i, j), radii[j]))
                .filter(|(d, r)| d.norm() < radii[i] + r)
                .collect();
            let accessible = directions
                .iter()
                .filter(|u| {
                    let sample = *u * radii[i];
                    neighbours.iter().all(|(d, r)| (sample - d).norm_squared() >= r * r)
                })
                .count();
            accessible as f64 / directions.len() as f64 * 4.0 * PI * radii[i] * radii[i]
        })
        .collect()
}

/// Per-frame total and per-element surfaces.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSurface {
    pub total: f64,
    pub by_element: BTreeMap<String, f64>,
}

#[derive(Debug, Default)]
pub struct Sas {
    state: Option<SasState>,
}

#[derive(Debug)]
struct SasState {
    time: Vec<f64>,
    total: Vec<f64>,
    by_element: BTreeMap<String, Vec<f64>>,
}

pub struct SasRunner {
    path: PathBuf,
    frames: FrameSelection,
    targets: Vec<usize>,
    elements: Vec<String>,
    radii: Vec<f64>,
    directions: Vec<Vector3<f64>>,
}

impl StepRunner for SasRunner {
    type Worker = Trajectory;
    type Payload = FrameSurface;

    fn n_steps(&self) -> usize {
        self.frames.number()
    }

    fn open_worker(&self) -> Result<Trajectory, EngineError> {
        common::open(&self.path)
    }

    fn run_step(&self, reader: &mut Trajectory, index: usize) -> Result<FrameSurface, EngineError> {
        let frame = self.frames.indices[index];
        let positions = reader.coordinates(frame)?;
        let cell = reader.unit_cell(frame)?;
        let surfaces = accessible_surface(
            &positions,
            &self.radii,
            &self.targets,
            &self.directions,
            cell.as_ref(),
        );
        let mut by_element: BTreeMap<String, f64> = BTreeMap::new();
        for (element, surface) in self.elements.iter().zip(&surfaces) {
            *by_element.entry(element.clone()).or_default() += surface;
        }
        Ok(FrameSurface {
            total: surfaces.iter().sum(),
            by_element,
        })
    }
}

impl Analysis for Sas {
    type Runner = SasRunner;

    const NAME: &'static str = NAME;

    fn settings(&self) -> Vec<Setting> {
        vec![
            common::trajectory(),
            common::frames(),
            common::atom_selection(),
            Setting::new("n_sphere_points", INTEGER)
                .label("Samples per atom sphere")
                .default_value(1000)
                .option("mini", 1),
            Setting::new("probe_radius", FLOAT)
                .label("Probe radius (nm)")
                .default_value(0.14)
                .option("mini", 0.0),
            common::output_files(&["HDF"]),
            common::running_mode(),
        ]
    }

    fn initialize(
        &mut self,
        config: &Configuration,
        engine: &Engine,
    ) -> Result<SasRunner, EngineError> {
        let input = config.get::<InputTrajectory>(common::TRAJECTORY_PARAM)?;
        let frames = config.get::<FrameSelection>(common::FRAMES_PARAM)?;
        let selection = config.get::<AtomSelection>(common::SELECTION_PARAM)?;
        let samples = *config.get::<i64>("n_sphere_points")? as usize;
        let probe = *config.get::<f64>("probe_radius")?;
        if selection.is_empty() {
            return Err(EngineError::EmptySelection);
        }

        let atoms = input.system.atom_list();
        let radii = atoms
            .iter()
            .map(|atom| Ok(engine.atoms().numeric(&atom.symbol, "covalent_radius")? + probe))
            .collect::<Result<Vec<f64>, EngineError>>()?;
        let elements: Vec<String> = selection
            .indices
            .iter()
            .map(|&i| Ok(input.system.atom(i)?.symbol.clone()))
            .collect::<Result<_, EngineError>>()?;

        let mut by_element = BTreeMap::new();
        for element in &elements {
            by_element
                .entry(element.clone())
                .or_insert_with(|| vec![0.0; frames.number()]);
        }
        self.state = Some(SasState {
            time: frames.duration.clone(),
            total: vec![0.0; frames.number()],
            by_element,
        });
        Ok(SasRunner {
            path: input.path.clone(),
            frames: frames.clone(),
            targets: selection.indices.clone(),
            elements,
            radii,
            directions: golden_spiral(samples),
        })
    }

    fn combine(&mut self, index: usize, payload: FrameSurface) -> Result<(), EngineError> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| EngineError::Internal("SAS combined before initialization".into()))?;
        let slot = state
            .total
            .get_mut(index)
            .ok_or_else(|| EngineError::Internal(format!("no frame {index}")))?;
        *slot = payload.total;
        for (element, surface) in payload.by_element {
            if let Some(series) = state.by_element.get_mut(&element) {
                series[index] = surface;
            }
        }
        Ok(())
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
        common::add_species_lines(
            &mut data,
            "sas",
            state.by_element.iter().map(|(e, s)| (e.as_str(), s.clone())).collect(),
            state.total,
            "nm2",
            "time",
        )?;
        Ok(Some(data))
    }
}
