//! Voronoi tessellation of the selected atoms, frame by frame.

use super::common;
use crate::core::io::trajectory::Trajectory;
use crate::core::tessellation::voronoi_cells;
use crate::engine::configurators::scalars::{BOOLEAN, FLOAT};
use crate::engine::configurators::{
    AtomSelection, Configuration, FrameSelection, InputTrajectory, Setting,
};
use crate::engine::context::Engine;
use crate::engine::error::EngineError;
use crate::engine::job::{Analysis, RunStatus, StepRunner};
use crate::engine::output::OutputData;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const NAME: &str = "voronoi";

/// Summary of one tessellated frame.
#[derive(Debug, Clone, PartialEq)]
pub struct VoronoiFrame {
    pub total_volume: f64,
    pub neighbour_counts: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct Voronoi {
    state: Option<VoronoiState>,
}

#[derive(Debug)]
struct VoronoiState {
    time: Vec<f64>,
    atoms: usize,
    total_volume: Vec<f64>,
    histogram: BTreeMap<usize, f64>,
    frames_done: usize,
}

pub struct VoronoiRunner {
    path: PathBuf,
    frames: FrameSelection,
    atoms: Vec<usize>,
    periodic: bool,
    padding: f64,
}

impl StepRunner for VoronoiRunner {
    type Worker = Trajectory;
    type Payload = VoronoiFrame;

    fn n_steps(&self) -> usize {
        self.frames.number()
    }

    fn open_worker(&self) -> Result<Trajectory, EngineError> {
        common::open(&self.path)
    }

    fn run_step(&self, reader: &mut Trajectory, index: usize) -> Result<VoronoiFrame, EngineError> {
        let frame = self.frames.indices[index];
        let coordinates = reader.coordinates(frame)?;
        let points: Vec<_> = self.atoms.iter().map(|&i| coordinates[i]).collect();
        let cell = if self.periodic {
            let cell = reader.unit_cell(frame)?.ok_or(EngineError::NotPeriodic(NAME))?;
            if !cell.is_orthorhombic() {
                return Err(EngineError::NonOrthorhombic(NAME));
            }
            Some(cell)
        } else {
            None
        };
        let cells = voronoi_cells(&points, cell.as_ref(), self.padding)?;
        Ok(VoronoiFrame {
            total_volume: cells.iter().map(|c| c.volume).sum(),
            neighbour_counts: cells.iter().map(|c| c.neighbours.len()).collect(),
        })
    }
}

impl Analysis for Voronoi {
    type Runner = VoronoiRunner;

    const NAME: &'static str = NAME;

    fn settings(&self) -> Vec<Setting> {
        vec![
            common::trajectory(),
            common::frames(),
            common::atom_selection(),
            Setting::new("pbc", BOOLEAN)
                .label("Periodic boundary conditions")
                .default_value(true),
            Setting::new("padding", FLOAT)
                .label("Bounding box padding without periodicity (nm)")
                .default_value(0.1)
                .option("mini", 0.0),
            common::output_files(&["HDF"]),
            common::running_mode(),
        ]
    }

    fn initialize(
        &mut self,
        config: &Configuration,
        _engine: &Engine,
    ) -> Result<VoronoiRunner, EngineError> {
        let input = config.get::<InputTrajectory>(common::TRAJECTORY_PARAM)?;
        let frames = config.get::<FrameSelection>(common::FRAMES_PARAM)?;
        let selection = config.get::<AtomSelection>(common::SELECTION_PARAM)?;
        let periodic = *config.get::<bool>("pbc")?;
        if selection.is_empty() {
            return Err(EngineError::EmptySelection);
        }
        if periodic && !input.periodic {
            return Err(EngineError::NotPeriodic(NAME));
        }

        self.state = Some(VoronoiState {
            time: frames.duration.clone(),
            atoms: selection.len(),
            total_volume: vec![0.0; frames.number()],
            histogram: BTreeMap::new(),
            frames_done: 0,
        });
        Ok(VoronoiRunner {
            path: input.path.clone(),
            frames: frames.clone(),
            atoms: selection.indices.clone(),
            periodic,
            padding: *config.get::<f64>("padding")?,
        })
    }

    fn combine(&mut self, index: usize, payload: VoronoiFrame) -> Result<(), EngineError> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| EngineError::Internal("Voronoi combined before initialization".into()))?;
        let slot = state
            .total_volume
            .get_mut(index)
            .ok_or_else(|| EngineError::Internal(format!("no frame {index}")))?;
        *slot = payload.total_volume;
        for count in payload.neighbour_counts {
            *state.histogram.entry(count).or_default() += 1.0;
        }
        state.frames_done += 1;
        Ok(())
    }

    fn finalize(&mut self, status: RunStatus) -> Result<Option<OutputData>, EngineError> {
        let Some(state) = self.state.take() else {
            return Ok(None);
        };
        if status != RunStatus::Completed || state.frames_done == 0 {
            return Ok(None);
        }
        let frames = state.frames_done as f64;
        let max = state.histogram.keys().next_back().copied().unwrap_or(0);
        let histogram = (0..=max)
            .map(|k| state.histogram.get(&k).copied().unwrap_or(0.0) / frames)
            .collect();
        let mean_volume = state
            .total_volume
            .iter()
            .map(|v| v / state.atoms as f64)
            .collect();

        let mut data = OutputData::new();
        data.add_line("time", state.time, "ps", &[])?;
        data.add_line("total_volume", state.total_volume, "nm3", &["time"])?;
        data.add_line("mean_volume", mean_volume, "nm3", &["time"])?;
        data.add_line("n_neighbours", (0..=max).map(|k| k as f64).collect(), "au", &[])?;
        data.add_line("neighbour_histogram", histogram, "au", &["n_neighbours"])?;
        Ok(Some(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use crate::engine::configurators::{Parameters, RunningMode};
    use crate::engine::testing::{configure, run_analysis, test_engine, water_box};

    fn parameters(trajectory: &std::path::Path) -> Parameters {
        Parameters::from([(
            "trajectory".to_string(),
            Value::from(trajectory.to_string_lossy().to_string()),
        )])
    }

    #[test]
    fn periodic_cells_fill_the_box_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let trajectory = water_box(dir.path(), 2, 5, true, false);
        let data = run_analysis(
            &mut Voronoi::default(),
            &test_engine(),
            &parameters(&trajectory),
            RunningMode::Multiprocessor(2),
        );
        let volumes = &data.get("total_volume").unwrap().data;
        assert_eq!(volumes.len(), 5);
        for v in volumes {
            assert!((v - 8.0).abs() < 8.0 * 1e-6, "{v}");
        }
        let histogram = &data.get("neighbour_histogram").unwrap().data;
        assert!(histogram.iter().all(|h| *h >= 0.0));
        assert!((histogram.iter().sum::<f64>() - 24.0).abs() < 1e-9);
    }

    #[test]
    fn periodic_run_needs_a_periodic_trajectory() {
        let dir = tempfile::tempdir().unwrap();
        let trajectory = water_box(dir.path(), 1, 2, false, false);
        let engine = test_engine();
        let mut voronoi = Voronoi::default();
        let config = configure(&voronoi, &engine, &parameters(&trajectory)).unwrap();
        assert!(matches!(voronoi.initialize(&config, &engine), Err(EngineError::NotPeriodic(_))));

        let mut open = parameters(&trajectory);
        open.insert("pbc".to_string(), Value::from(false));
        let data = run_analysis(
            &mut Voronoi::default(),
            &engine,
            &open,
            RunningMode::Monoprocessor,
        );
        assert_eq!(data.get("mean_volume").unwrap().data.len(), 2);
    }
}
