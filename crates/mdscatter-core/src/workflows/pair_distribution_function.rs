//! Radial pair distribution function with element-resolved partials.
//!
//! Each frame histograms the minimum-image distances of every unordered atom pair into
//! the bins of `r_values`. A partial is normalized against an ideal gas of the same
//! density, `g_ab(r) = V · H_ab(r) / (F · N_ab · 4πr²dr)`, and the total is the
//! `(2 − δ_ab) f_a f_b`-weighted mean of the partials.

use super::common;
use crate::core::io::trajectory::Trajectory;
use crate::core::models::entity::GroupingLevel;
use crate::core::utils::geometry::minimum_image;
use crate::engine::config::ConfigError;
use crate::engine::configurators::scalars::RANGE;
use crate::engine::configurators::{
    Configuration, FrameSelection, Grouping, InputTrajectory, Setting, Weights,
};
use crate::engine::context::Engine;
use crate::engine::error::EngineError;
use crate::engine::job::{Analysis, RunStatus, StepRunner};
use crate::engine::output::OutputData;
use itertools::Itertools;
use std::f64::consts::PI;
use std::path::PathBuf;

pub const NAME: &str = "pair_distribution_function";

/// Histograms of one frame, one per species pair, plus the cell volume.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameHistogram {
    pub counts: Vec<Vec<f64>>,
    pub volume: f64,
}

#[derive(Debug, Default)]
pub struct PairDistributionFunction {
    state: Option<PdfState>,
}

#[derive(Debug)]
struct PdfState {
    r: Vec<f64>,
    dr: f64,
    species: Vec<String>,
    population: Vec<usize>,
    pairs: Vec<(usize, usize)>,
    factors: Vec<f64>,
    counts: Vec<Vec<f64>>,
    volume: f64,
    frames: usize,
}

pub struct PdfRunner {
    path: PathBuf,
    frames: FrameSelection,
    atoms: Vec<usize>,
    species: Vec<usize>,
    pairs: Vec<(usize, usize)>,
    r_min: f64,
    dr: f64,
    bins: usize,
}

impl PdfRunner {
    fn pair_index(&self, a: usize, b: usize) -> Option<usize> {
        let key = (a.min(b), a.max(b));
        self.pairs.iter().position(|p| *p == key)
    }
}

impl StepRunner for PdfRunner {
    type Worker = Trajectory;
    type Payload = FrameHistogram;

    fn n_steps(&self) -> usize {
        self.frames.number()
    }

    fn open_worker(&self) -> Result<Trajectory, EngineError> {
        common::open(&self.path)
    }

    fn run_step(
        &self,
        reader: &mut Trajectory,
        index: usize,
    ) -> Result<FrameHistogram, EngineError> {
        let frame = self.frames.indices[index];
        let cell = reader.unit_cell(frame)?.ok_or(EngineError::NotPeriodic(NAME))?;
        let coordinates = reader.coordinates(frame)?;
        let mut counts = vec![vec![0.0; self.bins]; self.pairs.len()];
        for (i, j) in (0..self.atoms.len()).tuple_combinations() {
            let delta = coordinates[self.atoms[j]] - coordinates[self.atoms[i]];
            let distance = minimum_image(&delta, &cell).norm();
            let bin = ((distance - self.r_min) / self.dr).floor();
            if bin < 0.0 || bin >= self.bins as f64 {
                continue;
            }
            if let Some(pair) = self.pair_index(self.species[i], self.species[j]) {
                counts[pair][bin as usize] += 1.0;
            }
        }
        Ok(FrameHistogram {
            counts,
            volume: cell.volume(),
        })
    }
}

impl Analysis for PairDistributionFunction {
    type Runner = PdfRunner;

    const NAME: &'static str = NAME;

    fn settings(&self) -> Vec<Setting> {
        vec![
            common::trajectory(),
            common::frames(),
            Setting::new("r_values", RANGE)
                .label("Distance bins (nm)")
                .default_value(vec![0.0, 1.0, 0.01])
                .option("mini", 0.0),
            common::atom_selection(),
            common::atom_transmutation(),
            common::grouping_level("atom"),
            common::weights("b_coherent"),
            common::output_files(&["HDF"]),
            common::running_mode(),
        ]
    }

    fn initialize(
        &mut self,
        config: &Configuration,
        _engine: &Engine,
    ) -> Result<PdfRunner, EngineError> {
        let input = config.get::<InputTrajectory>(common::TRAJECTORY_PARAM)?;
        if !input.periodic {
            return Err(EngineError::NotPeriodic(NAME));
        }
        let frames = config.get::<FrameSelection>(common::FRAMES_PARAM)?;
        let r_values = config.get::<Vec<f64>>("r_values")?;
        let grouping = config.get::<Grouping>(common::GROUPING_PARAM)?;
        let weights = config.get::<Weights>(common::WEIGHTS_PARAM)?;
        if grouping.level != GroupingLevel::Atom {
            return Err(ConfigError::InvalidValue {
                name: common::GROUPING_PARAM,
                reason: "distances are histogrammed between atoms".into(),
            }
            .into());
        }
        let [r_min, r_next, ..] = r_values.as_slice() else {
            return Err(ConfigError::InvalidValue {
                name: "r_values",
                reason: "at least two distances are needed".into(),
            }
            .into());
        };
        let dr = r_next - r_min;

        let species: Vec<String> = grouping.species_names().into_iter().map(String::from).collect();
        let species_of: Vec<usize> = grouping
            .species
            .iter()
            .map(|s| species.iter().position(|name| name == s).unwrap_or(0))
            .collect();
        let population: Vec<usize> = species.iter().map(|s| grouping.members(s).len()).collect();
        let pairs: Vec<(usize, usize)> = (0..species.len())
            .flat_map(|a| (a..species.len()).map(move |b| (a, b)))
            .collect();
        let factors = species.iter().map(|s| weights.factor(s)).collect();

        self.state = Some(PdfState {
            r: r_values.iter().map(|r| r + dr / 2.0).collect(),
            dr,
            species,
            population,
            pairs: pairs.clone(),
            factors,
            counts: vec![vec![0.0; r_values.len()]; pairs.len()],
            volume: 0.0,
            frames: 0,
        });
        Ok(PdfRunner {
            path: input.path.clone(),
            frames: frames.clone(),
            atoms: grouping.groups.iter().filter_map(|g| g.atoms.first().copied()).collect(),
            species: species_of,
            pairs,
            r_min: *r_min,
            dr,
            bins: r_values.len(),
        })
    }

    fn combine(&mut self, _index: usize, payload: FrameHistogram) -> Result<(), EngineError> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| EngineError::Internal("PDF combined before initialization".into()))?;
        for (sum, frame) in state.counts.iter_mut().zip(&payload.counts) {
            for (s, c) in sum.iter_mut().zip(frame) {
                *s += c;
            }
        }
        state.volume += payload.volume;
        state.frames += 1;
        Ok(())
    }

    fn finalize(&mut self, status: RunStatus) -> Result<Option<OutputData>, EngineError> {
        let Some(state) = self.state.take() else {
            return Ok(None);
        };
        if status != RunStatus::Completed || state.frames == 0 {
            return Ok(None);
        }
        let frames = state.frames as f64;
        let volume = state.volume / frames;

        let mut data = OutputData::new();
        data.add_line("r", state.r.clone(), "nm", &[])?;
        let mut total = vec![0.0; state.r.len()];
        let mut norm = 0.0;
        for (&(a, b), counts) in state.pairs.iter().zip(&state.counts) {
            let (na, nb) = (state.population[a] as f64, state.population[b] as f64);
            let n_pairs = if a == b { na * (na - 1.0) / 2.0 } else { na * nb };
            let partial: Vec<f64> = counts
                .iter()
                .zip(&state.r)
                .map(|(h, r)| {
                    let shell = 4.0 * PI * r * r * state.dr;
                    if n_pairs == 0.0 || shell == 0.0 {
                        0.0
                    } else {
                        volume * h / (frames * n_pairs * shell)
                    }
                })
                .collect();
            let weight = if a == b { 1.0 } else { 2.0 } * state.factors[a] * state.factors[b];
            for (t, g) in total.iter_mut().zip(&partial) {
                *t += weight * g;
            }
            norm += weight;
            let name = format!("pdf_{}_{}", state.species[a], state.species[b]);
            data.add_line(&name, partial, "au", &["r"])?;
        }
        if norm != 0.0 {
            total.iter_mut().for_each(|t| *t /= norm);
        }
        data.add_line("pdf_total", total, "au", &["r"])?;
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
        Parameters::from([
            ("trajectory".to_string(), Value::from(trajectory.to_string_lossy().to_string())),
            ("r_values".to_string(), Value::from(vec![0.0, 1.5, 0.05])),
        ])
    }

    #[test]
    fn lattice_peaks_sit_at_the_spacing() {
        let dir = tempfile::tempdir().unwrap();
        let trajectory = water_box(dir.path(), 3, 3, true, false);
        let data = run_analysis(
            &mut PairDistributionFunction::default(),
            &test_engine(),
            &parameters(&trajectory),
            RunningMode::Multiprocessor(2),
        );
        let r = &data.get("r").unwrap().data;
        assert_eq!(r.len(), 30);
        let oo = &data.get("pdf_O_O").unwrap().data;
        let below: f64 = r.iter().zip(oo).filter(|(r, _)| **r < 0.9).map(|(_, g)| g).sum();
        let near: f64 = r
            .iter()
            .zip(oo)
            .filter(|(r, _)| (**r - 1.0).abs() < 0.1)
            .map(|(_, g)| g)
            .sum();
        assert_eq!(below, 0.0);
        assert!(near > 0.0);

        let ho = &data.get("pdf_H_O").unwrap().data;
        assert!(r.iter().zip(ho).any(|(r, g)| *r < 0.2 && *g > 0.0));
        assert!(data.get("pdf_total").unwrap().data.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn open_boundaries_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let trajectory = water_box(dir.path(), 1, 2, false, false);
        let engine = test_engine();
        let mut pdf = PairDistributionFunction::default();
        let config = configure(&pdf, &engine, &parameters(&trajectory)).unwrap();
        assert!(matches!(pdf.initialize(&config, &engine), Err(EngineError::NotPeriodic(_))));
    }
}
