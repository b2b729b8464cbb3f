//! Vibrational density of states from the velocity autocorrelation function.
//!
//! Velocities come from the trajectory (`interpolation_order = 0`) or from finite
//! differences of the unwrapped paths. The VACF of every group is averaged per species,
//! multiplied by the instrument's time window and cosine-transformed:
//!
//! `DOS(ω_k) = dt / 2π · (C₀W₀ + 2 Σ_{τ≥1} C_τ W_τ cos(ω_k τ dt))`, `ω_k = πk / (N dt)`.

use super::common::{self, SpeciesSums};
use crate::core::atoms::AtomsDatabase;
use crate::core::io::trajectory::Trajectory;
use crate::core::models::entity::AtomGroup;
use crate::engine::configurators::{
    Configuration, FrameSelection, Grouping, InputTrajectory, Projection, Resolution, Setting,
    Weights,
};
use crate::engine::context::Engine;
use crate::engine::error::EngineError;
use crate::engine::job::{Analysis, RunStatus, StepRunner};
use crate::engine::output::OutputData;
use nalgebra::Vector3;
use std::f64::consts::PI;
use std::path::PathBuf;
use tracing::debug;

pub const NAME: &str = "density_of_states";

/// `C(τ) = ⟨v(t)·v(t + τ)⟩_t` for every lag the series allows.
pub fn autocorrelation(velocities: &[Vector3<f64>]) -> Vec<f64> {
    let n = velocities.len();
    (0..n)
        .map(|lag| {
            let origins = n - lag;
            let sum: f64 = (0..origins).map(|t| velocities[t].dot(&velocities[t + lag])).sum();
            sum / origins as f64
        })
        .collect()
}

/// Angular frequencies `ω_k = πk / (N dt)` matching [`cosine_transform`].
pub fn frequencies(n: usize, dt: f64) -> Vec<f64> {
    (0..n).map(|k| PI * k as f64 / (n as f64 * dt)).collect()
}

/// Even-signal cosine transform of `signal` sampled every `dt`, evaluated at
/// [`frequencies`].
pub fn cosine_transform(signal: &[f64], dt: f64) -> Vec<f64> {
    let n = signal.len();
    frequencies(n, dt)
        .into_iter()
        .map(|omega| {
            let Some((&c0, rest)) = signal.split_first() else {
                return 0.0;
            };
            let tail: f64 = rest
                .iter()
                .enumerate()
                .map(|(i, c)| c * (omega * (i + 1) as f64 * dt).cos())
                .sum();
            dt / (2.0 * PI) * (c0 + 2.0 * tail)
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct DensityOfStates {
    state: Option<DosState>,
}

#[derive(Debug)]
struct DosState {
    time: Vec<f64>,
    time_step: f64,
    window: Vec<f64>,
    weights: Weights,
    sums: SpeciesSums,
}

pub struct DosRunner {
    path: PathBuf,
    frames: FrameSelection,
    order: i64,
    projection: Projection,
    groups: Vec<AtomGroup>,
    database: AtomsDatabase,
}

impl StepRunner for DosRunner {
    type Worker = Trajectory;
    type Payload = Vec<f64>;

    fn n_steps(&self) -> usize {
        self.groups.len()
    }

    fn open_worker(&self) -> Result<Trajectory, EngineError> {
        common::open(&self.path)
    }

    fn run_step(&self, reader: &mut Trajectory, index: usize) -> Result<Vec<f64>, EngineError> {
        let group = &self.groups[index];
        let velocities = if self.order == 0 {
            common::group_velocities(reader, group, &self.database, &self.frames)?
        } else {
            let path = common::group_path(reader, group, &self.database, &self.frames)?;
            common::differentiate(&path, self.frames.time_step, self.order)
        };
        let projected: Vec<_> = velocities.iter().map(|v| self.projection.project(v)).collect();
        Ok(autocorrelation(&projected))
    }
}

impl Analysis for DensityOfStates {
    type Runner = DosRunner;

    const NAME: &'static str = NAME;

    fn settings(&self) -> Vec<Setting> {
        vec![
            common::trajectory(),
            common::frames(),
            common::instrument(),
            common::instrument_resolution(),
            common::interpolation_order(),
            common::projection(),
            common::atom_selection(),
            common::atom_transmutation(),
            common::grouping_level("atom"),
            common::weights("b_incoherent2"),
            common::output_files(&["HDF"]),
            common::running_mode(),
        ]
    }

    fn initialize(
        &mut self,
        config: &Configuration,
        engine: &Engine,
    ) -> Result<DosRunner, EngineError> {
        let input = config.get::<InputTrajectory>(common::TRAJECTORY_PARAM)?;
        let frames = config.get::<FrameSelection>(common::FRAMES_PARAM)?;
        let resolution = config.get::<Resolution>("instrument_resolution")?;
        let order = *config.get::<i64>("interpolation_order")?;
        let projection = *config.get::<Projection>("projection")?;
        let grouping = config.get::<Grouping>(common::GROUPING_PARAM)?;
        let weights = config.get::<Weights>(common::WEIGHTS_PARAM)?;
        debug!(?resolution, order, "Density of states configured.");

        self.state = Some(DosState {
            time: frames.duration.clone(),
            time_step: frames.time_step,
            window: resolution.time_window(&frames.duration),
            weights: weights.clone(),
            sums: SpeciesSums::new(grouping, frames.number()),
        });
        Ok(DosRunner {
            path: input.path.clone(),
            frames: frames.clone(),
            order,
            projection,
            groups: grouping.groups.clone(),
            database: engine.atoms().clone(),
        })
    }

    fn combine(&mut self, index: usize, payload: Vec<f64>) -> Result<(), EngineError> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| EngineError::Internal("DOS combined before initialization".into()))?;
        state.sums.add(index, &payload)
    }

    fn finalize(&mut self, status: RunStatus) -> Result<Option<OutputData>, EngineError> {
        let Some(state) = self.state.take() else {
            return Ok(None);
        };
        if status != RunStatus::Completed {
            return Ok(None);
        }
        let dt = state.time_step;
        let windowed = |vacf: &[f64]| -> Vec<f64> {
            let smoothed: Vec<f64> = vacf.iter().zip(&state.window).map(|(c, w)| c * w).collect();
            cosine_transform(&smoothed, dt)
        };
        let vacf = state.sums.means();
        let vacf_total = state.sums.weighted_total(&state.weights);
        let dos = vacf.iter().map(|(species, c)| (*species, windowed(c.as_slice()))).collect();
        let dos_total = windowed(&vacf_total);

        let mut data = OutputData::new();
        data.add_line("time", state.time.clone(), "ps", &[])?;
        data.add_line("omega", frequencies(state.time.len(), dt), "rad/ps", &[])?;
        common::add_species_lines(&mut data, "vacf", vacf, vacf_total, "nm2/ps2", "time")?;
        common::add_species_lines(&mut data, "dos", dos, dos_total, "nm2/ps", "omega")?;
        Ok(Some(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use crate::engine::configurators::{Parameters, RunningMode};
    use crate::engine::testing::{run_analysis, test_engine, water_box};

    fn parameters(trajectory: &std::path::Path, extra: &[(&str, Value)]) -> Parameters {
        let mut parameters = Parameters::from([(
            "trajectory".to_string(),
            Value::from(trajectory.to_string_lossy().to_string()),
        )]);
        for (k, v) in extra {
            parameters.insert(k.to_string(), v.clone());
        }
        parameters
    }

    #[test]
    fn constant_velocity_correlates_fully() {
        let v = Vector3::new(1.0, 2.0, 2.0);
        assert_eq!(autocorrelation(&[v; 4]), vec![9.0; 4]);
    }

    #[test]
    fn delta_signal_has_flat_spectrum() {
        let spectrum = cosine_transform(&[1.0, 0.0, 0.0, 0.0], 0.5);
        for value in spectrum {
            assert!((value - 0.5 / (2.0 * PI)).abs() < 1e-12);
        }
        let omega = frequencies(4, 0.5);
        assert_eq!(omega[0], 0.0);
        assert!((omega[2] - PI).abs() < 1e-12);
    }

    #[test]
    fn finite_differences_and_stored_velocities_agree_in_shape() {
        let dir = tempfile::tempdir().unwrap();
        let trajectory = water_box(dir.path(), 2, 8, true, true);
        let engine = test_engine();
        for order in [0, 1, 2] {
            let params = parameters(&trajectory, &[("interpolation_order", Value::from(order))]);
            let data = run_analysis(
                &mut DensityOfStates::default(),
                &engine,
                &params,
                RunningMode::Monoprocessor,
            );
            assert_eq!(data.get("omega").unwrap().data.len(), 8);
            let vacf = &data.get("vacf_total").unwrap().data;
            assert!(vacf[0] > 0.0, "order {order}");
            let dos = data.get("dos_total").unwrap();
            assert_eq!(dos.axis, vec!["omega".to_string()]);
            assert!(dos.data.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn instrument_resolution_damps_the_vacf() {
        let dir = tempfile::tempdir().unwrap();
        let trajectory = water_box(dir.path(), 1, 6, false, false);
        let engine = test_engine();
        let ideal = run_analysis(
            &mut DensityOfStates::default(),
            &engine,
            &parameters(&trajectory, &[]),
            RunningMode::Monoprocessor,
        );
        let damped = run_analysis(
            &mut DensityOfStates::default(),
            &engine,
            &parameters(&trajectory, &[("instrument", Value::from("backscattering"))]),
            RunningMode::Monoprocessor,
        );
        let (a, b) = (&ideal.get("dos_O").unwrap().data, &damped.get("dos_O").unwrap().data);
        assert_eq!(a.len(), b.len());
        assert!(a.iter().zip(b).any(|(x, y)| (x - y).abs() > 0.0));
    }
}
