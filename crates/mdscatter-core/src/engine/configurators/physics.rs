use super::input::{FrameSelection, InputTrajectory};
use super::scalars::parse_vector;
use super::{Configured, Configurator, Context, Setting};
use crate::core::qvectors::QShell;
use crate::core::value::Value;
use crate::engine::config::ConfigError;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const Q_VECTORS: &str = "q_vectors";
pub const INSTRUMENT_RESOLUTION: &str = "instrument_resolution";
pub const INTERPOLATION_ORDER: &str = "interpolation_order";
pub const PROJECTION: &str = "projection";
pub const INSTRUMENT: &str = "instrument";
pub const CORRELATION_WINDOW: &str = "frames_correlation_window";

/// Generated q-shells with the generator that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct QVectorSet {
    pub generator: String,
    pub parameters: Value,
    pub shells: Vec<QShell>,
}

impl QVectorSet {
    pub fn q_values(&self) -> Vec<f64> {
        self.shells.iter().map(|s| s.q).collect()
    }
}

/// Splits `(name, parameter table)` given as a two-element list or as a table with a
/// name key and a `parameters` table.
fn named_parameters<'v>(
    value: &'v Value,
    key: &str,
    ctx: &Context<'_>,
) -> Result<(&'v str, Value), ConfigError> {
    match value {
        Value::Str(name) => Ok((name.as_str(), Value::Table(BTreeMap::new()))),
        Value::List(items) => match items.as_slice() {
            [Value::Str(name)] => Ok((name.as_str(), Value::Table(BTreeMap::new()))),
            [Value::Str(name), parameters @ Value::Table(_)] => {
                Ok((name.as_str(), parameters.clone()))
            }
            _ => Err(ctx.wrong_type("[name, {parameters}]", value)),
        },
        Value::Table(table) => {
            let name = table
                .get(key)
                .and_then(Value::as_str)
                .ok_or_else(|| ctx.invalid(format!("missing '{key}' entry")))?;
            let parameters = match table.get("parameters") {
                Some(p @ Value::Table(_)) => p.clone(),
                Some(other) => return Err(ctx.wrong_type("a parameter table", other)),
                None => {
                    let rest: BTreeMap<String, Value> = table
                        .iter()
                        .filter(|(k, _)| k.as_str() != key)
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    Value::Table(rest)
                }
            };
            Ok((name, parameters))
        }
        other => Err(ctx.wrong_type("[name, {parameters}] or a table", other)),
    }
}

#[derive(Debug)]
struct QVectorsConfigurator;

pub fn q_vectors(_: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(QVectorsConfigurator))
}

impl Configurator for QVectorsConfigurator {
    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        if value.is_null() {
            return Err(ctx.missing());
        }
        let input: &InputTrajectory = ctx.dependency("trajectory")?;
        let (name, parameters) = named_parameters(value, "generator", ctx)?;
        let registry = ctx.engine.qvectors();
        let factory = registry.get(name).map_err(|e| ctx.invalid(e))?;
        let generator = factory(&parameters).map_err(|e| ctx.invalid(e))?;
        let cell = input
            .reader()
            .and_then(|mut reader| reader.unit_cell(0))
            .map_err(|e| ctx.invalid(e))?;
        let shells = generator.generate(cell.as_ref()).map_err(|e| ctx.invalid(e))?;
        Ok(Configured::QVectors(QVectorSet {
            generator: registry.canonical_name(name).unwrap_or(name).to_string(),
            parameters,
            shells,
        }))
    }
}

/// Instrument resolution profile in frequency (rad/ps), centred on `mu` with width `sigma`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    Ideal,
    Gaussian { mu: f64, sigma: f64 },
    Lorentzian { mu: f64, sigma: f64 },
    Triangular { mu: f64, sigma: f64 },
    Square { mu: f64, sigma: f64 },
    PseudoVoigt {
        eta: f64,
        mu_gaussian: f64,
        sigma_gaussian: f64,
        mu_lorentzian: f64,
        sigma_lorentzian: f64,
    },
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 { 1.0 } else { x.sin() / x }
}

impl Resolution {
    /// Fourier transform of the frequency profile, evaluated at `times`; 1 at t = 0 for
    /// a centred profile.
    pub fn time_window(&self, times: &[f64]) -> Vec<f64> {
        times.iter().map(|&t| self.window_at(t)).collect()
    }

    fn window_at(&self, t: f64) -> f64 {
        match *self {
            Resolution::Ideal => 1.0,
            Resolution::Gaussian { mu, sigma } => {
                (-0.5 * (sigma * t).powi(2)).exp() * (mu * t).cos()
            }
            Resolution::Lorentzian { mu, sigma } => (-sigma * t.abs()).exp() * (mu * t).cos(),
            Resolution::Triangular { mu, sigma } => sinc(0.5 * sigma * t).powi(2) * (mu * t).cos(),
            Resolution::Square { mu, sigma } => sinc(sigma * t) * (mu * t).cos(),
            Resolution::PseudoVoigt {
                eta,
                mu_gaussian,
                sigma_gaussian,
                mu_lorentzian,
                sigma_lorentzian,
            } => {
                let lorentzian = Resolution::Lorentzian {
                    mu: mu_lorentzian,
                    sigma: sigma_lorentzian,
                };
                let gaussian = Resolution::Gaussian {
                    mu: mu_gaussian,
                    sigma: sigma_gaussian,
                };
                eta * lorentzian.window_at(t) + (1.0 - eta) * gaussian.window_at(t)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Profile {
    #[serde(default)]
    mu: f64,
    sigma: f64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PseudoVoigtProfile {
    eta: f64,
    #[serde(default)]
    mu_gaussian: f64,
    sigma_gaussian: f64,
    #[serde(default)]
    mu_lorentzian: f64,
    sigma_lorentzian: f64,
}

const RESOLUTION_KINDS: [&str; 6] = [
    "ideal",
    "gaussian",
    "lorentzian",
    "triangular",
    "square",
    "pseudo_voigt",
];

fn parse_resolution(value: &Value, ctx: &Context<'_>) -> Result<Resolution, ConfigError> {
    let (kind, parameters) = named_parameters(value, "kind", ctx)?;
    let profile = || -> Result<(f64, f64), ConfigError> {
        let p: Profile = parameters.to_typed().map_err(|e| ctx.invalid(e))?;
        if p.sigma <= 0.0 {
            return Err(ctx.invalid("sigma must be positive"));
        }
        Ok((p.mu, p.sigma))
    };
    let resolution = match kind.to_ascii_lowercase().replace('-', "_").as_str() {
        "ideal" => Resolution::Ideal,
        "gaussian" => {
            let (mu, sigma) = profile()?;
            Resolution::Gaussian { mu, sigma }
        }
        "lorentzian" => {
            let (mu, sigma) = profile()?;
            Resolution::Lorentzian { mu, sigma }
        }
        "triangular" => {
            let (mu, sigma) = profile()?;
            Resolution::Triangular { mu, sigma }
        }
        "square" => {
            let (mu, sigma) = profile()?;
            Resolution::Square { mu, sigma }
        }
        "pseudo_voigt" | "pseudovoigt" => {
            let p: PseudoVoigtProfile = parameters.to_typed().map_err(|e| ctx.invalid(e))?;
            if !(0.0..=1.0).contains(&p.eta) {
                return Err(ConfigError::OutOfRange {
                    name: ctx.name(),
                    value: p.eta.to_string(),
                    min: Some("0".into()),
                    max: Some("1".into()),
                });
            }
            if p.sigma_gaussian <= 0.0 || p.sigma_lorentzian <= 0.0 {
                return Err(ctx.invalid("sigma must be positive"));
            }
            Resolution::PseudoVoigt {
                eta: p.eta,
                mu_gaussian: p.mu_gaussian,
                sigma_gaussian: p.sigma_gaussian,
                mu_lorentzian: p.mu_lorentzian,
                sigma_lorentzian: p.sigma_lorentzian,
            }
        }
        _ => {
            return Err(ConfigError::UnknownChoice {
                name: ctx.name(),
                value: kind.to_string(),
                choices: RESOLUTION_KINDS.map(String::from).to_vec(),
            });
        }
    };
    Ok(resolution)
}

/// Falls back to the resolution of the selected instrument, then to an ideal one.
#[derive(Debug)]
struct ResolutionConfigurator;

pub fn instrument_resolution(_: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(ResolutionConfigurator))
}

impl Configurator for ResolutionConfigurator {
    fn choices(&self) -> Option<Vec<String>> {
        Some(RESOLUTION_KINDS.map(String::from).to_vec())
    }

    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let instrument: Option<&Option<Instrument>> = ctx.optional_dependency("instrument")?;
        let inherited = instrument
            .and_then(Option::as_ref)
            .and_then(|i| i.resolution.as_ref());
        let resolution = match (value, inherited) {
            (Value::Null, Some(from_instrument)) => parse_resolution(from_instrument, ctx)?,
            (Value::Null, None) => Resolution::Ideal,
            (value, _) => parse_resolution(value, ctx)?,
        };
        Ok(Configured::Resolution(resolution))
    }
}

#[derive(Debug)]
struct InterpolationOrderConfigurator {
    maxi: i64,
}

pub fn interpolation_order(setting: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(InterpolationOrderConfigurator {
        maxi: setting.opt_i64("maxi")?.unwrap_or(2),
    }))
}

impl Configurator for InterpolationOrderConfigurator {
    fn default_value(&self) -> Value {
        Value::Int(1)
    }

    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let input: &InputTrajectory = ctx.dependency("trajectory")?;
        let order = match value {
            Value::Bool(_) | Value::Null => return Err(ctx.wrong_type("an integer", value)),
            v => v.as_i64().ok_or_else(|| ctx.wrong_type("an integer", v))?,
        };
        if !(0..=self.maxi).contains(&order) {
            return Err(ConfigError::OutOfRange {
                name: ctx.name(),
                value: order.to_string(),
                min: Some("0".into()),
                max: Some(self.maxi.to_string()),
            });
        }
        if order == 0 && !input.has_velocities {
            return Err(ctx.invalid("order 0 reads velocities, which the trajectory does not hold"));
        }
        Ok(Configured::Integer(order))
    }
}

/// Linear projection applied to displacement vectors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Null,
    /// Onto the unit axis.
    Axial(Vector3<f64>),
    /// Onto the plane with this unit normal.
    Planar(Vector3<f64>),
}

impl Projection {
    pub fn project(&self, v: &Vector3<f64>) -> Vector3<f64> {
        match self {
            Projection::Null => *v,
            Projection::Axial(u) => u * u.dot(v),
            Projection::Planar(n) => v - n * n.dot(v),
        }
    }
}

#[derive(Debug)]
struct ProjectionConfigurator;

pub fn projection(_: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(ProjectionConfigurator))
}

impl Configurator for ProjectionConfigurator {
    fn choices(&self) -> Option<Vec<String>> {
        Some(["null", "axial", "planar"].map(String::from).to_vec())
    }

    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let (kind, axis) = match value {
            Value::Null => return Ok(Configured::Projection(Projection::Null)),
            Value::Str(kind) => (kind.as_str(), None),
            Value::List(items) => match items.as_slice() {
                [Value::Str(kind)] => (kind.as_str(), None),
                [Value::Str(kind), axis] => (kind.as_str(), Some(axis)),
                _ => return Err(ctx.wrong_type("[kind, [x, y, z]]", value)),
            },
            Value::Table(table) => match table.iter().next() {
                Some((kind, axis)) if table.len() == 1 => (kind.as_str(), Some(axis)),
                _ => return Err(ctx.invalid("expected a single 'axial' or 'planar' entry")),
            },
            other => return Err(ctx.wrong_type("a projection", other)),
        };
        let unit = |axis: Option<&Value>| -> Result<Vector3<f64>, ConfigError> {
            let axis = axis
                .ok_or_else(|| ctx.invalid(format!("'{kind}' projection needs a vector")))?;
            let v = parse_vector(axis, ctx)?;
            let norm = v.norm();
            if norm == 0.0 {
                return Err(ctx.invalid("projection vector must not be null"));
            }
            Ok(v / norm)
        };
        let projection = match kind.to_ascii_lowercase().as_str() {
            "null" | "none" => Projection::Null,
            "axial" => Projection::Axial(unit(axis)?),
            "planar" => Projection::Planar(unit(axis)?),
            other => {
                return Err(ConfigError::UnknownChoice {
                    name: ctx.name(),
                    value: other.to_string(),
                    choices: self.choices().unwrap_or_default(),
                });
            }
        };
        Ok(Configured::Projection(projection))
    }
}

/// A user-defined instrument record from the settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Resolution in the same shape as the `instrument_resolution` parameter.
    #[serde(default)]
    pub resolution: Option<Value>,
}

#[derive(Debug)]
struct InstrumentConfigurator;

pub fn instrument(_: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(InstrumentConfigurator))
}

impl Configurator for InstrumentConfigurator {
    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let name = match value {
            Value::Null => return Ok(Configured::Instrument(None)),
            Value::Str(name) => name,
            other => return Err(ctx.wrong_type("an instrument name", other)),
        };
        let instruments = ctx.engine.instruments();
        instruments
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
            .map(|i| Configured::Instrument(Some(i.clone())))
            .ok_or_else(|| ConfigError::UnknownChoice {
                name: ctx.name(),
                value: name.clone(),
                choices: instruments.iter().map(|i| i.name.clone()).collect(),
            })
    }
}

#[derive(Debug)]
struct CorrelationWindowConfigurator;

pub fn correlation_window(_: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(CorrelationWindowConfigurator))
}

impl Configurator for CorrelationWindowConfigurator {
    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let frames: &FrameSelection = ctx.dependency("frames")?;
        let limit = frames.number().div_ceil(2) as i64;
        let window = match value {
            Value::Null => limit,
            Value::Bool(_) => return Err(ctx.wrong_type("an integer", value)),
            v => v.as_i64().ok_or_else(|| ctx.wrong_type("an integer", v))?,
        };
        if !(1..=limit).contains(&window) {
            return Err(ConfigError::OutOfRange {
                name: ctx.name(),
                value: window.to_string(),
                min: Some("1".into()),
                max: Some(limit.to_string()),
            });
        }
        Ok(Configured::Integer(window))
    }
}
