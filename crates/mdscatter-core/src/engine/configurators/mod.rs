//! Typed job parameters.
//!
//! A job declares its parameters as an ordered list of [`Setting`]s. Each setting names a
//! configurator kind from the engine's configurator registry, carries kind-specific
//! options (bounds, choices, defaults) and the sibling parameters it reads, keyed by role.
//!
//! [`resolve`] turns a raw parameter table into a [`Configuration`]:
//!
//! 1. unknown parameter names are rejected, with the closest known name as a hint;
//! 2. settings are ordered topologically by their dependencies, ties kept in declaration
//!    order, and a cycle is an error;
//! 3. each configurator parses its value, reading already-configured siblings through a
//!    [`Context`]. A setting whose sibling failed fails with
//!    [`ConfigError::DependencyUnsatisfied`].
//!
//! The first failure in resolution order is reported.

pub mod input;
pub mod physics;
pub mod scalars;
pub mod selection;

use super::config::ConfigError;
use super::context::Engine;
use crate::core::registry::{Registry, closest};
use crate::core::value::Value;
use nalgebra::Vector3;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

pub use input::{FrameSelection, InputTrajectory, OutputFiles, OutputTrajectory, RunningMode};
pub use physics::{Instrument, Projection, QVectorSet, Resolution};
pub use selection::{AtomSelection, Grouping, Transmutation, Weights};

/// Raw job parameters, keyed by setting name.
pub type Parameters = BTreeMap<String, Value>;

/// Declaration of one job parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
    pub name: &'static str,
    /// Configurator kind, a key of the configurator registry.
    pub kind: &'static str,
    pub label: &'static str,
    /// Overrides the configurator's own default.
    pub default: Option<Value>,
    pub options: BTreeMap<&'static str, Value>,
    /// `(role, sibling setting name)` pairs.
    pub dependencies: Vec<(&'static str, &'static str)>,
}

impl Setting {
    pub fn new(name: &'static str, kind: &'static str) -> Self {
        Self {
            name,
            kind,
            label: name,
            default: None,
            options: BTreeMap::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn option(mut self, key: &'static str, value: impl Into<Value>) -> Self {
        self.options.insert(key, value.into());
        self
    }

    pub fn depends_on(mut self, role: &'static str, sibling: &'static str) -> Self {
        self.dependencies.push((role, sibling));
        self
    }

    pub fn dependency(&self, role: &str) -> Option<&'static str> {
        self.dependencies
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, sibling)| *sibling)
    }

    fn wrong_type(&self, expected: &'static str, found: &Value) -> ConfigError {
        ConfigError::WrongType {
            name: self.name,
            expected,
            found: found.type_name(),
        }
    }

    pub fn opt_f64(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_f64().map(Some).ok_or_else(|| self.wrong_type("a number", v)),
        }
    }

    pub fn opt_i64(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_i64().map(Some).ok_or_else(|| self.wrong_type("an integer", v)),
        }
    }

    pub fn opt_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_bool().map(Some).ok_or_else(|| self.wrong_type("a boolean", v)),
        }
    }

    pub fn opt_str(&self, key: &str) -> Result<Option<&str>, ConfigError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_str().map(Some).ok_or_else(|| self.wrong_type("a string", v)),
        }
    }

    pub fn opt_list(&self, key: &str) -> Result<Option<&[Value]>, ConfigError> {
        match self.options.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_list().map(Some).ok_or_else(|| self.wrong_type("a list", v)),
        }
    }
}

/// Parses the value of one setting.
pub trait Configurator: Send + Sync + fmt::Debug {
    /// Value used when the parameter is absent and the setting has no default of its own.
    /// `Null` makes the parameter required unless the configurator accepts it.
    fn default_value(&self) -> Value {
        Value::Null
    }

    fn choices(&self) -> Option<Vec<String>> {
        None
    }

    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError>;
}

pub type ConfiguratorFactory = fn(&Setting) -> Result<Box<dyn Configurator>, ConfigError>;

/// What a configurator sees while parsing: its own setting, the engine, and the siblings
/// configured before it.
pub struct Context<'a> {
    pub setting: &'a Setting,
    pub engine: &'a Engine,
    resolved: &'a BTreeMap<&'static str, Result<Configured, ConfigError>>,
}

impl<'a> Context<'a> {
    pub fn name(&self) -> &'static str {
        self.setting.name
    }

    pub fn invalid(&self, reason: impl ToString) -> ConfigError {
        ConfigError::invalid(self.setting.name, reason)
    }

    pub fn wrong_type(&self, expected: &'static str, found: &Value) -> ConfigError {
        self.setting.wrong_type(expected, found)
    }

    pub fn missing(&self) -> ConfigError {
        ConfigError::MissingParameter(self.setting.name)
    }

    /// The sibling declared under `role`, which must be of type `T`.
    pub fn dependency<T: FromConfigured>(&self, role: &str) -> Result<&'a T, ConfigError> {
        let sibling = self
            .setting
            .dependency(role)
            .ok_or_else(|| ConfigError::UnknownDependency {
                name: self.setting.name,
                dependency: role.to_string(),
            })?;
        self.sibling(sibling)
    }

    /// Like [`Context::dependency`], but `None` when the role is not declared.
    pub fn optional_dependency<T: FromConfigured>(
        &self,
        role: &str,
    ) -> Result<Option<&'a T>, ConfigError> {
        match self.setting.dependency(role) {
            Some(sibling) => self.sibling(sibling).map(Some),
            None => Ok(None),
        }
    }

    fn sibling<T: FromConfigured>(&self, sibling: &'static str) -> Result<&'a T, ConfigError> {
        let unsatisfied = || ConfigError::DependencyUnsatisfied {
            name: self.setting.name,
            dependency: sibling.to_string(),
        };
        match self.resolved.get(sibling) {
            Some(Ok(configured)) => T::from_configured(configured).ok_or_else(|| {
                ConfigError::WrongKind {
                    name: sibling.to_string(),
                    expected: T::KIND,
                    found: configured.kind_name(),
                }
            }),
            _ => Err(unsatisfied()),
        }
    }
}

/// A parsed parameter.
#[derive(Debug)]
pub enum Configured {
    Input(InputTrajectory),
    Frames(FrameSelection),
    AtomSelection(AtomSelection),
    Transmutation(Transmutation),
    Grouping(Grouping),
    Weights(Weights),
    QVectors(QVectorSet),
    Resolution(Resolution),
    Projection(Projection),
    Instrument(Option<Instrument>),
    OutputFiles(OutputFiles),
    OutputTrajectory(OutputTrajectory),
    RunningMode(RunningMode),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Vector(Vector3<f64>),
    Range(Vec<f64>),
}

impl Configured {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Configured::Input(_) => "input trajectory",
            Configured::Frames(_) => "frame selection",
            Configured::AtomSelection(_) => "atom selection",
            Configured::Transmutation(_) => "atom transmutation",
            Configured::Grouping(_) => "grouping",
            Configured::Weights(_) => "weights",
            Configured::QVectors(_) => "q-vectors",
            Configured::Resolution(_) => "instrument resolution",
            Configured::Projection(_) => "projection",
            Configured::Instrument(_) => "instrument",
            Configured::OutputFiles(_) => "output files",
            Configured::OutputTrajectory(_) => "output trajectory",
            Configured::RunningMode(_) => "running mode",
            Configured::Integer(_) => "integer",
            Configured::Float(_) => "float",
            Configured::Bool(_) => "boolean",
            Configured::Str(_) => "string",
            Configured::Vector(_) => "vector",
            Configured::Range(_) => "range",
        }
    }
}

/// Typed view into a [`Configured`] value.
pub trait FromConfigured: Sized {
    const KIND: &'static str;

    fn from_configured(configured: &Configured) -> Option<&Self>;
}

macro_rules! configured_as {
    ($ty:ty, $variant:ident, $kind:literal) => {
        impl FromConfigured for $ty {
            const KIND: &'static str = $kind;

            fn from_configured(configured: &Configured) -> Option<&Self> {
                match configured {
                    Configured::$variant(value) => Some(value),
                    _ => None,
                }
            }
        }
    };
}

configured_as!(InputTrajectory, Input, "input trajectory");
configured_as!(FrameSelection, Frames, "frame selection");
configured_as!(AtomSelection, AtomSelection, "atom selection");
configured_as!(Transmutation, Transmutation, "atom transmutation");
configured_as!(Grouping, Grouping, "grouping");
configured_as!(Weights, Weights, "weights");
configured_as!(QVectorSet, QVectors, "q-vectors");
configured_as!(Resolution, Resolution, "instrument resolution");
configured_as!(Projection, Projection, "projection");
configured_as!(Option<Instrument>, Instrument, "instrument");
configured_as!(OutputFiles, OutputFiles, "output files");
configured_as!(OutputTrajectory, OutputTrajectory, "output trajectory");
configured_as!(RunningMode, RunningMode, "running mode");
configured_as!(i64, Integer, "integer");
configured_as!(f64, Float, "float");
configured_as!(bool, Bool, "boolean");
configured_as!(String, Str, "string");
configured_as!(Vector3<f64>, Vector, "vector");
configured_as!(Vec<f64>, Range, "range");

/// The resolved parameters of one job, in declaration order.
#[derive(Debug)]
pub struct Configuration {
    entries: Vec<(&'static str, Configured)>,
    parameters: Parameters,
}

impl Configuration {
    pub fn configured(&self, name: &str) -> Option<&Configured> {
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, c)| c)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.configured(name).is_some()
    }

    /// The parameter `name` as a `T`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingParameter`] when the job declares no such parameter and
    /// [`ConfigError::WrongKind`] when it holds something else.
    pub fn get<T: FromConfigured>(&self, name: &'static str) -> Result<&T, ConfigError> {
        let configured = self
            .configured(name)
            .ok_or(ConfigError::MissingParameter(name))?;
        T::from_configured(configured).ok_or_else(|| ConfigError::WrongKind {
            name: name.to_string(),
            expected: T::KIND,
            found: configured.kind_name(),
        })
    }

    /// The effective raw value of every parameter, defaults included.
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(n, _)| *n)
    }

    /// Job name and effective parameters rendered as TOML.
    pub fn header(&self, job: &str) -> String {
        let mut parameters = toml::Table::new();
        for (name, value) in &self.parameters {
            if let Some(value) = value.to_toml() {
                parameters.insert(name.clone(), value);
            }
        }
        let mut table = toml::Table::new();
        table.insert("job".to_string(), toml::Value::String(job.to_string()));
        table.insert("parameters".to_string(), toml::Value::Table(parameters));
        toml::to_string(&table).unwrap_or_else(|_| format!("job = {job:?}\n"))
    }
}

/// Outcome of one setting during resolution.
#[derive(Debug)]
pub struct ResolvedSetting {
    pub name: &'static str,
    pub value: Value,
    pub result: Result<Configured, ConfigError>,
}

/// Built-in configurator kinds.
pub fn registry() -> Registry<ConfiguratorFactory> {
    let mut registry: Registry<ConfiguratorFactory> = Registry::new("configurator");
    let entries: [(&str, ConfiguratorFactory); 22] = [
        (input::INPUT_FILE, input::input_file),
        (input::FRAMES, input::frames),
        (input::FRAME_INDEX, input::frame_index),
        (input::OUTPUT_FILES, input::output_files),
        (input::OUTPUT_TRAJECTORY, input::output_trajectory),
        (input::RUNNING_MODE, input::running_mode),
        (selection::ATOM_SELECTION, selection::atom_selection),
        (selection::ATOM_TRANSMUTATION, selection::atom_transmutation),
        (selection::GROUPING_LEVEL, selection::grouping_level),
        (selection::WEIGHTS, selection::weights),
        (physics::Q_VECTORS, physics::q_vectors),
        (physics::INSTRUMENT_RESOLUTION, physics::instrument_resolution),
        (physics::INTERPOLATION_ORDER, physics::interpolation_order),
        (physics::PROJECTION, physics::projection),
        (physics::INSTRUMENT, physics::instrument),
        (physics::CORRELATION_WINDOW, physics::correlation_window),
        (scalars::INTEGER, scalars::integer),
        (scalars::FLOAT, scalars::float),
        (scalars::BOOLEAN, scalars::boolean),
        (scalars::STRING, scalars::string),
        (scalars::VECTOR, scalars::vector),
        (scalars::RANGE, scalars::range),
    ];
    for (name, factory) in entries {
        // Names are distinct constants.
        let _ = registry.register(name, factory);
    }
    registry
}

fn check_parameters(settings: &[Setting], parameters: &Parameters) -> Result<(), ConfigError> {
    for name in parameters.keys() {
        if settings.iter().any(|s| s.name == name) {
            continue;
        }
        let suggestion = closest(name, settings.iter().map(|s| s.name)).map(str::to_string);
        return Err(ConfigError::UnknownParameter {
            name: name.clone(),
            suggestion,
        });
    }
    Ok(())
}

/// Indices of `settings` in dependency order, ties broken by declaration order.
pub fn resolution_order(settings: &[Setting]) -> Result<Vec<usize>, ConfigError> {
    let position = |name: &str| settings.iter().position(|s| s.name == name);
    let mut requires: Vec<Vec<usize>> = Vec::with_capacity(settings.len());
    for setting in settings {
        let mut deps = Vec::new();
        for (_, sibling) in &setting.dependencies {
            let index = position(sibling).ok_or_else(|| ConfigError::UnknownDependency {
                name: setting.name,
                dependency: sibling.to_string(),
            })?;
            deps.push(index);
        }
        requires.push(deps);
    }

    let mut pending: Vec<usize> = requires.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = (0..settings.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(settings.len());
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for (i, deps) in requires.iter().enumerate() {
            for _ in deps.iter().filter(|&&d| d == next) {
                pending[i] -= 1;
                if pending[i] == 0 {
                    ready.insert(i);
                }
            }
        }
    }
    if order.len() == settings.len() {
        return Ok(order);
    }

    // Follow unresolved dependencies from the first stuck setting until one repeats.
    let stuck: BTreeSet<usize> = (0..settings.len()).filter(|i| !order.contains(i)).collect();
    let mut path: Vec<usize> = Vec::new();
    let mut current = stuck.first().copied().unwrap_or_default();
    while !path.contains(&current) {
        path.push(current);
        match requires[current].iter().find(|d| stuck.contains(d)) {
            Some(&d) => current = d,
            None => break,
        }
    }
    let start = path.iter().position(|&p| p == current).unwrap_or_default();
    let mut cycle: Vec<String> = path[start..]
        .iter()
        .map(|&i| settings[i].name.to_string())
        .collect();
    cycle.push(settings[current].name.to_string());
    Err(ConfigError::CyclicDependency(cycle))
}

/// Configures every setting, in resolution order, without stopping at the first failure.
///
/// # Errors
///
/// Only structural problems are returned here: unknown parameters, unknown configurator
/// kinds, unknown dependencies and cycles. Per-setting failures are in the returned list.
pub fn resolve_all(
    engine: &Engine,
    settings: &[Setting],
    parameters: &Parameters,
) -> Result<Vec<ResolvedSetting>, ConfigError> {
    check_parameters(settings, parameters)?;
    let configurators = settings
        .iter()
        .map(|setting| {
            let factory = engine.configurators().get(setting.kind).map_err(|source| {
                ConfigError::UnknownConfigurator {
                    name: setting.name,
                    source,
                }
            })?;
            factory(setting)
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;
    let order = resolution_order(settings)?;

    let mut resolved: BTreeMap<&'static str, Result<Configured, ConfigError>> = BTreeMap::new();
    let mut values: Vec<(&'static str, Value)> = Vec::with_capacity(settings.len());
    for index in order {
        let setting = &settings[index];
        let configurator = &configurators[index];
        let value = parameters
            .get(setting.name)
            .cloned()
            .or_else(|| setting.default.clone())
            .unwrap_or_else(|| configurator.default_value());

        let failed_sibling = setting
            .dependencies
            .iter()
            .find(|(_, sibling)| !matches!(resolved.get(sibling), Some(Ok(_))));
        let result = match failed_sibling {
            Some((_, sibling)) => Err(ConfigError::DependencyUnsatisfied {
                name: setting.name,
                dependency: sibling.to_string(),
            }),
            None => {
                let ctx = Context {
                    setting,
                    engine,
                    resolved: &resolved,
                };
                configurator.configure(&value, &ctx)
            }
        };
        match &result {
            Ok(configured) => {
                debug!(parameter = setting.name, kind = configured.kind_name(), "Configured.")
            }
            Err(e) => debug!(parameter = setting.name, error = %e, "Configuration failed."),
        }
        resolved.insert(setting.name, result);
        values.push((setting.name, value));
    }

    Ok(values
        .into_iter()
        .map(|(name, value)| ResolvedSetting {
            name,
            value,
            result: resolved
                .remove(name)
                .unwrap_or(Err(ConfigError::MissingParameter(name))),
        })
        .collect())
}

/// Resolves `parameters` against `settings`; see the module docs.
pub fn resolve(
    engine: &Engine,
    settings: &[Setting],
    parameters: &Parameters,
) -> Result<Configuration, ConfigError> {
    let mut configured: BTreeMap<&'static str, Configured> = BTreeMap::new();
    let mut effective = Parameters::new();
    for resolved in resolve_all(engine, settings, parameters)? {
        configured.insert(resolved.name, resolved.result?);
        effective.insert(resolved.name.to_string(), resolved.value);
    }
    let entries = settings
        .iter()
        .filter_map(|s| configured.remove(s.name).map(|c| (s.name, c)))
        .collect();
    Ok(Configuration {
        entries,
        parameters: effective,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::test_engine;

    fn int(name: &'static str) -> Setting {
        Setting::new(name, scalars::INTEGER).default_value(1)
    }

    #[test]
    fn order_follows_dependencies_then_declaration() {
        let settings = vec![
            int("c").depends_on("x", "b"),
            int("a"),
            int("b").depends_on("x", "a"),
            int("d"),
        ];
        let order: Vec<&str> = resolution_order(&settings)
            .unwrap()
            .into_iter()
            .map(|i| settings[i].name)
            .collect();
        assert_eq!(order, ["a", "b", "c", "d"]);
    }

    #[test]
    fn cycles_are_reported_with_their_path() {
        let settings = vec![
            int("a").depends_on("x", "b"),
            int("b").depends_on("x", "c"),
            int("c").depends_on("x", "a"),
            int("d"),
        ];
        let err = resolution_order(&settings).unwrap_err();
        assert_eq!(
            err,
            ConfigError::CyclicDependency(vec!["a".into(), "b".into(), "c".into(), "a".into()])
        );
    }

    #[test]
    fn dependency_on_an_undeclared_setting_is_an_error() {
        let settings = vec![int("a").depends_on("x", "ghost")];
        assert!(matches!(
            resolution_order(&settings),
            Err(ConfigError::UnknownDependency { name: "a", .. })
        ));
    }

    #[test]
    fn unknown_parameters_get_a_suggestion() {
        let engine = test_engine();
        let settings = vec![int("frames"), int("weights")];
        let parameters = Parameters::from([("frmaes".to_string(), Value::Int(2))]);
        let err = resolve(&engine, &settings, &parameters).unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownParameter {
                name: "frmaes".into(),
                suggestion: Some("frames".into())
            }
        );
    }

    #[test]
    fn failed_sibling_makes_dependents_unsatisfied() {
        let engine = test_engine();
        let settings = vec![
            Setting::new("n", scalars::INTEGER).option("mini", 0),
            Setting::new("window", physics::CORRELATION_WINDOW).depends_on("frames", "n"),
        ];
        let parameters = Parameters::from([("n".to_string(), Value::Int(-3))]);
        let report = resolve_all(&engine, &settings, &parameters).unwrap();
        assert!(matches!(report[0].result, Err(ConfigError::OutOfRange { name: "n", .. })));
        assert!(matches!(
            report[1].result,
            Err(ConfigError::DependencyUnsatisfied { name: "window", .. })
        ));
        assert!(matches!(
            resolve(&engine, &settings, &parameters),
            Err(ConfigError::OutOfRange { .. })
        ));
    }

    #[test]
    fn header_lists_effective_parameters() {
        let engine = test_engine();
        let settings = vec![int("steps"), Setting::new("name", scalars::STRING).default_value("x")];
        let config = resolve(&engine, &settings, &Parameters::new()).unwrap();
        assert_eq!(*config.get::<i64>("steps").unwrap(), 1);
        assert!(matches!(
            config.get::<f64>("steps"),
            Err(ConfigError::WrongKind { expected: "float", found: "integer", .. })
        ));
        let header: toml::Table = config.header("demo").parse().unwrap();
        assert_eq!(header["job"].as_str(), Some("demo"));
        assert_eq!(header["parameters"]["steps"].as_integer(), Some(1));
        assert_eq!(header["parameters"]["name"].as_str(), Some("x"));
    }
}
