use super::{Configured, Configurator, Context, Setting};
use crate::core::io::store::Compression;
use crate::core::io::trajectory::{Trajectory, TrajectoryError};
use crate::core::io::trajectory_writer::{Precision, TrajectoryWriterOptions};
use crate::core::models::configuration::VELOCITIES;
use crate::core::models::system::ChemicalSystem;
use crate::core::value::Value;
use crate::engine::config::ConfigError;
use std::path::PathBuf;
use std::sync::Arc;

pub const INPUT_FILE: &str = "hdf_input_file";
pub const FRAMES: &str = "frames";
pub const FRAME_INDEX: &str = "frame_index";
pub const OUTPUT_FILES: &str = "output_files";
pub const OUTPUT_TRAJECTORY: &str = "output_trajectory";
pub const RUNNING_MODE: &str = "running_mode";

/// An opened input trajectory. Every consumer reads through its own handle from
/// [`InputTrajectory::reader`].
#[derive(Debug)]
pub struct InputTrajectory {
    pub path: PathBuf,
    pub length: usize,
    pub time_step: f64,
    pub has_velocities: bool,
    pub periodic: bool,
    pub system: Arc<ChemicalSystem>,
    template: Trajectory,
}

impl InputTrajectory {
    pub fn reader(&self) -> Result<Trajectory, TrajectoryError> {
        self.template.reopen()
    }

    pub fn time(&self) -> &[f64] {
        self.template.time()
    }
}

#[derive(Debug)]
struct InputFileConfigurator;

pub fn input_file(_: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(InputFileConfigurator))
}

impl Configurator for InputFileConfigurator {
    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let path = match value {
            Value::Null => return Err(ctx.missing()),
            Value::Str(path) => PathBuf::from(path),
            other => return Err(ctx.wrong_type("a file path", other)),
        };
        let trajectory = Trajectory::open(&path).map_err(|e| ctx.invalid(e))?;
        if trajectory.is_empty() {
            return Err(ctx.invalid("trajectory holds no frame"));
        }
        Ok(Configured::Input(InputTrajectory {
            path,
            length: trajectory.len(),
            time_step: trajectory.time_step(),
            has_velocities: trajectory.has_variable(VELOCITIES),
            periodic: trajectory.is_periodic(),
            system: Arc::clone(trajectory.chemical_system()),
            template: trajectory,
        }))
    }
}

/// Frames `first, first + step, …` below `last`, with their times.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSelection {
    pub first: usize,
    pub last: usize,
    pub step: usize,
    pub indices: Vec<usize>,
    /// Absolute times of the selected frames.
    pub time: Vec<f64>,
    /// Times relative to the first selected frame.
    pub duration: Vec<f64>,
    /// Time between two selected frames.
    pub time_step: f64,
}

impl FrameSelection {
    pub fn number(&self) -> usize {
        self.indices.len()
    }
}

#[derive(Debug)]
struct FramesConfigurator;

pub fn frames(_: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(FramesConfigurator))
}

fn normalize(index: Option<i64>, default: usize, length: usize) -> Option<usize> {
    match index {
        None => Some(default),
        Some(i) if i < 0 => usize::try_from(length as i64 + i).ok(),
        Some(i) => usize::try_from(i).ok(),
    }
}

impl Configurator for FramesConfigurator {
    fn default_value(&self) -> Value {
        Value::from("all")
    }

    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let input: &InputTrajectory = ctx.dependency("trajectory")?;
        let length = input.length;
        let bound = |v: &Value| match v {
            Value::Null => Ok(None),
            v => v.as_i64().map(Some).ok_or_else(|| ctx.wrong_type("an integer", v)),
        };
        let (first, last, step) = match value {
            Value::Null => (None, None, None),
            Value::Str(s) if s.eq_ignore_ascii_case("all") => (None, None, None),
            Value::List(items) if items.len() == 3 => {
                (bound(&items[0])?, bound(&items[1])?, bound(&items[2])?)
            }
            Value::Table(table) => {
                let get = |key: &str| table.get(key).map_or(Ok(None), &bound);
                (get("first")?, get("last")?, get("step")?)
            }
            other => return Err(ctx.wrong_type("\"all\", [first, last, step] or a table", other)),
        };

        let step = match step {
            None => 1,
            Some(s) if s >= 1 => s as usize,
            Some(s) => {
                return Err(ConfigError::OutOfRange {
                    name: ctx.name(),
                    value: s.to_string(),
                    min: Some("1".into()),
                    max: None,
                });
            }
        };
        let first = normalize(first, 0, length)
            .ok_or_else(|| {
                ctx.invalid(format!("first frame is before the start of {length} frames"))
            })?;
        let last = normalize(last, length, length)
            .ok_or_else(|| {
                ctx.invalid(format!("last frame is before the start of {length} frames"))
            })?
            .min(length);
        if first >= last {
            return Err(ctx.invalid(format!(
                "empty frame range {first}..{last} for a trajectory of {length} frames"
            )));
        }

        let indices: Vec<usize> = (first..last).step_by(step).collect();
        let all_times = input.time();
        let time: Vec<f64> = indices.iter().map(|&i| all_times[i]).collect();
        let origin = time[0];
        Ok(Configured::Frames(FrameSelection {
            first,
            last,
            step,
            duration: time.iter().map(|t| t - origin).collect(),
            time,
            indices,
            time_step: input.time_step * step as f64,
        }))
    }
}

/// One position within the selected frames, such as a reference frame.
#[derive(Debug)]
struct FrameIndexConfigurator;

pub fn frame_index(_: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(FrameIndexConfigurator))
}

impl Configurator for FrameIndexConfigurator {
    fn default_value(&self) -> Value {
        Value::Int(0)
    }

    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let frames: &FrameSelection = ctx.dependency("frames")?;
        let index = match value {
            Value::Null => 0,
            Value::Bool(_) => return Err(ctx.wrong_type("an integer", value)),
            v => v.as_i64().ok_or_else(|| ctx.wrong_type("an integer", v))?,
        };
        let number = frames.number() as i64;
        if !(0..number).contains(&index) {
            return Err(ConfigError::OutOfRange {
                name: ctx.name(),
                value: index.to_string(),
                min: Some("0".into()),
                max: Some((number - 1).to_string()),
            });
        }
        Ok(Configured::Integer(index))
    }
}

/// Where and how results are written.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputFiles {
    pub root: PathBuf,
    /// Canonical format names.
    pub formats: Vec<String>,
    /// Also write `{root}.log`.
    pub log: bool,
}

#[derive(Debug)]
struct OutputFilesConfigurator {
    default_formats: Vec<String>,
}

pub fn output_files(setting: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    let default_formats = match setting.opt_list("formats")? {
        Some(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ConfigError::invalid(setting.name, "default formats must be strings"))?,
        None => vec!["HDF".to_string()],
    };
    Ok(Box::new(OutputFilesConfigurator { default_formats }))
}

impl Configurator for OutputFilesConfigurator {
    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let (root, formats, log) = match value {
            Value::Null => return Err(ctx.missing()),
            Value::Str(root) => (root.clone(), None, None),
            Value::List(items) if (1..=3).contains(&items.len()) => {
                let root = items[0]
                    .as_str()
                    .ok_or_else(|| ctx.wrong_type("a root path", &items[0]))?;
                (root.to_string(), items.get(1), items.get(2))
            }
            Value::Table(table) => {
                let root = table.get("root").ok_or_else(|| ctx.missing())?;
                let root = root.as_str().ok_or_else(|| ctx.wrong_type("a root path", root))?;
                (root.to_string(), table.get("formats"), table.get("log"))
            }
            other => return Err(ctx.wrong_type("a root path or a table", other)),
        };
        if root.is_empty() {
            return Err(ctx.invalid("empty output root"));
        }

        let requested: Vec<String> = match formats {
            None | Some(Value::Null) => self.default_formats.clone(),
            Some(Value::Str(one)) => vec![one.clone()],
            Some(Value::List(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ctx.wrong_type("a format name", v))
                })
                .collect::<Result<_, _>>()?,
            Some(other) => return Err(ctx.wrong_type("a list of format names", other)),
        };
        if requested.is_empty() {
            return Err(ctx.invalid("at least one output format is required"));
        }
        let registry = ctx.engine.formats();
        let mut formats = Vec::with_capacity(requested.len());
        for name in requested {
            let canonical = registry
                .canonical_name(&name)
                .ok_or_else(|| ConfigError::UnknownChoice {
                    name: ctx.name(),
                    value: name.clone(),
                    choices: registry.names().map(str::to_string).collect(),
                })?;
            if !formats.iter().any(|f: &String| f == canonical) {
                formats.push(canonical.to_string());
            }
        }
        let log = match log {
            None | Some(Value::Null) => false,
            Some(v) => v.as_bool().ok_or_else(|| ctx.wrong_type("a boolean", v))?,
        };
        Ok(Configured::OutputFiles(OutputFiles {
            root: PathBuf::from(root),
            formats,
            log,
        }))
    }
}

/// Destination of a rewritten trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTrajectory {
    pub path: PathBuf,
    pub precision: Precision,
    pub compression: Compression,
}

impl OutputTrajectory {
    pub fn writer_options(&self, selected_atoms: Option<Vec<usize>>) -> TrajectoryWriterOptions {
        TrajectoryWriterOptions {
            selected_atoms,
            precision: self.precision,
            compression: self.compression,
        }
    }
}

#[derive(Debug)]
struct OutputTrajectoryConfigurator;

pub fn output_trajectory(_: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(OutputTrajectoryConfigurator))
}

impl Configurator for OutputTrajectoryConfigurator {
    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let (path, precision, compression) = match value {
            Value::Null => return Err(ctx.missing()),
            Value::Str(path) => (path.clone(), None, None),
            Value::Table(table) => {
                let path = table.get("path").ok_or_else(|| ctx.missing())?;
                let path = path.as_str().ok_or_else(|| ctx.wrong_type("a file path", path))?;
                (path.to_string(), table.get("precision"), table.get("compression"))
            }
            other => return Err(ctx.wrong_type("a file path or a table", other)),
        };
        let precision = match precision.and_then(Value::as_str) {
            None => Precision::default(),
            Some(p) if p.eq_ignore_ascii_case("f64") || p.eq_ignore_ascii_case("float64") => {
                Precision::F64
            }
            Some(p) if p.eq_ignore_ascii_case("f32") || p.eq_ignore_ascii_case("float32") => {
                Precision::F32
            }
            Some(p) => {
                return Err(ConfigError::UnknownChoice {
                    name: ctx.name(),
                    value: p.to_string(),
                    choices: vec!["f32".into(), "f64".into()],
                });
            }
        };
        let compression = match compression {
            None | Some(Value::Null) => Compression::None,
            Some(v) => match v.as_bool() {
                Some(true) => Compression::Deflate,
                Some(false) => Compression::None,
                None => return Err(ctx.wrong_type("a boolean", v)),
            },
        };
        Ok(Configured::OutputTrajectory(OutputTrajectory {
            path: PathBuf::from(path),
            precision,
            compression,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunningMode {
    #[default]
    Monoprocessor,
    Multiprocessor(usize),
}

impl RunningMode {
    pub fn workers(&self) -> usize {
        match self {
            RunningMode::Monoprocessor => 1,
            RunningMode::Multiprocessor(n) => *n,
        }
    }
}

fn available_workers() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

#[derive(Debug)]
struct RunningModeConfigurator;

pub fn running_mode(_: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(RunningModeConfigurator))
}

impl Configurator for RunningModeConfigurator {
    fn default_value(&self) -> Value {
        Value::from("monoprocessor")
    }

    fn choices(&self) -> Option<Vec<String>> {
        Some(vec!["monoprocessor".into(), "multiprocessor".into()])
    }

    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let (mode, workers) = match value {
            Value::Str(mode) => (mode.as_str(), None),
            Value::List(items) if (1..=2).contains(&items.len()) => {
                let mode = items[0]
                    .as_str()
                    .ok_or_else(|| ctx.wrong_type("a mode name", &items[0]))?;
                (mode, items.get(1))
            }
            Value::Table(table) => {
                let mode = table.get("mode").and_then(Value::as_str).ok_or_else(|| ctx.missing())?;
                (mode, table.get("workers"))
            }
            Value::Null => (MONO, None),
            other => return Err(ctx.wrong_type("a mode name, [mode, workers] or a table", other)),
        };
        let mode = match mode.to_ascii_lowercase().as_str() {
            MONO => RunningMode::Monoprocessor,
            MULTI => {
                let requested = match workers {
                    None | Some(Value::Null) => 0,
                    Some(v) => v.as_i64().ok_or_else(|| ctx.wrong_type("an integer", v))?,
                };
                let workers = match requested {
                    0 => available_workers(),
                    n if n > 0 => n as usize,
                    n => {
                        return Err(ConfigError::OutOfRange {
                            name: ctx.name(),
                            value: n.to_string(),
                            min: Some("0".into()),
                            max: None,
                        });
                    }
                };
                RunningMode::Multiprocessor(workers)
            }
            "remote" => return Err(ctx.invalid("remote execution is not supported")),
            other => {
                return Err(ConfigError::UnknownChoice {
                    name: ctx.name(),
                    value: other.to_string(),
                    choices: vec![MONO.into(), MULTI.into()],
                });
            }
        };
        Ok(Configured::RunningMode(mode))
    }
}

const MONO: &str = "monoprocessor";
const MULTI: &str = "multiprocessor";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::configurators::{Parameters, resolve};
    use crate::engine::testing::{test_engine, water_box};
    use tempfile::tempdir;

    fn frame_settings() -> Vec<Setting> {
        vec![
            Setting::new("trajectory", INPUT_FILE),
            Setting::new("frames", FRAMES).depends_on("trajectory", "trajectory"),
        ]
    }

    fn params(path: &std::path::Path, frames: Value) -> Parameters {
        Parameters::from([
            ("trajectory".to_string(), Value::from(path.display().to_string())),
            ("frames".to_string(), frames),
        ])
    }

    #[test]
    fn frames_default_to_the_whole_trajectory() {
        let dir = tempdir().unwrap();
        let path = water_box(dir.path(), 2, 10, true, false);
        let engine = test_engine();
        let config = resolve(&engine, &frame_settings(), &params(&path, Value::Null)).unwrap();
        let frames: &FrameSelection = config.get("frames").unwrap();
        assert_eq!(frames.number(), 10);
        assert_eq!(frames.duration[0], 0.0);
        let input: &InputTrajectory = config.get("trajectory").unwrap();
        assert!(input.periodic);
        assert!(!input.has_velocities);
        assert_eq!(input.system.number_of_atoms(), 24);
    }

    #[test]
    fn negative_indices_count_from_the_end() {
        let dir = tempdir().unwrap();
        let path = water_box(dir.path(), 1, 10, false, false);
        let engine = test_engine();
        let frames = Value::List(vec![Value::Int(-6), Value::Null, Value::Int(2)]);
        let config = resolve(&engine, &frame_settings(), &params(&path, frames)).unwrap();
        let frames: &FrameSelection = config.get("frames").unwrap();
        assert_eq!(frames.indices, [4, 6, 8]);
        assert!((frames.time_step - 2.0 * 0.1).abs() < 1e-12);
        assert!((frames.duration[2] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn empty_frame_ranges_are_invalid() {
        let dir = tempdir().unwrap();
        let path = water_box(dir.path(), 1, 5, false, false);
        let engine = test_engine();
        let frames = Value::from([("first", 3), ("last", 3)]);
        let err = resolve(&engine, &frame_settings(), &params(&path, frames)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "frames", .. }));
    }

    #[test]
    fn frame_index_is_bounded_by_the_selected_frames() {
        let dir = tempdir().unwrap();
        let path = water_box(dir.path(), 1, 6, false, false);
        let engine = test_engine();
        let mut settings = frame_settings();
        settings.push(Setting::new("reference", FRAME_INDEX).depends_on("frames", "frames"));
        let every_other = Value::List(vec![Value::Int(0), Value::Null, Value::Int(2)]);

        let mut parameters = params(&path, every_other.clone());
        parameters.insert("reference".to_string(), Value::Int(2));
        let config = resolve(&engine, &settings, &parameters).unwrap();
        assert_eq!(*config.get::<i64>("reference").unwrap(), 2);

        parameters.insert("reference".to_string(), Value::Int(3));
        let err = resolve(&engine, &settings, &parameters).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange { name: "reference", ref max, .. }
                if max.as_deref() == Some("2")
        ));

        let defaulted = resolve(&engine, &settings, &params(&path, every_other)).unwrap();
        assert_eq!(*defaulted.get::<i64>("reference").unwrap(), 0);
    }

    #[test]
    fn output_formats_must_be_registered() {
        let engine = test_engine();
        let settings = vec![Setting::new("output_files", OUTPUT_FILES)];
        let good = Parameters::from([(
            "output_files".to_string(),
            Value::from([
                ("root", Value::from("out/eisf")),
                ("formats", Value::from(vec!["hdf", "ascii", "HDF"])),
            ]),
        )]);
        let config = resolve(&engine, &settings, &good).unwrap();
        let files: &OutputFiles = config.get("output_files").unwrap();
        assert_eq!(files.formats, ["HDF", "ASCII"]);
        assert!(!files.log);

        let bad = Parameters::from([(
            "output_files".to_string(),
            Value::from([("root", Value::from("x")), ("formats", Value::from(vec!["pdf"]))]),
        )]);
        assert!(matches!(
            resolve(&engine, &settings, &bad),
            Err(ConfigError::UnknownChoice { .. })
        ));
        assert_eq!(
            resolve(&engine, &settings, &Parameters::new()).unwrap_err(),
            ConfigError::MissingParameter("output_files")
        );
    }

    #[test]
    fn running_modes() {
        let engine = test_engine();
        let settings = vec![Setting::new("running_mode", RUNNING_MODE)];
        let config = resolve(&engine, &settings, &Parameters::new()).unwrap();
        assert_eq!(*config.get::<RunningMode>("running_mode").unwrap(), RunningMode::Monoprocessor);

        let multi = Parameters::from([(
            "running_mode".to_string(),
            Value::List(vec![Value::from("multiprocessor"), Value::Int(3)]),
        )]);
        let config = resolve(&engine, &settings, &multi).unwrap();
        assert_eq!(config.get::<RunningMode>("running_mode").unwrap().workers(), 3);

        let remote = Parameters::from([("running_mode".to_string(), Value::from("remote"))]);
        assert!(matches!(
            resolve(&engine, &settings, &remote),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
