use super::{DefaultsConfig, JobFile, JobRequest};
use crate::error::{CliError, Result};
use crate::utils::parser;
use mdscatter::core::value::Value;
use mdscatter::engine::configurators::{Parameters, Setting};
use std::path::Path;
use tracing::debug;

const TRAJECTORY: &str = "trajectory";
const OUTPUT_FILES: &str = "output_files";
const OUTPUT_TRAJECTORY: &str = "output_trajectory";
const RUNNING_MODE: &str = "running_mode";

/// Layers parameter sources in increasing priority: file, `--set`, then `-i`/`-o`.
/// CLI defaults only fill parameters still absent at [`ParameterBuilder::build`].
pub struct ParameterBuilder<'a> {
    job: String,
    settings: &'a [Setting],
    parameters: Parameters,
}

impl<'a> ParameterBuilder<'a> {
    pub fn new(job: &str, settings: &'a [Setting]) -> Self {
        Self {
            job: job.to_string(),
            settings,
            parameters: Parameters::new(),
        }
    }

    fn declares(&self, name: &str) -> bool {
        self.settings.iter().any(|s| s.name == name)
    }

    pub fn file(mut self, file: JobFile) -> Result<Self> {
        file.check_job(&self.job)?;
        self.parameters.extend(file.into_parameters());
        Ok(self)
    }

    pub fn assignments(mut self, pairs: &[String]) -> Result<Self> {
        for pair in pairs {
            let (key, value) =
                parser::parse_assignment(pair).map_err(|e| CliError::Config(e.to_string()))?;
            debug!("Override from --set: {} = {:?}", key, value);
            self.parameters.insert(key, value);
        }
        Ok(self)
    }

    pub fn input(mut self, path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !self.declares(TRAJECTORY) {
                return Err(CliError::Argument(format!(
                    "Job '{}' does not read a trajectory.",
                    self.job
                )));
            }
            self.parameters
                .insert(TRAJECTORY.to_string(), path_value(path));
        }
        Ok(self)
    }

    /// Sets the output root, keeping the formats and other fields of a table or list form.
    /// Jobs that write a trajectory instead of result files get their destination path.
    pub fn output(mut self, path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(self);
        };
        let root = path_value(path);
        if self.declares(OUTPUT_FILES) {
            let merged = match self.parameters.remove(OUTPUT_FILES) {
                Some(Value::Table(mut table)) => {
                    table.insert("root".to_string(), root);
                    Value::Table(table)
                }
                Some(Value::List(mut items)) if !items.is_empty() => {
                    items[0] = root;
                    Value::List(items)
                }
                _ => root,
            };
            self.parameters.insert(OUTPUT_FILES.to_string(), merged);
        } else if self.declares(OUTPUT_TRAJECTORY) {
            let merged = match self.parameters.remove(OUTPUT_TRAJECTORY) {
                Some(Value::Table(mut table)) => {
                    table.insert("path".to_string(), root);
                    Value::Table(table)
                }
                _ => root,
            };
            self.parameters.insert(OUTPUT_TRAJECTORY.to_string(), merged);
        } else {
            return Err(CliError::Argument(format!(
                "Job '{}' does not write output files.",
                self.job
            )));
        }
        Ok(self)
    }

    pub fn build(mut self, defaults: &DefaultsConfig) -> JobRequest {
        if self.declares(RUNNING_MODE) && !self.parameters.contains_key(RUNNING_MODE) {
            if let Some(mode) = defaults.running_mode() {
                self.parameters.insert(RUNNING_MODE.to_string(), mode);
            }
        }
        JobRequest {
            job: self.job,
            parameters: self.parameters,
        }
    }
}

fn path_value(path: &Path) -> Value {
    Value::from(path.to_string_lossy().as_ref())
}
