use crate::error::{CliError, Result};
use mdscatter::core::value::Value;
use mdscatter::engine::configurators::Parameters;
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// A job parameter file: one top-level key per job parameter, plus an optional `job`
/// naming the analysis the file was written for.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct JobFile {
    pub job: Option<String>,
    #[serde(flatten)]
    pub parameters: toml::Table,
}

impl JobFile {
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading job parameters from file: {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content).map_err(|e| CliError::FileParsing {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Fails when the file names a different job than the one being run.
    pub fn check_job(&self, job: &str) -> Result<()> {
        match &self.job {
            Some(expected) if !expected.eq_ignore_ascii_case(job) => Err(CliError::Config(format!(
                "The parameter file is written for job '{expected}', not '{job}'."
            ))),
            _ => Ok(()),
        }
    }

    pub fn into_parameters(self) -> Parameters {
        self.parameters
            .into_iter()
            .map(|(key, value)| (key, Value::from(value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EISF_FILE: &str = r#"
job = "eisf"
trajectory = "water.mdt"
frames = [0, 100, 2]
weights = "b_incoherent"

[output_files]
root = "out/eisf"
formats = ["HDF", "ASCII"]
"#;

    #[test]
    fn keys_become_parameters() {
        let file = JobFile::from_toml(EISF_FILE).unwrap();
        assert_eq!(file.job.as_deref(), Some("eisf"));

        let parameters = file.into_parameters();
        assert_eq!(parameters.len(), 4);
        assert_eq!(parameters["trajectory"], Value::from("water.mdt"));
        assert_eq!(
            parameters["frames"],
            Value::List(vec![Value::Int(0), Value::Int(100), Value::Int(2)])
        );
        assert_eq!(
            parameters["output_files"].get("root"),
            Some(&Value::from("out/eisf"))
        );
    }

    #[test]
    fn job_mismatch_is_reported() {
        let file = JobFile::from_toml(EISF_FILE).unwrap();
        assert!(file.check_job("EISF").is_ok());
        assert!(matches!(file.check_job("msd"), Err(CliError::Config(_))));
        assert!(JobFile::default().check_job("msd").is_ok());
    }

    #[test]
    fn unreadable_files_name_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "frames = [0, 1").unwrap();
        assert!(matches!(
            JobFile::from_file(&path),
            Err(CliError::FileParsing { .. })
        ));
    }
}
