use crate::error::{CliError, Result};
use directories::ProjectDirs;
use mdscatter::core::atoms::AtomsDatabase;
use mdscatter::engine::configurators::Instrument;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const ATOMS_FILE: &str = "atoms.json";
const SETTINGS_FILE: &str = "settings.toml";

/// Contents of the user `settings.toml`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserSettings {
    #[serde(default)]
    pub instruments: Vec<Instrument>,
}

/// The per-user data directory: the editable atoms database and the settings file.
#[derive(Debug)]
pub struct DataManager {
    base_path: PathBuf,
}

impl DataManager {
    pub fn new() -> Result<Self> {
        let path = Self::determine_data_path()?;
        debug!("DataManager initialized with path: {:?}", &path);
        Ok(Self { base_path: path })
    }

    #[cfg(test)]
    pub fn at(base_path: &Path) -> Self {
        Self {
            base_path: base_path.to_path_buf(),
        }
    }

    pub fn get_data_path(&self) -> &Path {
        &self.base_path
    }

    pub fn atoms_path(&self) -> PathBuf {
        self.base_path.join(ATOMS_FILE)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.base_path.join(SETTINGS_FILE)
    }

    /// The user atoms database when one was saved, the built-in one otherwise.
    pub fn load_atoms(&self) -> Result<AtomsDatabase> {
        let path = self.atoms_path();
        if path.exists() {
            debug!("Loading user atoms database from {:?}", &path);
            Ok(AtomsDatabase::load(&path)?)
        } else {
            Ok(AtomsDatabase::builtin()?)
        }
    }

    pub fn save_atoms(&self, database: &AtomsDatabase) -> Result<()> {
        fs::create_dir_all(&self.base_path)?;
        database.save(&self.atoms_path())?;
        info!("Saved atoms database to {:?}", self.atoms_path());
        Ok(())
    }

    pub fn load_settings(&self) -> Result<UserSettings> {
        let path = self.settings_path();
        if !path.exists() {
            return Ok(UserSettings::default());
        }
        let content = fs::read_to_string(&path)?;
        toml::from_str(&content).map_err(|e| CliError::FileParsing {
            path,
            source: e.into(),
        })
    }

    pub fn set_custom_path(path: &Path) -> Result<()> {
        if !path.is_absolute() {
            return Err(CliError::Argument(format!(
                "The data path must be absolute: {}",
                path.display()
            )));
        }
        let config_path = Self::get_path_config_file()?;
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(config_path, path.to_string_lossy().as_bytes()).map_err(CliError::from)
    }

    pub fn reset_path() -> Result<()> {
        if let Ok(config_path) = Self::get_path_config_file() {
            if config_path.exists() {
                fs::remove_file(config_path)?;
            }
        }
        Ok(())
    }

    fn determine_data_path() -> Result<PathBuf> {
        match Self::get_path_config_file() {
            Ok(config_path) if config_path.exists() => {
                let custom_path_str = fs::read_to_string(&config_path)?.trim().to_string();
                if custom_path_str.is_empty() {
                    warn!("Custom path config file is empty, falling back to default path.");
                    Self::get_default_data_path()
                } else {
                    Ok(PathBuf::from(custom_path_str))
                }
            }
            _ => Self::get_default_data_path(),
        }
    }

    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("org", "mdscatter", "mdscatter")
    }

    fn get_path_config_file() -> Result<PathBuf> {
        Self::project_dirs()
            .map(|dirs| dirs.config_dir().join("path.conf"))
            .ok_or_else(|| CliError::Data("Could not determine config directory path.".to_string()))
    }

    fn get_default_data_path() -> Result<PathBuf> {
        Self::project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| {
                CliError::Data("Could not determine default data directory path.".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdscatter::core::atoms::PropertyType;
    use mdscatter::core::value::Value;
    use tempfile::tempdir;

    #[test]
    fn missing_user_files_fall_back_to_builtins() {
        let dir = tempdir().unwrap();
        let manager = DataManager::at(&dir.path().join("absent"));
        assert!(manager.load_atoms().unwrap().has_atom("O"));
        assert_eq!(manager.load_settings().unwrap(), UserSettings::default());
    }

    #[test]
    fn saved_atoms_are_loaded_back() {
        let dir = tempdir().unwrap();
        let manager = DataManager::at(&dir.path().join("data"));
        let mut atoms = manager.load_atoms().unwrap();
        atoms.add_property("spin", PropertyType::Float).unwrap();
        manager.save_atoms(&atoms).unwrap();

        let reloaded = manager.load_atoms().unwrap();
        assert!(reloaded.has_property("spin"));
        assert!(manager.atoms_path().exists());
    }

    #[test]
    fn instruments_are_read_from_settings() {
        let dir = tempdir().unwrap();
        let manager = DataManager::at(dir.path());
        fs::write(
            manager.settings_path(),
            r#"
[[instruments]]
name = "IN16B"
description = "backscattering"
resolution = ["gaussian", { sigma = 0.001 }]
"#,
        )
        .unwrap();

        let settings = manager.load_settings().unwrap();
        assert_eq!(settings.instruments.len(), 1);
        let instrument = &settings.instruments[0];
        assert_eq!(instrument.name, "IN16B");
        let resolution = instrument.resolution.as_ref().unwrap().as_list().unwrap();
        assert_eq!(resolution[0], Value::from("gaussian"));
    }

    #[test]
    fn malformed_settings_name_the_file() {
        let dir = tempdir().unwrap();
        let manager = DataManager::at(dir.path());
        fs::write(manager.settings_path(), "instruments = 3").unwrap();
        assert!(matches!(
            manager.load_settings(),
            Err(CliError::FileParsing { .. })
        ));
    }
}
