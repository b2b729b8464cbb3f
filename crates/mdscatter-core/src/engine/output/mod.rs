//! Analysis results and the file formats they are written in.
//!
//! An analysis fills an [`OutputData`] with named, shaped `f64` variables; each variable
//! carries its units and the names of the variables that index its axes. The writer then
//! dispatches the whole set to every requested [`OutputFormat`].

pub mod ascii;
pub mod store;
pub mod svg;

use crate::core::io::store::StoreError;
use crate::core::registry::{Registry, RegistryError};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("CSV error on '{path}': {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("Plotting '{variable}' failed: {reason}")]
    Plot { variable: String, reason: String },
    #[error("Output variable '{0}' is already defined")]
    DuplicateVariable(String),
    #[error("Output variable '{0}' is not defined")]
    UnknownVariable(String),
    #[error("Output variable '{name}' has shape {shape:?} but {found} values")]
    ShapeMismatch {
        name: String,
        shape: Vec<usize>,
        found: usize,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("No output format requested")]
    NoFormat,
}

pub(crate) fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> FormatError + '_ {
    move |source| FormatError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// A named, row-major array of results.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputVariable {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
    pub units: String,
    /// Variables indexing each dimension, e.g. `["time"]` or `["q", "omega"]`.
    pub axis: Vec<String>,
    pub attributes: BTreeMap<String, String>,
}

impl OutputVariable {
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Row `i` of a rank-2 variable.
    pub fn row(&self, i: usize) -> Option<&[f64]> {
        match self.shape.as_slice() {
            [rows, cols] if i < *rows => Some(&self.data[i * cols..(i + 1) * cols]),
            _ => None,
        }
    }
}

/// Ordered collection of output variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputData {
    variables: Vec<OutputVariable>,
}

impl OutputData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a zero-filled variable and returns it for filling.
    pub fn add(
        &mut self,
        name: &str,
        shape: &[usize],
        units: &str,
        axis: &[&str],
    ) -> Result<&mut OutputVariable, FormatError> {
        if self.get(name).is_some() {
            return Err(FormatError::DuplicateVariable(name.to_string()));
        }
        self.variables.push(OutputVariable {
            name: name.to_string(),
            shape: shape.to_vec(),
            data: vec![0.0; shape.iter().product()],
            units: units.to_string(),
            axis: axis.iter().map(|a| a.to_string()).collect(),
            attributes: BTreeMap::new(),
        });
        let last = self.variables.len() - 1;
        Ok(&mut self.variables[last])
    }

    /// Adds a one-dimensional variable holding `values`.
    pub fn add_line(
        &mut self,
        name: &str,
        values: Vec<f64>,
        units: &str,
        axis: &[&str],
    ) -> Result<(), FormatError> {
        let variable = self.add(name, &[values.len()], units, axis)?;
        variable.data = values;
        Ok(())
    }

    /// Adds a variable of arbitrary shape holding `values`.
    pub fn add_array(
        &mut self,
        name: &str,
        shape: &[usize],
        values: Vec<f64>,
        units: &str,
        axis: &[&str],
    ) -> Result<(), FormatError> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(FormatError::ShapeMismatch {
                name: name.to_string(),
                shape: shape.to_vec(),
                found: values.len(),
            });
        }
        let variable = self.add(name, shape, units, axis)?;
        variable.data = values;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&OutputVariable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut OutputVariable> {
        self.variables.iter_mut().find(|v| v.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputVariable> {
        self.variables.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|v| v.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

pub trait OutputFormat: Send + Sync {
    fn name(&self) -> &'static str;

    fn extension(&self) -> &'static str;

    /// Writes `data` under `root` and returns the files produced.
    fn write(
        &self,
        root: &Path,
        data: &OutputData,
        header: &str,
    ) -> Result<Vec<PathBuf>, FormatError>;
}

pub type FormatFactory = fn() -> Box<dyn OutputFormat>;

pub fn registry() -> Registry<FormatFactory> {
    let mut registry: Registry<FormatFactory> = Registry::new("output format");
    let entries: [(&str, FormatFactory); 4] = [
        (store::HDF_NAME, store::create_hdf),
        (store::NETCDF_NAME, store::create_netcdf),
        (ascii::NAME, ascii::create),
        (svg::NAME, svg::create),
    ];
    for (name, factory) in entries {
        // Names are distinct constants.
        let _ = registry.register(name, factory);
    }
    registry
}

/// `root` with `suffix` appended verbatim, keeping any dots already in the name.
pub fn with_suffix(root: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = root.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Writes `data` in every format of `formats`.
pub fn write_output(
    registry: &Registry<FormatFactory>,
    root: &Path,
    formats: &[String],
    data: &OutputData,
    header: &str,
) -> Result<Vec<PathBuf>, FormatError> {
    if formats.is_empty() {
        return Err(FormatError::NoFormat);
    }
    if let Some(parent) = root.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    let mut written = Vec::new();
    for name in formats {
        let format = registry.get(name)?();
        let files = format.write(root, data, header)?;
        info!(format = format.name(), files = files.len(), "Output written.");
        written.extend(files);
    }
    Ok(written)
}
