use super::store::{ArrayData, Compression, Dtype, StoreWriter};
use super::trajectory::{
    CONFIGURATION_GROUP, METADATA_GROUP, TIME, TrajectoryError, UNIT_CELL, variable_path,
};
use crate::core::models::configuration::{COORDINATES, Configuration};
use crate::core::models::system::ChemicalSystem;
use crate::core::utils::units::conversion_factor;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F32,
    #[default]
    F64,
}

/// Units of the values handed to [`TrajectoryWriter::dump_configuration`]; they are
/// converted to nm and ps before writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameUnits {
    pub length: String,
    pub time: String,
}

impl Default for FrameUnits {
    fn default() -> Self {
        Self {
            length: "nm".to_string(),
            time: "ps".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrajectoryWriterOptions {
    /// Atoms to keep, in the source system's numbering. `None` keeps all atoms.
    pub selected_atoms: Option<Vec<usize>>,
    pub precision: Precision,
    pub compression: Compression,
}

/// Appends frames to a new trajectory store.
///
/// The chemical system (restricted to the selected atoms) is written once at creation. The
/// first dumped frame fixes periodicity and the set of per-atom variables; later frames must
/// match it.
pub struct TrajectoryWriter {
    store: StoreWriter,
    selection: Option<Vec<usize>>,
    source_atoms: usize,
    n_steps: usize,
    frames_written: usize,
    precision: Precision,
    compression: Compression,
    layout: Option<(bool, BTreeSet<String>)>,
}

impl TrajectoryWriter {
    pub fn create(
        path: &Path,
        system: &ChemicalSystem,
        n_steps: usize,
        options: TrajectoryWriterOptions,
    ) -> Result<Self, TrajectoryError> {
        let mut store = StoreWriter::create(path)?;
        let selection = match options.selected_atoms {
            Some(mut atoms) => {
                atoms.sort_unstable();
                atoms.dedup();
                if atoms.is_empty() {
                    return Err(TrajectoryError::EmptySelection);
                }
                Some(atoms)
            }
            None => None,
        };
        match &selection {
            Some(atoms) => system.subset(atoms)?.serialize(&mut store)?,
            None => system.serialize(&mut store)?,
        }
        store.create_group(CONFIGURATION_GROUP)?;
        store.create_group(METADATA_GROUP)?;
        store.set_attribute(CONFIGURATION_GROUP, "expected_frames", &n_steps.to_string());
        debug!(path = %path.display(), n_steps, "Created trajectory store.");
        Ok(Self {
            store,
            selection,
            source_atoms: system.number_of_atoms(),
            n_steps,
            frames_written: 0,
            precision: options.precision,
            compression: options.compression,
            layout: None,
        })
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    pub fn set_metadata(&mut self, key: &str, value: &str) {
        self.store.set_attribute(METADATA_GROUP, key, value);
    }

    /// Appends one frame taken at `time`.
    pub fn dump_configuration(
        &mut self,
        configuration: &Configuration,
        time: f64,
        units: &FrameUnits,
    ) -> Result<(), TrajectoryError> {
        if configuration.n_atoms() != self.source_atoms {
            return Err(TrajectoryError::IncompatibleChemicalSystem {
                expected: self.source_atoms,
                found: configuration.n_atoms(),
            });
        }
        let length_factor = conversion_factor(&units.length, "nm")?;
        let time_factor = conversion_factor(&units.time, "ps")?;
        let velocity_factor = length_factor / time_factor;

        let names: BTreeSet<String> = configuration
            .variable_names()
            .into_iter()
            .filter(|n| *n != COORDINATES)
            .map(str::to_string)
            .collect();
        let periodic = configuration.is_periodic();
        let established = self
            .layout
            .as_ref()
            .map(|(p, declared)| (*p, declared.difference(&names).next().cloned()));
        match established {
            None => self.declare_layout(periodic, &names)?,
            Some((was_periodic, _)) if was_periodic != periodic => {
                return Err(TrajectoryError::InconsistentPeriodicity {
                    index: self.frames_written,
                });
            }
            Some((_, Some(missing))) => return Err(TrajectoryError::MissingVariable(missing)),
            Some(_) => {}
        }

        let coordinates = self.pack(configuration.coordinates(), length_factor);
        self.store
            .append(&variable_path(COORDINATES), &coordinates)?;
        let declared = self
            .layout
            .as_ref()
            .map(|(_, d)| d.clone())
            .unwrap_or_default();
        for name in &declared {
            let factor = if name == "gradients" {
                1.0
            } else {
                velocity_factor
            };
            let data = self.pack(configuration.variable(name)?, factor);
            self.store.append(&variable_path(name), &data)?;
        }
        if let Some(cell) = configuration.unit_cell() {
            let flat: Vec<f64> = cell.to_row_vec().iter().map(|v| v * length_factor).collect();
            self.store
                .append(&variable_path(UNIT_CELL), &ArrayData::F64(flat))?;
        }
        self.store
            .append(&variable_path(TIME), &ArrayData::F64(vec![time * time_factor]))?;
        self.frames_written += 1;
        Ok(())
    }

    fn declare_layout(
        &mut self,
        periodic: bool,
        names: &BTreeSet<String>,
    ) -> Result<(), TrajectoryError> {
        let n = self.selection.as_ref().map_or(self.source_atoms, Vec::len);
        let dtype = match self.precision {
            Precision::F32 => Dtype::F32,
            Precision::F64 => Dtype::F64,
        };
        for name in std::iter::once(COORDINATES).chain(names.iter().map(String::as_str)) {
            let path = variable_path(name);
            self.store
                .create_dataset(&path, dtype, &[n, 3], self.compression)?;
            let units = match name {
                COORDINATES => "nm",
                "gradients" => "au",
                _ => "nm/ps",
            };
            self.store.set_attribute(&path, "units", units);
        }
        if periodic {
            let path = variable_path(UNIT_CELL);
            self.store
                .create_dataset(&path, Dtype::F64, &[3, 3], Compression::None)?;
            self.store.set_attribute(&path, "units", "nm");
        }
        let path = variable_path(TIME);
        self.store
            .create_dataset(&path, Dtype::F64, &[], Compression::None)?;
        self.store.set_attribute(&path, "units", "ps");
        self.layout = Some((periodic, names.clone()));
        Ok(())
    }

    fn pack(&self, rows: &[Vector3<f64>], factor: f64) -> ArrayData {
        let picked: Vec<&Vector3<f64>> = match &self.selection {
            Some(atoms) => atoms.iter().map(|&i| &rows[i]).collect(),
            None => rows.iter().collect(),
        };
        let values = picked
            .into_iter()
            .flat_map(|r| [r.x * factor, r.y * factor, r.z * factor]);
        match self.precision {
            Precision::F32 => ArrayData::F32(values.map(|v| v as f32).collect()),
            Precision::F64 => ArrayData::F64(values.collect()),
        }
    }

    pub fn close(self) -> Result<(), TrajectoryError> {
        if self.frames_written != self.n_steps {
            warn!(
                expected = self.n_steps,
                written = self.frames_written,
                "Trajectory closed with a different number of frames than announced."
            );
        }
        self.store.close()?;
        Ok(())
    }
}
