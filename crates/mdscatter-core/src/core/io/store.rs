//! HDF5 container backing trajectories and analysis results.
//!
//! Dataset and group names are `/`-separated paths such as `configuration/coordinates`,
//! relative to the file root. Extensible datasets grow along their first axis and are
//! chunked so a single frame can be read without touching the rest of the file.
//! Attributes are scalar UTF-8 strings.
//!
//! [`StoreReader::open`] walks the file once and keeps shapes, dtypes and string
//! attributes in memory; numeric payloads are always read on demand.

use hdf5::types::VarLenUnicode;
use hdf5::{
    Dataset, Datatype, Extent, Extents, File as H5File, Group, H5Type, Location, SimpleExtents,
};
use ndarray::{ArrayD, ArrayView, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Path of the root group, for attributes set on the file itself.
pub const ROOT: &str = "/";
const DEFLATE_LEVEL: u8 = 4;
const CHUNK_BYTES: usize = 1 << 20;
const MAX_CHUNK_ROWS: usize = 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("HDF5 error in '{path}': {source}")]
    Hdf5 { path: String, source: hdf5::Error },
    #[error("Corrupt store '{path}': {reason}")]
    Corrupt { path: String, reason: String },
    #[error("Dataset not found: '{0}'")]
    MissingDataset(String),
    #[error("Dataset already exists: '{0}'")]
    DatasetExists(String),
    #[error("Dataset '{dataset}' stores {expected:?} values, got {found:?}")]
    DtypeMismatch {
        dataset: String,
        expected: Dtype,
        found: Dtype,
    },
    #[error("Dataset '{dataset}' expects a multiple of {row_len} values, got {found}")]
    ShapeMismatch {
        dataset: String,
        row_len: usize,
        found: usize,
    },
    #[error("Rows {first}..{end} are out of range for dataset '{dataset}' with {rows} rows")]
    RowOutOfRange {
        dataset: String,
        first: usize,
        end: usize,
        rows: usize,
    },
    #[error("Dataset '{0}' does not hold numeric values")]
    NotNumeric(String),
    #[error("Dataset '{dataset}' has rank {rank}; row access supports ranks 1 to 3")]
    UnsupportedRank { dataset: String, rank: usize },
    #[error("String '{0}' cannot be stored: it contains a NUL byte")]
    InvalidString(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    F32,
    F64,
    I64,
    Str,
}

impl Dtype {
    fn of(datatype: &Datatype) -> Option<Self> {
        if datatype.is::<f32>() {
            Some(Dtype::F32)
        } else if datatype.is::<f64>() {
            Some(Dtype::F64)
        } else if datatype.is::<i64>() {
            Some(Dtype::I64)
        } else if datatype.is::<VarLenUnicode>() {
            Some(Dtype::Str)
        } else {
            None
        }
    }

    fn item_size(self) -> usize {
        match self {
            Dtype::F32 => 4,
            Dtype::F64 | Dtype::I64 | Dtype::Str => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Deflate,
}

/// Shape, dtype and attributes of one dataset. `shape[0]` is the row count.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetInfo {
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub attributes: BTreeMap<String, String>,
}

impl DatasetInfo {
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Number of scalar values per row.
    pub fn row_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }
}

#[derive(Debug, Default)]
struct Directory {
    groups: BTreeMap<String, BTreeMap<String, String>>,
    datasets: BTreeMap<String, DatasetInfo>,
}

/// A typed flat buffer, the unit of transfer in and out of the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I64(Vec<i64>),
    Str(Vec<String>),
}

impl ArrayData {
    pub fn dtype(&self) -> Dtype {
        match self {
            ArrayData::F32(_) => Dtype::F32,
            ArrayData::F64(_) => Dtype::F64,
            ArrayData::I64(_) => Dtype::I64,
            ArrayData::Str(_) => Dtype::Str,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::F32(v) => v.len(),
            ArrayData::F64(v) => v.len(),
            ArrayData::I64(v) => v.len(),
            ArrayData::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numeric values widened to `f64`; `None` for strings.
    pub fn into_f64(self) -> Option<Vec<f64>> {
        match self {
            ArrayData::F32(v) => Some(v.into_iter().map(f64::from).collect()),
            ArrayData::F64(v) => Some(v),
            ArrayData::I64(v) => Some(v.into_iter().map(|x| x as f64).collect()),
            ArrayData::Str(_) => None,
        }
    }
}

fn unicode(values: &[String]) -> Result<Vec<VarLenUnicode>, StoreError> {
    values
        .iter()
        .map(|s| {
            s.parse::<VarLenUnicode>()
                .map_err(|_| StoreError::InvalidString(s.clone()))
        })
        .collect()
}

fn h5_error(path: &Path) -> impl FnOnce(hdf5::Error) -> StoreError + '_ {
    move |source| StoreError::Hdf5 {
        path: path.to_string_lossy().to_string(),
        source,
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_string_lossy().to_string(),
        source,
    }
}

/// Splits `a/b/c` into the parent group path `a/b` and the leaf name `c`.
fn split_leaf(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some((parent, leaf)) => (parent, leaf),
        None => ("", path),
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Rows per chunk so that one chunk stays near [`CHUNK_BYTES`].
fn chunk_rows(dtype: Dtype, row_len: usize) -> usize {
    (CHUNK_BYTES / (row_len.max(1) * dtype.item_size())).clamp(1, MAX_CHUNK_ROWS)
}

fn read_rows_typed<T: H5Type + Clone>(
    dataset: &Dataset,
    rank: usize,
    first: usize,
    end: usize,
) -> hdf5::Result<Option<Vec<T>>> {
    let block: ArrayD<T> = match rank {
        1 => dataset.read_slice(first..end)?,
        2 => dataset.read_slice((first..end, ..))?,
        3 => dataset.read_slice((first..end, .., ..))?,
        _ => return Ok(None),
    };
    Ok(Some(block.iter().cloned().collect()))
}

fn write_rows_typed<T: H5Type>(
    dataset: &Dataset,
    values: &[T],
    block_shape: &[usize],
    first: usize,
) -> hdf5::Result<Option<()>> {
    let end = first + block_shape[0];
    let view = ArrayView::from_shape(IxDyn(block_shape), values)
        .map_err(|e| hdf5::Error::from(e.to_string()))?;
    match block_shape.len() {
        1 => dataset.write_slice(view, first..end)?,
        2 => dataset.write_slice(view, (first..end, ..))?,
        3 => dataset.write_slice(view, (first..end, .., ..))?,
        _ => return Ok(None),
    }
    Ok(Some(()))
}

/// Append-only writer. String attributes are buffered and written by
/// [`StoreWriter::close`].
pub struct StoreWriter {
    path: PathBuf,
    file: H5File,
    datasets: BTreeMap<String, DatasetInfo>,
    attributes: BTreeMap<String, BTreeMap<String, String>>,
}

impl StoreWriter {
    pub fn create(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        let file = H5File::create(path).map_err(h5_error(path))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            datasets: BTreeMap::new(),
            attributes: BTreeMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn group(&self, path: &str) -> Result<Group, StoreError> {
        let mut group = self.file.group(ROOT).map_err(h5_error(&self.path))?;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            group = match group.group(part) {
                Ok(child) => child,
                Err(_) => group.create_group(part).map_err(h5_error(&self.path))?,
            };
        }
        Ok(group)
    }

    pub fn create_group(&mut self, path: &str) -> Result<(), StoreError> {
        self.group(path).map(|_| ())
    }

    pub fn has_dataset(&self, path: &str) -> bool {
        self.datasets.contains_key(path)
    }

    /// Sets a string attribute on a dataset, a group (created at close if needed), or
    /// on the file with [`ROOT`].
    pub fn set_attribute(&mut self, target: &str, key: &str, value: &str) {
        self.attributes
            .entry(target.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Declares an extensible dataset whose rows have shape `row_shape`.
    pub fn create_dataset(
        &mut self,
        path: &str,
        dtype: Dtype,
        row_shape: &[usize],
        compression: Compression,
    ) -> Result<(), StoreError> {
        let mut extents = vec![Extent::resizable(0)];
        extents.extend(row_shape.iter().map(|&n| Extent::fixed(n)));
        let mut chunk = vec![chunk_rows(dtype, row_shape.iter().product())];
        chunk.extend(row_shape.iter().map(|&n| n.max(1)));
        let mut shape = vec![0];
        shape.extend_from_slice(row_shape);
        self.declare(path, dtype, shape, SimpleExtents::from_vec(extents), Some(chunk), compression)
    }

    fn declare(
        &mut self,
        path: &str,
        dtype: Dtype,
        shape: Vec<usize>,
        extents: SimpleExtents,
        chunk: Option<Vec<usize>>,
        compression: Compression,
    ) -> Result<(), StoreError> {
        if self.has_dataset(path) {
            return Err(StoreError::DatasetExists(path.to_string()));
        }
        let (parent, leaf) = split_leaf(path);
        let group = self.group(parent)?;
        let created = match dtype {
            Dtype::F32 => create_typed::<f32>(&group, leaf, extents, chunk, compression),
            Dtype::F64 => create_typed::<f64>(&group, leaf, extents, chunk, compression),
            Dtype::I64 => create_typed::<i64>(&group, leaf, extents, chunk, compression),
            Dtype::Str => create_typed::<VarLenUnicode>(&group, leaf, extents, chunk, compression),
        };
        created.map_err(h5_error(&self.path))?;
        self.datasets.insert(
            path.to_string(),
            DatasetInfo {
                dtype,
                shape,
                attributes: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Appends whole rows to an extensible dataset.
    pub fn append(&mut self, path: &str, data: &ArrayData) -> Result<(), StoreError> {
        let info = self
            .datasets
            .get(path)
            .ok_or_else(|| StoreError::MissingDataset(path.to_string()))?;
        if info.dtype != data.dtype() {
            return Err(StoreError::DtypeMismatch {
                dataset: path.to_string(),
                expected: info.dtype,
                found: data.dtype(),
            });
        }
        let row_len = info.row_len().max(1);
        if data.len() % row_len != 0 {
            return Err(StoreError::ShapeMismatch {
                dataset: path.to_string(),
                row_len,
                found: data.len(),
            });
        }
        let rows = data.len() / row_len;
        if rows == 0 {
            return Ok(());
        }
        let first = info.rows();
        let mut shape = info.shape.clone();
        shape[0] = first + rows;
        let mut block = info.shape.clone();
        block[0] = rows;

        let dataset = self.file.dataset(path).map_err(h5_error(&self.path))?;
        dataset.resize(shape.clone()).map_err(h5_error(&self.path))?;
        let written = match data {
            ArrayData::F32(v) => write_rows_typed(&dataset, v, &block, first),
            ArrayData::F64(v) => write_rows_typed(&dataset, v, &block, first),
            ArrayData::I64(v) => write_rows_typed(&dataset, v, &block, first),
            ArrayData::Str(v) => write_rows_typed(&dataset, &unicode(v)?, &block, first),
        };
        if written.map_err(h5_error(&self.path))?.is_none() {
            return Err(StoreError::UnsupportedRank {
                dataset: path.to_string(),
                rank: shape.len(),
            });
        }
        if let Some(info) = self.datasets.get_mut(path) {
            info.shape = shape;
        }
        Ok(())
    }

    /// Creates a fixed dataset of the given full shape and writes it in one go.
    pub fn write_dataset(
        &mut self,
        path: &str,
        shape: &[usize],
        data: &ArrayData,
        compression: Compression,
    ) -> Result<(), StoreError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() || shape.is_empty() {
            return Err(StoreError::ShapeMismatch {
                dataset: path.to_string(),
                row_len: expected,
                found: data.len(),
            });
        }
        let chunk = (compression != Compression::None && expected > 0).then(|| {
            let mut chunk = vec![chunk_rows(data.dtype(), shape[1..].iter().product())];
            chunk.extend(shape[1..].iter().map(|&n| n.max(1)));
            chunk[0] = chunk[0].min(shape[0].max(1));
            chunk
        });
        let extents = SimpleExtents::from_vec(shape.iter().map(|&n| Extent::fixed(n)).collect());
        self.declare(path, data.dtype(), shape.to_vec(), extents, chunk, compression)?;
        if data.is_empty() {
            return Ok(());
        }
        let dataset = self.file.dataset(path).map_err(h5_error(&self.path))?;
        match data {
            ArrayData::F32(v) => dataset.write_raw(v),
            ArrayData::F64(v) => dataset.write_raw(v),
            ArrayData::I64(v) => dataset.write_raw(v),
            ArrayData::Str(v) => dataset.write_raw(&unicode(v)?),
        }
        .map_err(h5_error(&self.path))
    }

    pub fn write_strings(&mut self, path: &str, values: &[String]) -> Result<(), StoreError> {
        self.write_dataset(
            path,
            &[values.len()],
            &ArrayData::Str(values.to_vec()),
            Compression::None,
        )
    }

    /// Writes the buffered attributes and flushes the file.
    pub fn close(self) -> Result<(), StoreError> {
        for (target, attributes) in &self.attributes {
            let written = if self.datasets.contains_key(target) {
                let dataset = self.file.dataset(target).map_err(h5_error(&self.path))?;
                write_attributes(&dataset, attributes)
            } else {
                let group = self.group(target)?;
                write_attributes(&group, attributes)
            };
            written.map_err(|e| match e {
                AttributeError::Hdf5(source) => StoreError::Hdf5 {
                    path: self.path.to_string_lossy().to_string(),
                    source,
                },
                AttributeError::Nul(value) => StoreError::InvalidString(value),
            })?;
        }
        self.file.flush().map_err(h5_error(&self.path))?;
        Ok(())
    }
}

fn create_typed<T: H5Type>(
    group: &Group,
    name: &str,
    extents: SimpleExtents,
    chunk: Option<Vec<usize>>,
    compression: Compression,
) -> hdf5::Result<Dataset> {
    let mut builder = group.new_dataset::<T>().shape(extents);
    if let Some(chunk) = chunk {
        builder = builder.chunk(chunk);
        if compression == Compression::Deflate {
            builder = builder.deflate(DEFLATE_LEVEL);
        }
    }
    builder.create(name)
}

enum AttributeError {
    Hdf5(hdf5::Error),
    Nul(String),
}

fn write_attributes(
    location: &Location,
    attributes: &BTreeMap<String, String>,
) -> Result<(), AttributeError> {
    for (key, value) in attributes {
        let text: VarLenUnicode = value
            .parse()
            .map_err(|_| AttributeError::Nul(value.clone()))?;
        location
            .new_attr::<VarLenUnicode>()
            .shape(Extents::Scalar)
            .create(key.as_str())
            .and_then(|attr| attr.write_scalar(&text))
            .map_err(AttributeError::Hdf5)?;
    }
    Ok(())
}

/// String-typed attributes of an object; attributes of other types are skipped.
fn read_attributes(location: &Location) -> hdf5::Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for name in location.attr_names()? {
        if let Ok(value) = location
            .attr(&name)
            .and_then(|attr| attr.read_scalar::<VarLenUnicode>())
        {
            out.insert(name, value.as_str().to_string());
        }
    }
    Ok(out)
}

fn scan(group: &Group, prefix: &str, directory: &mut Directory) -> hdf5::Result<()> {
    for name in group.member_names()? {
        let path = join(prefix, &name);
        if let Ok(dataset) = group.dataset(&name) {
            if let Some(dtype) = Dtype::of(&dataset.dtype()?) {
                let info = DatasetInfo {
                    dtype,
                    shape: dataset.shape(),
                    attributes: read_attributes(&dataset)?,
                };
                directory.datasets.insert(path, info);
            }
        } else if let Ok(child) = group.group(&name) {
            directory.groups.insert(path.clone(), read_attributes(&child)?);
            scan(&child, &path, directory)?;
        }
    }
    Ok(())
}

/// Read-only handle. [`StoreReader::reopen`] gives a second independent file handle
/// sharing the scanned directory.
pub struct StoreReader {
    path: PathBuf,
    file: H5File,
    directory: Arc<Directory>,
}

impl std::fmt::Debug for StoreReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreReader").field("path", &self.path).finish()
    }
}

impl StoreReader {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let file = H5File::open(path).map_err(h5_error(path))?;
        let mut directory = Directory::default();
        let root = file.group(ROOT).map_err(h5_error(path))?;
        directory
            .groups
            .insert(ROOT.to_string(), read_attributes(&root).map_err(h5_error(path))?);
        scan(&root, "", &mut directory).map_err(h5_error(path))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            directory: Arc::new(directory),
        })
    }

    pub fn reopen(&self) -> Result<Self, StoreError> {
        let file = H5File::open(&self.path).map_err(h5_error(&self.path))?;
        Ok(Self {
            path: self.path.clone(),
            file,
            directory: Arc::clone(&self.directory),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_group(&self, path: &str) -> bool {
        self.directory.groups.contains_key(path)
    }

    pub fn has_dataset(&self, path: &str) -> bool {
        self.directory.datasets.contains_key(path)
    }

    pub fn dataset(&self, path: &str) -> Result<&DatasetInfo, StoreError> {
        self.directory
            .datasets
            .get(path)
            .ok_or_else(|| StoreError::MissingDataset(path.to_string()))
    }

    /// Names of the datasets directly under `group`.
    pub fn datasets_in(&self, group: &str) -> Vec<&str> {
        let prefix = format!("{group}/");
        self.directory
            .datasets
            .keys()
            .filter_map(|k| k.strip_prefix(prefix.as_str()))
            .filter(|rest| !rest.contains('/'))
            .collect()
    }

    pub fn dataset_paths(&self) -> impl Iterator<Item = &str> {
        self.directory.datasets.keys().map(String::as_str)
    }

    pub fn group_attributes(&self, path: &str) -> Option<&BTreeMap<String, String>> {
        self.directory.groups.get(path)
    }

    /// Attribute lookup on a dataset first, then on a group of the same path.
    pub fn attribute(&self, target: &str, key: &str) -> Option<&str> {
        self.directory
            .datasets
            .get(target)
            .and_then(|d| d.attributes.get(key))
            .or_else(|| self.directory.groups.get(target).and_then(|g| g.get(key)))
            .map(String::as_str)
    }

    /// Reads rows `first..first + count` of a dataset.
    pub fn read_rows(
        &mut self,
        path: &str,
        first: usize,
        count: usize,
    ) -> Result<ArrayData, StoreError> {
        let info = self.dataset(path)?.clone();
        let end = first + count;
        if end > info.rows() {
            return Err(StoreError::RowOutOfRange {
                dataset: path.to_string(),
                first,
                end,
                rows: info.rows(),
            });
        }
        if first == 0 && end == info.rows() {
            return self.read_whole(path, &info);
        }
        let dataset = self.file.dataset(path).map_err(h5_error(&self.path))?;
        let rank = info.shape.len();
        let data = match info.dtype {
            Dtype::F32 => {
                read_rows_typed(&dataset, rank, first, end).map(|v| v.map(ArrayData::F32))
            }
            Dtype::F64 => {
                read_rows_typed(&dataset, rank, first, end).map(|v| v.map(ArrayData::F64))
            }
            Dtype::I64 => {
                read_rows_typed(&dataset, rank, first, end).map(|v| v.map(ArrayData::I64))
            }
            Dtype::Str => read_rows_typed::<VarLenUnicode>(&dataset, rank, first, end)
                .map(|v| {
                    v.map(|s| ArrayData::Str(s.iter().map(|x| x.as_str().to_string()).collect()))
                }),
        }
        .map_err(h5_error(&self.path))?
        .ok_or_else(|| StoreError::UnsupportedRank {
            dataset: path.to_string(),
            rank,
        })?;
        self.check_length(path, &data, count * info.row_len().max(1))?;
        Ok(data)
    }

    fn read_whole(&self, path: &str, info: &DatasetInfo) -> Result<ArrayData, StoreError> {
        let dataset = self.file.dataset(path).map_err(h5_error(&self.path))?;
        let data = match info.dtype {
            Dtype::F32 => dataset.read_raw::<f32>().map(ArrayData::F32),
            Dtype::F64 => dataset.read_raw::<f64>().map(ArrayData::F64),
            Dtype::I64 => dataset.read_raw::<i64>().map(ArrayData::I64),
            Dtype::Str => dataset.read_raw::<VarLenUnicode>().map(|values| {
                ArrayData::Str(values.iter().map(|s| s.as_str().to_string()).collect())
            }),
        }
        .map_err(h5_error(&self.path))?;
        self.check_length(path, &data, info.shape.iter().product())?;
        Ok(data)
    }

    fn check_length(
        &self,
        path: &str,
        data: &ArrayData,
        expected: usize,
    ) -> Result<(), StoreError> {
        if data.len() != expected {
            return Err(StoreError::Corrupt {
                path: self.path.to_string_lossy().to_string(),
                reason: format!(
                    "dataset '{path}' returned {} values instead of {expected}",
                    data.len()
                ),
            });
        }
        Ok(())
    }

    pub fn read_all(&mut self, path: &str) -> Result<ArrayData, StoreError> {
        let rows = self.dataset(path)?.rows();
        self.read_rows(path, 0, rows)
    }

    pub fn read_f64_rows(
        &mut self,
        path: &str,
        first: usize,
        count: usize,
    ) -> Result<Vec<f64>, StoreError> {
        self.read_rows(path, first, count)?
            .into_f64()
            .ok_or_else(|| StoreError::NotNumeric(path.to_string()))
    }

    pub fn read_f64(&mut self, path: &str) -> Result<Vec<f64>, StoreError> {
        let rows = self.dataset(path)?.rows();
        self.read_f64_rows(path, 0, rows)
    }

    pub fn read_strings(&mut self, path: &str) -> Result<Vec<String>, StoreError> {
        match self.read_all(path)? {
            ArrayData::Str(v) => Ok(v),
            other => Err(StoreError::DtypeMismatch {
                dataset: path.to_string(),
                expected: Dtype::Str,
                found: other.dtype(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const HDF5_SIGNATURE: &[u8; 8] = b"\x89HDF\r\n\x1a\n";

    #[test]
    fn write_and_read_back_datasets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.h5");
        let mut writer = StoreWriter::create(&path).unwrap();
        writer
            .create_dataset("configuration/coordinates", Dtype::F64, &[2, 3], Compression::None)
            .unwrap();
        let frame0: Vec<f64> = (0..6).map(f64::from).collect();
        let frame1: Vec<f64> = (6..12).map(f64::from).collect();
        writer
            .append("configuration/coordinates", &ArrayData::F64(frame0.clone()))
            .unwrap();
        writer
            .append("configuration/coordinates", &ArrayData::F64(frame1.clone()))
            .unwrap();
        writer.set_attribute("configuration/coordinates", "units", "nm");
        writer.set_attribute("metadata", "header", "job");
        writer.set_attribute(ROOT, "Conventions", "CF-1.8");
        writer
            .write_strings("chemical_system/atoms", &["a".to_string(), "bé".to_string()])
            .unwrap();
        writer.close().unwrap();

        let mut reader = StoreReader::open(&path).unwrap();
        let info = reader.dataset("configuration/coordinates").unwrap();
        assert_eq!(info.shape, [2, 2, 3]);
        assert_eq!(info.dtype, Dtype::F64);
        assert_eq!(reader.read_f64_rows("configuration/coordinates", 1, 1).unwrap(), frame1);
        assert_eq!(reader.read_f64("configuration/coordinates").unwrap().len(), 12);
        assert_eq!(reader.attribute("configuration/coordinates", "units"), Some("nm"));
        assert_eq!(reader.attribute("metadata", "header"), Some("job"));
        assert_eq!(reader.attribute(ROOT, "Conventions"), Some("CF-1.8"));
        assert!(reader.has_group("configuration"));
        assert_eq!(reader.read_strings("chemical_system/atoms").unwrap(), ["a", "bé"]);
        assert_eq!(reader.datasets_in("configuration"), ["coordinates"]);
    }

    #[test]
    fn files_carry_the_hdf5_signature() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sig.h5");
        let mut writer = StoreWriter::create(&path).unwrap();
        writer
            .write_dataset("q", &[3], &ArrayData::F64(vec![1.0, 2.0, 3.0]), Compression::None)
            .unwrap();
        writer.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..8], HDF5_SIGNATURE);
        let file = H5File::open(&path).unwrap();
        assert_eq!(file.dataset("q").unwrap().read_raw::<f64>().unwrap(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn compressed_datasets_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("z.h5");
        let mut writer = StoreWriter::create(&path).unwrap();
        let data: Vec<f32> = (0..300).map(|i| i as f32 * 0.5).collect();
        writer
            .write_dataset("x", &[100, 3], &ArrayData::F32(data.clone()), Compression::Deflate)
            .unwrap();
        writer.create_dataset("y", Dtype::I64, &[2], Compression::Deflate).unwrap();
        writer.append("y", &ArrayData::I64(vec![1, 2, 3, 4])).unwrap();
        writer.close().unwrap();

        let mut reader = StoreReader::open(&path).unwrap();
        assert_eq!(reader.read_all("x").unwrap(), ArrayData::F32(data));
        let mut second = reader.reopen().unwrap();
        assert_eq!(second.read_rows("x", 99, 1).unwrap().len(), 3);
        assert_eq!(second.read_rows("y", 1, 1).unwrap(), ArrayData::I64(vec![3, 4]));
    }

    #[test]
    fn rejects_bad_shapes_and_ranges() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.h5");
        let mut writer = StoreWriter::create(&path).unwrap();
        writer.create_dataset("d", Dtype::F64, &[3], Compression::None).unwrap();
        assert!(matches!(
            writer.append("d", &ArrayData::F64(vec![1.0; 4])),
            Err(StoreError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            writer.append("d", &ArrayData::I64(vec![1; 3])),
            Err(StoreError::DtypeMismatch { .. })
        ));
        assert!(matches!(
            writer.create_dataset("d", Dtype::F64, &[3], Compression::None),
            Err(StoreError::DatasetExists(_))
        ));
        writer.append("d", &ArrayData::F64(vec![1.0; 3])).unwrap();
        writer.close().unwrap();

        let mut reader = StoreReader::open(&path).unwrap();
        assert!(matches!(
            reader.read_rows("d", 1, 1),
            Err(StoreError::RowOutOfRange { .. })
        ));
        assert!(matches!(reader.dataset("nope"), Err(StoreError::MissingDataset(_))));
    }

    #[test]
    fn foreign_files_are_rejected() {
        let dir = tempdir().unwrap();
        let foreign = dir.path().join("foreign.h5");
        std::fs::write(&foreign, b"GARBAGE!GARBAGE!").unwrap();
        assert!(matches!(StoreReader::open(&foreign), Err(StoreError::Hdf5 { .. })));
    }
}
