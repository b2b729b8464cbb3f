use super::{FormatError, OutputData, OutputFormat, with_suffix};
use crate::core::io::store::{ArrayData, Compression, ROOT, StoreWriter};
use std::path::{Path, PathBuf};

pub const HDF_NAME: &str = "HDF";
pub const NETCDF_NAME: &str = "NetCDF";

pub const METADATA_GROUP: &str = "metadata";
pub const HEADER_ATTRIBUTE: &str = "header";

/// Writes every variable as one HDF5 dataset, with `units` and `axis` attributes.
///
/// The NetCDF flavour is the NetCDF-4 profile of the same file: `.nc` extension and
/// CF conventions declared on the root group.
#[derive(Debug, Clone, Copy)]
pub struct StoreFormat {
    name: &'static str,
    extension: &'static str,
    profile: &'static str,
    conventions: Option<&'static str>,
}

impl StoreFormat {
    pub fn hdf() -> Self {
        Self {
            name: HDF_NAME,
            extension: ".h5",
            profile: "hdf",
            conventions: None,
        }
    }

    pub fn netcdf() -> Self {
        Self {
            name: NETCDF_NAME,
            extension: ".nc",
            profile: "netcdf",
            conventions: Some("CF-1.8"),
        }
    }
}

pub fn create_hdf() -> Box<dyn OutputFormat> {
    Box::new(StoreFormat::hdf())
}

pub fn create_netcdf() -> Box<dyn OutputFormat> {
    Box::new(StoreFormat::netcdf())
}

impl OutputFormat for StoreFormat {
    fn name(&self) -> &'static str {
        self.name
    }

    fn extension(&self) -> &'static str {
        self.extension
    }

    fn write(
        &self,
        root: &Path,
        data: &OutputData,
        header: &str,
    ) -> Result<Vec<PathBuf>, FormatError> {
        let path = with_suffix(root, self.extension);
        let mut store = StoreWriter::create(&path)?;
        for variable in data.iter() {
            let shape = if variable.shape.is_empty() {
                vec![variable.len()]
            } else {
                variable.shape.clone()
            };
            store.write_dataset(
                &variable.name,
                &shape,
                &ArrayData::F64(variable.data.clone()),
                Compression::None,
            )?;
            store.set_attribute(&variable.name, "units", &variable.units);
            store.set_attribute(&variable.name, "axis", &variable.axis.join("|"));
            for (key, value) in &variable.attributes {
                store.set_attribute(&variable.name, key, value);
            }
        }
        store.set_attribute(METADATA_GROUP, HEADER_ATTRIBUTE, header);
        store.set_attribute(METADATA_GROUP, "profile", self.profile);
        if let Some(conventions) = self.conventions {
            store.set_attribute(ROOT, "Conventions", conventions);
        }
        store.close()?;
        Ok(vec![path])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::store::StoreReader;
    use crate::engine::output::tests::sample_output;
    use tempfile::tempdir;

    #[test]
    fn variables_and_attributes_are_stored() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("eisf");
        let files = StoreFormat::hdf()
            .write(&root, &sample_output(), "job = \"eisf\"")
            .unwrap();
        assert_eq!(files, [dir.path().join("eisf.h5")]);

        let mut reader = StoreReader::open(&files[0]).unwrap();
        assert_eq!(reader.read_f64("eisf_H").unwrap(), [0.9, 0.8, 0.7]);
        assert_eq!(reader.attribute("eisf_H", "units"), Some("au"));
        assert_eq!(reader.attribute("eisf_H", "axis"), Some("q"));
        assert_eq!(reader.attribute("map", "axis"), Some("time|q"));
        assert_eq!(reader.dataset("map").unwrap().shape, [2, 3]);
        assert_eq!(
            reader.attribute(METADATA_GROUP, HEADER_ATTRIBUTE),
            Some("job = \"eisf\"")
        );

        let file = hdf5::File::open(&files[0]).unwrap();
        let map = file.dataset("map").unwrap();
        assert_eq!(map.shape(), [2, 3]);
        assert_eq!(map.read_raw::<f64>().unwrap().len(), 6);
        assert!(file.group(METADATA_GROUP).is_ok());
    }

    #[test]
    fn netcdf_uses_its_own_extension() {
        let dir = tempdir().unwrap();
        let files = StoreFormat::netcdf()
            .write(&dir.path().join("r"), &sample_output(), "")
            .unwrap();
        assert!(files[0].to_string_lossy().ends_with("r.nc"));
        let reader = StoreReader::open(&files[0]).unwrap();
        assert_eq!(reader.attribute(METADATA_GROUP, "profile"), Some("netcdf"));
        assert_eq!(reader.attribute(ROOT, "Conventions"), Some("CF-1.8"));
        assert!(reader.has_dataset("eisf_H"));
    }
}
