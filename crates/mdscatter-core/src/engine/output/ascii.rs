use super::{FormatError, OutputData, OutputFormat, OutputVariable, io_error, with_suffix};
use crate::core::utils::units::display_units;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const NAME: &str = "ASCII";

/// Plain-text columns. One-dimensional variables sharing an axis go to one file
/// `{root}_{axis}.dat` with the axis as first column; every other variable gets its own
/// `{root}_{name}.dat`, two-dimensional ones written as a matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsciiFormat;

pub fn create() -> Box<dyn OutputFormat> {
    Box::new(AsciiFormat)
}

fn column_label(variable: &OutputVariable) -> String {
    let units = display_units(&variable.units);
    if units.is_empty() {
        variable.name.clone()
    } else {
        format!("{}({units})", variable.name)
    }
}

fn format_value(value: f64) -> String {
    format!("{value:.8e}")
}

impl AsciiFormat {
    fn open(
        &self,
        path: &Path,
        header: &str,
        columns: &[String],
    ) -> Result<csv::Writer<BufWriter<File>>, FormatError> {
        let mut file = BufWriter::new(File::create(path).map_err(io_error(path))?);
        for line in header.lines() {
            writeln!(file, "# {line}").map_err(io_error(path))?;
        }
        writeln!(file, "# {}", columns.join(" ")).map_err(io_error(path))?;
        Ok(csv::WriterBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .from_writer(file))
    }

    fn write_columns(
        &self,
        path: &Path,
        header: &str,
        columns: &[&OutputVariable],
    ) -> Result<(), FormatError> {
        let labels: Vec<String> = columns.iter().map(|v| column_label(v)).collect();
        let mut writer = self.open(path, header, &labels)?;
        let csv_error = |source| FormatError::Csv {
            path: path.display().to_string(),
            source,
        };
        let rows = columns.iter().map(|v| v.len()).max().unwrap_or(0);
        for row in 0..rows {
            let record: Vec<String> = columns
                .iter()
                .map(|v| v.data.get(row).map(|x| format_value(*x)).unwrap_or_default())
                .collect();
            writer.write_record(&record).map_err(csv_error)?;
        }
        writer.flush().map_err(io_error(path))?;
        Ok(())
    }

    fn write_matrix(
        &self,
        path: &Path,
        header: &str,
        variable: &OutputVariable,
    ) -> Result<(), FormatError> {
        let label = format!(
            "{} [{}] axes: {}",
            variable.name,
            display_units(&variable.units),
            variable.axis.join(", ")
        );
        let mut writer = self.open(path, header, &[label])?;
        let cols = variable.shape.last().copied().unwrap_or(variable.len()).max(1);
        for chunk in variable.data.chunks(cols) {
            let record: Vec<String> = chunk.iter().map(|x| format_value(*x)).collect();
            writer.write_record(&record).map_err(|source| FormatError::Csv {
                path: path.display().to_string(),
                source,
            })?;
        }
        writer.flush().map_err(io_error(path))?;
        Ok(())
    }
}

impl OutputFormat for AsciiFormat {
    fn name(&self) -> &'static str {
        NAME
    }

    fn extension(&self) -> &'static str {
        ".dat"
    }

    fn write(
        &self,
        root: &Path,
        data: &OutputData,
        header: &str,
    ) -> Result<Vec<PathBuf>, FormatError> {
        let referenced: BTreeSet<&str> = data
            .iter()
            .flat_map(|v| v.axis.iter().map(String::as_str))
            .collect();

        let mut by_axis: BTreeMap<&str, Vec<&OutputVariable>> = BTreeMap::new();
        let mut alone: Vec<&OutputVariable> = Vec::new();
        for variable in data.iter() {
            match (variable.rank(), variable.axis.as_slice()) {
                (1, [axis]) if data.get(axis).is_some() => {
                    by_axis.entry(axis.as_str()).or_default().push(variable)
                }
                (1, []) if referenced.contains(variable.name.as_str()) => {}
                _ => alone.push(variable),
            }
        }

        let mut files = Vec::new();
        for (axis, members) in by_axis {
            let Some(axis_variable) = data.get(axis) else {
                continue;
            };
            let mut columns = vec![axis_variable];
            columns.extend(members);
            let path = with_suffix(root, &format!("_{axis}{}", self.extension()));
            self.write_columns(&path, header, &columns)?;
            files.push(path);
        }
        for variable in alone {
            let path = with_suffix(root, &format!("_{}{}", variable.name, self.extension()));
            if variable.rank() >= 2 {
                self.write_matrix(&path, header, variable)?;
            } else {
                self.write_columns(&path, header, &[variable])?;
            }
            files.push(path);
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::output::tests::sample_output;
    use tempfile::tempdir;

    #[test]
    fn line_variables_are_grouped_by_axis() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("run");
        let files = AsciiFormat.write(&root, &sample_output(), "eisf\nseed = 0").unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, ["run_q.dat", "run_map.dat"]);

        let text = std::fs::read_to_string(&files[0]).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# eisf");
        assert_eq!(lines[1], "# seed = 0");
        assert_eq!(lines[2], "# q(1/nm) eisf_H(au) eisf_total(au)");
        let first: Vec<f64> = lines[3].split(' ').map(|x| x.parse().unwrap()).collect();
        assert_eq!(first, [0.5, 0.9, 0.95]);
        assert_eq!(lines.len(), 6);
    }

    #[test]
    fn matrices_keep_their_rows() {
        let dir = tempdir().unwrap();
        let files = AsciiFormat.write(&dir.path().join("r"), &sample_output(), "").unwrap();
        let text = std::fs::read_to_string(&files[1]).unwrap();
        let rows: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].split(' ').count(), 3);
    }
}
