use super::{FormatError, OutputData, OutputFormat, OutputVariable, io_error, with_suffix};
use crate::core::utils::units::display_units;
use plotters::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};

pub const NAME: &str = "SVG";

/// One line plot per one-dimensional variable that has an axis, bundled into
/// `{root}.tar`.
#[derive(Debug, Clone, Copy)]
pub struct SvgFormat {
    pub size: (u32, u32),
}

impl Default for SvgFormat {
    fn default() -> Self {
        Self { size: (800, 600) }
    }
}

pub fn create() -> Box<dyn OutputFormat> {
    Box::new(SvgFormat::default())
}

fn span(values: &[f64]) -> (f64, f64) {
    let (lo, hi) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    if hi - lo < f64::EPSILON * lo.abs().max(1.0) {
        return (lo - 0.5, hi + 0.5);
    }
    let pad = 0.05 * (hi - lo);
    (lo - pad, hi + pad)
}

impl SvgFormat {
    fn render(&self, x: &OutputVariable, y: &OutputVariable) -> Result<String, FormatError> {
        let plot_error = |e: &dyn std::fmt::Display| FormatError::Plot {
            variable: y.name.clone(),
            reason: e.to_string(),
        };
        let mut svg = String::new();
        {
            let root = SVGBackend::with_string(&mut svg, self.size).into_drawing_area();
            root.fill(&WHITE).map_err(|e| plot_error(&e))?;
            let (x_lo, x_hi) = span(&x.data);
            let (y_lo, y_hi) = span(&y.data);
            let mut chart = ChartBuilder::on(&root)
                .caption(&y.name, ("sans-serif", 20))
                .margin(20)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
                .map_err(|e| plot_error(&e))?;
            chart
                .configure_mesh()
                .x_desc(format!("{} ({})", x.name, display_units(&x.units)))
                .y_desc(display_units(&y.units))
                .draw()
                .map_err(|e| plot_error(&e))?;
            let points = x
                .data
                .iter()
                .zip(&y.data)
                .filter(|(a, b)| a.is_finite() && b.is_finite())
                .map(|(a, b)| (*a, *b));
            chart
                .draw_series(LineSeries::new(points, &BLUE))
                .map_err(|e| plot_error(&e))?;
            root.present().map_err(|e| plot_error(&e))?;
        }
        Ok(svg)
    }
}

impl OutputFormat for SvgFormat {
    fn name(&self) -> &'static str {
        NAME
    }

    fn extension(&self) -> &'static str {
        ".tar"
    }

    fn write(
        &self,
        root: &Path,
        data: &OutputData,
        _header: &str,
    ) -> Result<Vec<PathBuf>, FormatError> {
        let path = with_suffix(root, self.extension());
        let file = File::create(&path).map_err(io_error(&path))?;
        let mut archive = tar::Builder::new(file);
        for y in data.iter().filter(|v| v.rank() == 1) {
            let Some(x) = y.axis.first().and_then(|a| data.get(a)) else {
                continue;
            };
            let svg = self.render(x, y)?;
            let mut entry = tar::Header::new_gnu();
            entry.set_size(svg.len() as u64);
            entry.set_mode(0o644);
            entry.set_cksum();
            archive
                .append_data(&mut entry, format!("{}.svg", y.name), svg.as_bytes())
                .map_err(io_error(&path))?;
        }
        archive.finish().map_err(io_error(&path))?;
        Ok(vec![path])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::output::tests::sample_output;
    use tempfile::tempdir;

    #[test]
    fn archive_holds_one_plot_per_line_variable() {
        let dir = tempdir().unwrap();
        let files = SvgFormat::default()
            .write(&dir.path().join("plots"), &sample_output(), "")
            .unwrap();
        assert!(files[0].to_string_lossy().ends_with("plots.tar"));

        let mut archive = tar::Archive::new(File::open(&files[0]).unwrap());
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, ["eisf_H.svg", "eisf_total.svg"]);
    }

    #[test]
    fn flat_data_gets_a_nonempty_range() {
        assert_eq!(span(&[2.0, 2.0]), (1.5, 2.5));
        assert_eq!(span(&[]), (0.0, 1.0));
    }
}
