use super::{
    QShell, QVectorError, QVectorGenerator, ShellSpec, assign_to_shells, positive, reciprocal,
    require_cell,
};
use crate::core::models::unit_cell::UnitCell;
use crate::core::value::Value;
use nalgebra::Vector3;
use serde::Deserialize;

pub const NAME: &str = "spherical_lattice";

/// Reciprocal lattice points grouped into spherical shells.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SphericalLattice {
    #[serde(default)]
    pub seed: u64,
    pub shells: (f64, f64, f64),
    #[serde(default = "default_n_vectors")]
    pub n_vectors: usize,
    #[serde(default = "default_width")]
    pub width: f64,
}

fn default_n_vectors() -> usize {
    50
}

fn default_width() -> f64 {
    1.0
}

impl SphericalLattice {
    pub fn from_parameters(parameters: &Value) -> Result<Box<dyn QVectorGenerator>, QVectorError> {
        let generator: Self = parameters.to_typed()?;
        generator.spec().validate()?;
        positive("n_vectors", generator.n_vectors)?;
        Ok(Box::new(generator))
    }

    fn spec(&self) -> ShellSpec {
        ShellSpec {
            shells: self.shells,
            width: self.width,
        }
    }
}

/// Every nonzero lattice point with `|q| ≤ q_max`, in lexicographic `hkl` order.
pub(crate) fn lattice_points(cell: &UnitCell, q_max: f64) -> Vec<(Vector3<f64>, Vector3<i64>)> {
    let bounds: Vec<i64> = [cell.a_vector(), cell.b_vector(), cell.c_vector()]
        .iter()
        .map(|axis| (q_max * axis.norm()).ceil() as i64)
        .collect();
    let mut points = Vec::new();
    for h in -bounds[0]..=bounds[0] {
        for k in -bounds[1]..=bounds[1] {
            for l in -bounds[2]..=bounds[2] {
                if h == 0 && k == 0 && l == 0 {
                    continue;
                }
                let hkl = Vector3::new(h, k, l);
                let q = reciprocal(cell, &hkl);
                if q.norm() <= q_max {
                    points.push((q, hkl));
                }
            }
        }
    }
    points
}

impl QVectorGenerator for SphericalLattice {
    fn name(&self) -> &'static str {
        NAME
    }

    fn requires_cell(&self) -> bool {
        true
    }

    fn generate(&self, cell: Option<&UnitCell>) -> Result<Vec<QShell>, QVectorError> {
        let cell = require_cell(NAME, cell)?;
        let spec = self.spec();
        let candidates = lattice_points(cell, spec.q_max());
        assign_to_shells(NAME, &candidates, &spec, self.n_vectors, self.seed)
    }
}
