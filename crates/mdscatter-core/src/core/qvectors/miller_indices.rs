use super::{
    QShell, QVectorError, QVectorGenerator, ShellSpec, assign_to_shells, positive, reciprocal,
    require_cell,
};
use crate::core::models::unit_cell::UnitCell;
use crate::core::value::Value;
use nalgebra::Vector3;
use serde::Deserialize;

pub const NAME: &str = "miller_indices";

/// Lattice points from explicit `h`, `k`, `l` index ranges, shelled by modulus.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MillerIndices {
    #[serde(default)]
    pub seed: u64,
    pub shells: (f64, f64, f64),
    #[serde(default = "default_n_vectors")]
    pub n_vectors: usize,
    #[serde(default = "default_width")]
    pub width: f64,
    /// `(first, last, step)` for each index, both ends included.
    pub h: (i64, i64, i64),
    pub k: (i64, i64, i64),
    pub l: (i64, i64, i64),
}

fn default_n_vectors() -> usize {
    50
}

fn default_width() -> f64 {
    1.0
}

fn index_range(
    name: &'static str,
    (first, last, step): (i64, i64, i64),
) -> Result<Vec<i64>, QVectorError> {
    if step <= 0 || last < first {
        return Err(QVectorError::InvalidParameter {
            name,
            reason: format!("({first}, {last}, {step}) is not an increasing range"),
        });
    }
    Ok((first..=last).step_by(step as usize).collect())
}

impl MillerIndices {
    pub fn from_parameters(parameters: &Value) -> Result<Box<dyn QVectorGenerator>, QVectorError> {
        let generator: Self = parameters.to_typed()?;
        generator.spec().validate()?;
        positive("n_vectors", generator.n_vectors)?;
        index_range("h", generator.h)?;
        index_range("k", generator.k)?;
        index_range("l", generator.l)?;
        Ok(Box::new(generator))
    }

    fn spec(&self) -> ShellSpec {
        ShellSpec {
            shells: self.shells,
            width: self.width,
        }
    }
}

impl QVectorGenerator for MillerIndices {
    fn name(&self) -> &'static str {
        NAME
    }

    fn requires_cell(&self) -> bool {
        true
    }

    fn generate(&self, cell: Option<&UnitCell>) -> Result<Vec<QShell>, QVectorError> {
        let cell = require_cell(NAME, cell)?;
        let (hs, ks, ls) = (
            index_range("h", self.h)?,
            index_range("k", self.k)?,
            index_range("l", self.l)?,
        );
        let mut candidates = Vec::with_capacity(hs.len() * ks.len() * ls.len());
        for &h in &hs {
            for &k in &ks {
                for &l in &ls {
                    if h == 0 && k == 0 && l == 0 {
                        continue;
                    }
                    let hkl = Vector3::new(h, k, l);
                    candidates.push((reciprocal(cell, &hkl), hkl));
                }
            }
        }
        assign_to_shells(NAME, &candidates, &self.spec(), self.n_vectors, self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_requested_indices_appear() {
        let parameters = Value::from([
            ("shells", Value::from(vec![0.5, 2.0, 0.5])),
            ("width", Value::Float(0.5)),
            ("h", Value::from(vec![0i64, 2, 1])),
            ("k", Value::from(vec![0i64, 0, 1])),
            ("l", Value::from(vec![0i64, 0, 1])),
        ]);
        let cell = UnitCell::cubic(2.0).unwrap();
        let shells = MillerIndices::from_parameters(&parameters)
            .unwrap()
            .generate(Some(&cell))
            .unwrap();
        // h = 1 gives |q| = 0.5, h = 2 gives |q| = 1.0.
        assert_eq!(shells.len(), 2);
        assert_eq!(shells[0].hkls.as_ref().unwrap(), &[Vector3::new(1, 0, 0)]);
        assert_eq!(shells[1].hkls.as_ref().unwrap(), &[Vector3::new(2, 0, 0)]);
    }

    #[test]
    fn decreasing_ranges_are_rejected() {
        let parameters = Value::from([
            ("shells", Value::from(vec![0.5, 2.0, 0.5])),
            ("h", Value::from(vec![2i64, 0, 1])),
            ("k", Value::from(vec![0i64, 0, 1])),
            ("l", Value::from(vec![0i64, 0, 1])),
        ]);
        assert!(matches!(
            MillerIndices::from_parameters(&parameters),
            Err(QVectorError::InvalidParameter { name: "h", .. })
        ));
    }
}
