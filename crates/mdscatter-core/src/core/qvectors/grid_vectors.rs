use super::{QShell, QVectorError, QVectorGenerator, reciprocal, require_cell};
use crate::core::models::unit_cell::UnitCell;
use crate::core::value::Value;
use nalgebra::Vector3;
use serde::Deserialize;
use std::collections::BTreeMap;

pub const NAME: &str = "grid_vectors";

/// The full reciprocal grid inside `[-h, h] × [-k, k] × [-l, l]`, binned by modulus.
///
/// Every vector is kept; a vector with modulus `|q|` lands in the bin centred on
/// `round(|q| / q_step) · q_step`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridVectors {
    pub hkl_max: [i64; 3],
    #[serde(default = "default_q_step")]
    pub q_step: f64,
}

fn default_q_step() -> f64 {
    0.1
}

impl GridVectors {
    pub fn from_parameters(parameters: &Value) -> Result<Box<dyn QVectorGenerator>, QVectorError> {
        let generator: Self = parameters.to_typed()?;
        if generator.hkl_max.iter().any(|&m| m < 0) || generator.hkl_max == [0, 0, 0] {
            return Err(QVectorError::InvalidParameter {
                name: "hkl_max",
                reason: format!("{:?} must be non-negative and not all zero", generator.hkl_max),
            });
        }
        if !(generator.q_step > 0.0) {
            return Err(QVectorError::InvalidParameter {
                name: "q_step",
                reason: format!("{} must be positive", generator.q_step),
            });
        }
        Ok(Box::new(generator))
    }
}

impl QVectorGenerator for GridVectors {
    fn name(&self) -> &'static str {
        NAME
    }

    fn requires_cell(&self) -> bool {
        true
    }

    fn generate(&self, cell: Option<&UnitCell>) -> Result<Vec<QShell>, QVectorError> {
        let cell = require_cell(NAME, cell)?;
        let [hm, km, lm] = self.hkl_max;
        let mut bins: BTreeMap<i64, QShell> = BTreeMap::new();
        for h in -hm..=hm {
            for k in -km..=km {
                for l in -lm..=lm {
                    if h == 0 && k == 0 && l == 0 {
                        continue;
                    }
                    let hkl = Vector3::new(h, k, l);
                    let q = reciprocal(cell, &hkl);
                    let bin = (q.norm() / self.q_step).round() as i64;
                    let shell = bins.entry(bin).or_insert_with(|| QShell {
                        q: bin as f64 * self.q_step,
                        vectors: Vec::new(),
                        hkls: Some(Vec::new()),
                    });
                    shell.vectors.push(q);
                    if let Some(hkls) = shell.hkls.as_mut() {
                        hkls.push(hkl);
                    }
                }
            }
        }
        if bins.is_empty() {
            return Err(QVectorError::NoVectors);
        }
        Ok(bins.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_grid_is_binned_in_ascending_order() {
        let parameters = Value::from([
            ("hkl_max", Value::from(vec![1i64, 1, 1])),
            ("q_step", Value::Float(0.25)),
        ]);
        let cell = UnitCell::cubic(1.0).unwrap();
        let shells = GridVectors::from_parameters(&parameters)
            .unwrap()
            .generate(Some(&cell))
            .unwrap();
        let total: usize = shells.iter().map(QShell::len).sum();
        assert_eq!(total, 26);
        assert!(shells.windows(2).all(|w| w[0].q < w[1].q));
        // |q| = 1 -> bin 1.0, √2 -> 1.5, √3 -> 1.75
        let sizes: Vec<usize> = shells.iter().map(QShell::len).collect();
        assert_eq!(sizes, [6, 12, 8]);
    }
}
