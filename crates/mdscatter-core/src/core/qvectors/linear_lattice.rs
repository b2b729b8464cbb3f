use super::{
    QShell, QVectorError, QVectorGenerator, ShellSpec, assign_to_shells, positive, reciprocal,
    require_cell,
};
use crate::core::models::unit_cell::UnitCell;
use crate::core::value::Value;
use nalgebra::Vector3;
use serde::Deserialize;

pub const NAME: &str = "linear_lattice";

/// Integer multiples of a single reciprocal lattice direction, the zero multiple
/// included.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinearLattice {
    #[serde(default)]
    pub seed: u64,
    pub shells: (f64, f64, f64),
    #[serde(default = "default_n_vectors")]
    pub n_vectors: usize,
    #[serde(default = "default_width")]
    pub width: f64,
    #[serde(default = "default_axis")]
    pub axis: [i64; 3],
}

fn default_n_vectors() -> usize {
    50
}

fn default_width() -> f64 {
    1.0
}

fn default_axis() -> [i64; 3] {
    [1, 0, 0]
}

impl LinearLattice {
    pub fn from_parameters(parameters: &Value) -> Result<Box<dyn QVectorGenerator>, QVectorError> {
        let generator: Self = parameters.to_typed()?;
        generator.spec().validate()?;
        positive("n_vectors", generator.n_vectors)?;
        if generator.axis == [0, 0, 0] {
            return Err(QVectorError::InvalidParameter {
                name: "axis",
                reason: "the null vector has no direction".to_string(),
            });
        }
        Ok(Box::new(generator))
    }

    fn spec(&self) -> ShellSpec {
        ShellSpec {
            shells: self.shells,
            width: self.width,
        }
    }
}

impl QVectorGenerator for LinearLattice {
    fn name(&self) -> &'static str {
        NAME
    }

    fn requires_cell(&self) -> bool {
        true
    }

    fn generate(&self, cell: Option<&UnitCell>) -> Result<Vec<QShell>, QVectorError> {
        let cell = require_cell(NAME, cell)?;
        let spec = self.spec();
        let axis = Vector3::from(self.axis);
        let q0 = reciprocal(cell, &axis);
        let u_max = (spec.q_max() / q0.norm()).ceil() as i64 + 1;

        let candidates: Vec<(Vector3<f64>, Vector3<i64>)> = (-u_max..=u_max)
            .map(|k| {
                let v = q0 * k as f64;
                let hkl = (cell.direct() * v).map(|x| x.round() as i64);
                (v, hkl)
            })
            .collect();
        assign_to_shells(NAME, &candidates, &spec, self.n_vectors, self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameters() -> Value {
        Value::from([
            ("shells", Value::from(vec![0.0, 5.0, 0.5])),
            ("n_vectors", Value::Int(10)),
            ("width", Value::Float(0.1)),
            ("axis", Value::from(vec![1i64, 0, 0])),
            ("seed", Value::Int(0)),
        ])
    }

    #[test]
    fn shells_hold_multiples_of_the_axis() {
        let cell = UnitCell::cubic(1.0).unwrap();
        let shells = LinearLattice::from_parameters(&parameters())
            .unwrap()
            .generate(Some(&cell))
            .unwrap();
        let qs: Vec<f64> = shells.iter().map(|s| s.q).collect();
        assert_eq!(qs, [0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

        let unit = shells.iter().find(|s| (s.q - 1.0).abs() < 1e-12).unwrap();
        assert_eq!(unit.len(), 2);
        for v in &unit.vectors {
            assert!((0.95..=1.05).contains(&v.x.abs()));
            assert_eq!(v.y, 0.0);
            assert_eq!(v.z, 0.0);
        }
        let hkls = unit.hkls.as_ref().unwrap();
        assert!(hkls.contains(&Vector3::new(1, 0, 0)));
        assert!(hkls.contains(&Vector3::new(-1, 0, 0)));
    }

    #[test]
    fn zero_shell_holds_the_origin() {
        let cell = UnitCell::orthorhombic(1.0, 2.0, 3.0).unwrap();
        let shells = LinearLattice::from_parameters(&parameters())
            .unwrap()
            .generate(Some(&cell))
            .unwrap();
        let origin = &shells[0];
        assert_eq!(origin.q, 0.0);
        assert_eq!(origin.vectors, [Vector3::zeros()]);
        assert_eq!(origin.hkls.as_deref(), Some(&[Vector3::new(0, 0, 0)][..]));
    }

    #[test]
    fn null_axis_is_rejected() {
        let mut parameters = parameters();
        if let Value::Table(table) = &mut parameters {
            table.insert("axis".into(), Value::from(vec![0i64, 0, 0]));
        }
        assert!(matches!(
            LinearLattice::from_parameters(&parameters),
            Err(QVectorError::InvalidParameter { name: "axis", .. })
        ));
    }
}
