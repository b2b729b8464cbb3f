use super::{QShell, QVectorError, QVectorGenerator, ShellSpec, positive};
use crate::core::models::unit_cell::UnitCell;
use crate::core::value::Value;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::f64::consts::TAU;

pub const NAME: &str = "spherical_vectors";

/// Isotropically distributed random vectors, `n_vectors` per shell, with moduli drawn
/// uniformly inside each shell window. Works without a unit cell.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SphericalVectors {
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

impl SphericalVectors {
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

impl QVectorGenerator for SphericalVectors {
    fn name(&self) -> &'static str {
        NAME
    }

    fn requires_cell(&self) -> bool {
        false
    }

    fn generate(&self, _cell: Option<&UnitCell>) -> Result<Vec<QShell>, QVectorError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let half = self.width / 2.0;
        let shells: Vec<QShell> = self
            .spec()
            .centers()
            .into_iter()
            .map(|q| {
                let low = (q - half).max(0.0);
                let high = q + half;
                let vectors = (0..self.n_vectors)
                    .map(|_| {
                        let cos_theta: f64 = rng.gen_range(-1.0..=1.0);
                        let phi: f64 = rng.gen_range(0.0..TAU);
                        let modulus: f64 = rng.gen_range(low..=high);
                        let sin_theta = (1.0 - cos_theta * cos_theta).sqrt();
                        let direction =
                            Vector3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta);
                        modulus * direction
                    })
                    .collect();
                QShell {
                    q,
                    vectors,
                    hkls: None,
                }
            })
            .collect();
        if shells.is_empty() {
            return Err(QVectorError::NoVectors);
        }
        Ok(shells)
    }
}
