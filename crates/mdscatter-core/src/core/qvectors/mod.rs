//! Scattering-vector generators.
//!
//! A generator turns a parameter table into a list of q-shells ordered by ascending |q|.
//! Vectors are expressed in nm⁻¹ without a 2π factor, so a reciprocal lattice vector is
//! `q = D⁻¹ · hkl` for the row-wise cell matrix `D`. Lattice-based generators need the
//! unit cell; the others work on any configuration. Sampling within a shell is driven by
//! a seeded [`StdRng`] so equal seeds reproduce equal shells.

pub mod grid_vectors;
pub mod linear_lattice;
pub mod miller_indices;
pub mod spherical_lattice;
pub mod spherical_vectors;

use crate::core::models::unit_cell::UnitCell;
use crate::core::registry::{Registry, RegistryError};
use crate::core::value::Value;
use nalgebra::Vector3;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum QVectorError {
    #[error("Generator '{0}' needs a periodic system")]
    MissingUnitCell(&'static str),
    #[error("Invalid q-vector parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("Malformed q-vector parameters: {0}")]
    Parameters(#[from] serde_json::Error),
    #[error("No q-vector falls inside any requested shell")]
    NoVectors,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// One shell of scattering vectors around the nominal modulus `q`.
#[derive(Debug, Clone, PartialEq)]
pub struct QShell {
    pub q: f64,
    pub vectors: Vec<Vector3<f64>>,
    /// Miller indices of each vector, for lattice-based generators.
    pub hkls: Option<Vec<Vector3<i64>>>,
}

impl QShell {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

pub trait QVectorGenerator: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn requires_cell(&self) -> bool;

    /// Builds the shells. Shells left empty are dropped with a warning.
    ///
    /// # Errors
    ///
    /// [`QVectorError::MissingUnitCell`] when the generator is lattice based and `cell` is
    /// `None`; [`QVectorError::NoVectors`] when every shell is empty.
    fn generate(&self, cell: Option<&UnitCell>) -> Result<Vec<QShell>, QVectorError>;
}

pub type QVectorFactory = fn(&Value) -> Result<Box<dyn QVectorGenerator>, QVectorError>;

pub const LATTICE_FAMILY: &str = "LatticeQVectors";

/// The q-vector family: lattice generators sit under [`LATTICE_FAMILY`].
pub fn registry() -> Registry<QVectorFactory> {
    let mut registry: Registry<QVectorFactory> = Registry::new("q-vector generator");
    let entries: [(Option<&str>, &str, QVectorFactory); 5] = [
        (
            Some(LATTICE_FAMILY),
            spherical_lattice::NAME,
            spherical_lattice::SphericalLattice::from_parameters,
        ),
        (
            Some(LATTICE_FAMILY),
            linear_lattice::NAME,
            linear_lattice::LinearLattice::from_parameters,
        ),
        (
            Some(LATTICE_FAMILY),
            miller_indices::NAME,
            miller_indices::MillerIndices::from_parameters,
        ),
        (
            Some(LATTICE_FAMILY),
            grid_vectors::NAME,
            grid_vectors::GridVectors::from_parameters,
        ),
        (
            None,
            spherical_vectors::NAME,
            spherical_vectors::SphericalVectors::from_parameters,
        ),
    ];
    // Names are distinct constants.
    let _ = registry.register_abstract(LATTICE_FAMILY, None);
    for (parent, name, factory) in entries {
        let _ = match parent {
            Some(parent) => registry.register_under(parent, name, factory),
            None => registry.register(name, factory),
        };
    }
    registry
}

/// Creates the named generator from its parameter table.
pub fn create(name: &str, parameters: &Value) -> Result<Box<dyn QVectorGenerator>, QVectorError> {
    let registry = registry();
    let factory = registry.get(name)?;
    factory(parameters)
}

/// Shell centers and half-width shared by the shell-based generators.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ShellSpec {
    /// `(first, last, step)`, both ends included.
    pub shells: (f64, f64, f64),
    pub width: f64,
}

impl ShellSpec {
    pub fn validate(&self) -> Result<(), QVectorError> {
        let (first, last, step) = self.shells;
        if !(step > 0.0) || last < first || first < 0.0 {
            return Err(QVectorError::InvalidParameter {
                name: "shells",
                reason: format!("({first}, {last}, {step}) is not an increasing range"),
            });
        }
        if !(self.width > 0.0) {
            return Err(QVectorError::InvalidParameter {
                name: "width",
                reason: format!("{} must be positive", self.width),
            });
        }
        Ok(())
    }

    pub fn centers(&self) -> Vec<f64> {
        let (first, last, step) = self.shells;
        inclusive_range(first, last, step)
    }

    /// Largest modulus any shell accepts.
    pub fn q_max(&self) -> f64 {
        self.centers().last().copied().unwrap_or(0.0) + self.width / 2.0
    }
}

/// `first, first + step, …` up to and including `last` within a relative tolerance.
pub fn inclusive_range(first: f64, last: f64, step: f64) -> Vec<f64> {
    if !(step > 0.0) || last < first {
        return Vec::new();
    }
    let count = ((last - first) / step + 1e-9).floor() as usize + 1;
    (0..count).map(|k| first + k as f64 * step).collect()
}

/// Distributes lattice candidates over shells, keeping at most `n_vectors` per shell.
///
/// A vector belongs to the first shell (ascending q) whose window `[q − w/2, q + w/2]`
/// contains its modulus. Shells are sampled in ascending order from one RNG seeded
/// with `seed`; sampled indices keep the candidate order.
pub(crate) fn assign_to_shells(
    generator: &'static str,
    candidates: &[(Vector3<f64>, Vector3<i64>)],
    spec: &ShellSpec,
    n_vectors: usize,
    seed: u64,
) -> Result<Vec<QShell>, QVectorError> {
    let centers = spec.centers();
    let half = spec.width / 2.0;
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); centers.len()];
    for (i, (v, _)) in candidates.iter().enumerate() {
        let norm = v.norm();
        let shell = centers.partition_point(|&c| c + half < norm);
        if shell < centers.len() && centers[shell] - half <= norm {
            members[shell].push(i);
        }
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut shells = Vec::new();
    for (q, indices) in centers.into_iter().zip(members) {
        if indices.is_empty() {
            warn!(generator, q, "Dropping empty q-shell.");
            continue;
        }
        let chosen = choose(&mut rng, indices, n_vectors);
        shells.push(QShell {
            q,
            vectors: chosen.iter().map(|&i| candidates[i].0).collect(),
            hkls: Some(chosen.iter().map(|&i| candidates[i].1).collect()),
        });
    }
    if shells.is_empty() {
        return Err(QVectorError::NoVectors);
    }
    Ok(shells)
}

/// Up to `n` of `items`, sampled without replacement, original order preserved.
pub(crate) fn choose(rng: &mut StdRng, items: Vec<usize>, n: usize) -> Vec<usize> {
    if items.len() <= n {
        return items;
    }
    let mut picked = sample(rng, items.len(), n).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|k| items[k]).collect()
}

pub(crate) fn require_cell<'a>(
    generator: &'static str,
    cell: Option<&'a UnitCell>,
) -> Result<&'a UnitCell, QVectorError> {
    cell.ok_or(QVectorError::MissingUnitCell(generator))
}

pub(crate) fn positive(name: &'static str, value: usize) -> Result<(), QVectorError> {
    if value == 0 {
        return Err(QVectorError::InvalidParameter {
            name,
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// Reciprocal-lattice vector of integer indices.
pub(crate) fn reciprocal(cell: &UnitCell, hkl: &Vector3<i64>) -> Vector3<f64> {
    cell.inverse() * hkl.map(|x| x as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inclusive_range_counts_both_ends() {
        assert_eq!(inclusive_range(0.1, 5.0, 0.1).len(), 50);
        assert_eq!(inclusive_range(0.0, 5.0, 0.5).len(), 11);
        assert_eq!(inclusive_range(1.0, 1.0, 0.5), [1.0]);
        assert!(inclusive_range(2.0, 1.0, 0.5).is_empty());
    }

    #[test]
    fn every_registered_generator_is_reachable() {
        let registry = registry();
        assert_eq!(registry.names().count(), 5);
        assert_eq!(registry.subclasses(), [LATTICE_FAMILY, spherical_vectors::NAME]);
        assert!(matches!(
            create("spherical_latice", &Value::Null),
            Err(QVectorError::Registry(RegistryError::Unknown { suggestion: Some(_), .. }))
        ));
    }

    #[test]
    fn vectors_go_to_the_first_matching_shell() {
        let spec = ShellSpec {
            shells: (1.0, 2.0, 0.5),
            width: 1.0,
        };
        let candidates: Vec<(Vector3<f64>, Vector3<i64>)> = [1.2, 1.6, 3.0]
            .iter()
            .map(|&x| (Vector3::new(x, 0.0, 0.0), Vector3::zeros()))
            .collect();
        let shells = assign_to_shells("test", &candidates, &spec, 10, 0).unwrap();
        // 1.2 lands in [0.5, 1.5]; 1.6 in [1.0, 2.0]; 3.0 is out of range.
        assert_eq!(shells.len(), 2);
        assert_eq!(shells[0].q, 1.0);
        assert_eq!(shells[0].vectors[0].x, 1.2);
        assert_eq!(shells[1].q, 1.5);
        assert_eq!(shells[1].vectors[0].x, 1.6);
    }

    #[test]
    fn choose_keeps_order_and_caps() {
        let mut rng = StdRng::seed_from_u64(1);
        let picked = choose(&mut rng, (10..30).collect(), 5);
        assert_eq!(picked.len(), 5);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(choose(&mut rng, vec![1, 2], 5), [1, 2]);
    }
}
