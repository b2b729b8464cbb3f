use super::error::ModelError;
use super::system::ChemicalSystem;
use super::unit_cell::UnitCell;
use crate::core::utils::geometry::minimum_image;
use nalgebra::Vector3;
use std::collections::{BTreeMap, VecDeque};

pub const COORDINATES: &str = "coordinates";
pub const VELOCITIES: &str = "velocities";

const MAX_FOLD_NUDGES: usize = 40;

fn in_primary_cell(fractional: &Vector3<f64>) -> bool {
    fractional.iter().all(|f| (-0.5..0.5).contains(f))
}

/// `f` shifted by an integer into `[-0.5, 0.5)`.
fn wrap_fraction(f: f64) -> f64 {
    if (-0.5..0.5).contains(&f) {
        return f;
    }
    let w = f - (f + 0.5).floor();
    if w >= 0.5 {
        w - 1.0
    } else if w < -0.5 {
        w + 1.0
    } else {
        w
    }
}

/// One frame: positions, optional per-atom vector variables and an optional unit cell.
///
/// A configuration with a cell is periodic. Periodic-only operations return
/// [`ModelError::NotPeriodic`] when the cell is absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    coordinates: Vec<Vector3<f64>>,
    variables: BTreeMap<String, Vec<Vector3<f64>>>,
    cell: Option<UnitCell>,
}

impl Configuration {
    pub fn new(coordinates: Vec<Vector3<f64>>, cell: Option<UnitCell>) -> Self {
        Self {
            coordinates,
            variables: BTreeMap::new(),
            cell,
        }
    }

    /// A configuration with every atom at the origin, sized for `system`.
    pub fn zeros(system: &ChemicalSystem, cell: Option<UnitCell>) -> Self {
        Self::new(vec![Vector3::zeros(); system.number_of_atoms()], cell)
    }

    pub fn n_atoms(&self) -> usize {
        self.coordinates.len()
    }

    pub fn coordinates(&self) -> &[Vector3<f64>] {
        &self.coordinates
    }

    pub fn set_coordinates(&mut self, coordinates: Vec<Vector3<f64>>) -> Result<(), ModelError> {
        self.check_rows(COORDINATES, coordinates.len())?;
        self.coordinates = coordinates;
        Ok(())
    }

    pub fn unit_cell(&self) -> Option<&UnitCell> {
        self.cell.as_ref()
    }

    pub fn set_unit_cell(&mut self, cell: Option<UnitCell>) {
        self.cell = cell;
    }

    pub fn is_periodic(&self) -> bool {
        self.cell.is_some()
    }

    pub fn has_variable(&self, name: &str) -> bool {
        name == COORDINATES || self.variables.contains_key(name)
    }

    /// Names of every stored variable, coordinates first.
    pub fn variable_names(&self) -> Vec<&str> {
        std::iter::once(COORDINATES)
            .chain(self.variables.keys().map(String::as_str))
            .collect()
    }

    pub fn variable(&self, name: &str) -> Result<&[Vector3<f64>], ModelError> {
        if name == COORDINATES {
            return Ok(&self.coordinates);
        }
        self.variables
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| ModelError::UnknownVariable(name.to_string()))
    }

    /// Stores an `(N, 3)` variable; a row count different from the atom count is rejected.
    pub fn set_variable(&mut self, name: &str, data: Vec<Vector3<f64>>) -> Result<(), ModelError> {
        if name == COORDINATES {
            return self.set_coordinates(data);
        }
        self.check_rows(name, data.len())?;
        self.variables.insert(name.to_string(), data);
        Ok(())
    }

    fn check_rows(&self, name: &str, found: usize) -> Result<(), ModelError> {
        if found != self.coordinates.len() {
            return Err(ModelError::InvalidVariable {
                name: name.to_string(),
                expected: self.coordinates.len(),
                found,
            });
        }
        Ok(())
    }

    fn require_cell(&self) -> Result<&UnitCell, ModelError> {
        self.cell.as_ref().ok_or(ModelError::NotPeriodic)
    }

    /// Maps every atom into the primary cell, fractional coordinates in `[-0.5, 0.5)`.
    ///
    /// Atoms already inside are left untouched and every folded atom reads back inside,
    /// so folding twice leaves the coordinates bit-for-bit unchanged.
    pub fn fold_coordinates(&mut self) -> Result<(), ModelError> {
        let cell = *self.require_cell()?;
        for r in &mut self.coordinates {
            let frac = cell.to_fractional(r);
            if in_primary_cell(&frac) {
                continue;
            }
            let mut wrapped = frac.map(wrap_fraction);
            let mut nudge = f64::EPSILON;
            let mut candidate = cell.to_cartesian(&wrapped);
            for _ in 0..MAX_FOLD_NUDGES {
                let back = cell.to_fractional(&candidate);
                if in_primary_cell(&back) {
                    break;
                }
                // Round-off pushed a boundary component out; move it inwards.
                wrapped = wrapped.zip_map(&back, |w, b| {
                    if b >= 0.5 {
                        w - nudge
                    } else if b < -0.5 {
                        w + nudge
                    } else {
                        w
                    }
                });
                nudge *= 2.0;
                candidate = cell.to_cartesian(&wrapped);
            }
            *r = candidate;
        }
        Ok(())
    }

    pub fn to_box_coordinates(&self) -> Result<Vec<Vector3<f64>>, ModelError> {
        let cell = self.require_cell()?;
        Ok(self.coordinates.iter().map(|r| cell.to_fractional(r)).collect())
    }

    pub fn to_real_coordinates(
        &self,
        box_coordinates: &[Vector3<f64>],
    ) -> Result<Vec<Vector3<f64>>, ModelError> {
        let cell = self.require_cell()?;
        Ok(box_coordinates.iter().map(|f| cell.to_cartesian(f)).collect())
    }

    /// Rebuilds whole molecules by walking the bond graph of each top-level entity.
    ///
    /// Starting from the lowest-index atom of every connected component, each neighbour is
    /// placed at the periodic image closest to the atom it was reached from. Atoms without
    /// bonds are placed closest to the first atom of their entity. The result carries no cell.
    pub fn continuous_configuration(
        &self,
        system: &ChemicalSystem,
    ) -> Result<Configuration, ModelError> {
        self.check_rows(COORDINATES, system.number_of_atoms())?;
        let Some(cell) = self.cell.as_ref() else {
            return Ok(self.clone());
        };
        let mut out = self.coordinates.clone();
        let mut placed = vec![false; out.len()];

        for &root in system.top_level_entities() {
            let atoms = system.atoms_of(root);
            let Some(&anchor) = atoms.first() else {
                continue;
            };
            for &start in &atoms {
                if placed[start] {
                    continue;
                }
                if start != anchor {
                    out[start] = out[anchor] + minimum_image(&(out[start] - out[anchor]), cell);
                }
                placed[start] = true;
                let mut queue = VecDeque::from([start]);
                while let Some(current) = queue.pop_front() {
                    for next in system.bonded(current) {
                        if placed[next] {
                            continue;
                        }
                        let delta = minimum_image(&(self.coordinates[next] - out[current]), cell);
                        out[next] = out[current] + delta;
                        placed[next] = true;
                        queue.push_back(next);
                    }
                }
            }
        }
        self.detached(out)
    }

    /// Gathers each top-level entity around its first atom by nearest image, ignoring bonds,
    /// then brings the entity's centroid back into the primary cell.
    pub fn contiguous_configuration(
        &self,
        system: &ChemicalSystem,
    ) -> Result<Configuration, ModelError> {
        self.check_rows(COORDINATES, system.number_of_atoms())?;
        let Some(cell) = self.cell.as_ref() else {
            return Ok(self.clone());
        };
        let mut out = self.coordinates.clone();
        for &root in system.top_level_entities() {
            let atoms = system.atoms_of(root);
            let Some(&anchor) = atoms.first() else {
                continue;
            };
            for &i in &atoms[1..] {
                out[i] = out[anchor] + minimum_image(&(out[i] - out[anchor]), cell);
            }
            let centroid =
                atoms.iter().map(|&i| out[i]).sum::<Vector3<f64>>() / atoms.len() as f64;
            let shift = cell.to_fractional(&centroid).map(|f| (f + 0.5).floor());
            if shift != Vector3::zeros() {
                let offset = cell.to_cartesian(&shift);
                for &i in &atoms {
                    out[i] -= offset;
                }
            }
        }
        self.detached(out)
    }

    fn detached(&self, coordinates: Vec<Vector3<f64>>) -> Result<Configuration, ModelError> {
        let mut conf = Configuration::new(coordinates, None);
        for (name, data) in &self.variables {
            conf.set_variable(name, data.clone())?;
        }
        Ok(conf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::system::tests::water_system;

    fn periodic(coords: Vec<Vector3<f64>>, a: f64) -> Configuration {
        Configuration::new(coords, Some(UnitCell::cubic(a).unwrap()))
    }

    #[test]
    fn set_variable_rejects_shape_mismatch() {
        let mut conf = Configuration::new(vec![Vector3::zeros(); 3], None);
        let err = conf.set_variable("velocities", vec![Vector3::zeros(); 2]).unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidVariable {
                expected: 3,
                found: 2,
                ..
            }
        ));
        conf.set_variable("velocities", vec![Vector3::x(); 3]).unwrap();
        assert_eq!(conf.variable("velocities").unwrap()[0], Vector3::x());
        assert!(matches!(
            conf.variable("gradients"),
            Err(ModelError::UnknownVariable(_))
        ));
        assert_eq!(conf.variable_names(), ["coordinates", "velocities"]);
    }

    #[test]
    fn periodic_operations_fail_without_cell() {
        let mut conf = Configuration::new(vec![Vector3::zeros()], None);
        assert_eq!(conf.fold_coordinates(), Err(ModelError::NotPeriodic));
        assert_eq!(conf.to_box_coordinates(), Err(ModelError::NotPeriodic));
    }

    #[test]
    fn fold_maps_into_half_open_interval() {
        let mut conf = periodic(
            vec![
                Vector3::new(1.2, -0.7, 0.5),
                Vector3::new(-0.5, 3.9, -2.6),
            ],
            2.0,
        );
        conf.fold_coordinates().unwrap();
        for f in conf.to_box_coordinates().unwrap() {
            for v in f.iter() {
                assert!((-0.5..0.5).contains(v), "{v} not folded");
            }
        }
        // Ties at +0.5 go to -0.5.
        let mut tie = periodic(vec![Vector3::new(1.0, -1.0, 0.0)], 2.0);
        tie.fold_coordinates().unwrap();
        assert_eq!(tie.coordinates()[0], Vector3::new(-1.0, -1.0, 0.0));
    }

    #[test]
    fn fold_of_triclinic_half_cell_points_is_stable() {
        let cell = UnitCell::from_rows(&[
            vec![3.1, 0.0, 0.0],
            vec![1.3, 2.9, 0.0],
            vec![-0.7, 0.9, 2.6],
        ])
        .unwrap();
        let fractions = [
            Vector3::new(0.5, 0.5, 0.5),
            Vector3::new(1.5, -1.5, 0.5),
            Vector3::new(-0.5, 1.5, 2.5),
            Vector3::new(0.49999999999999994, -0.5000000000000001, 7.5),
        ];
        let coords = fractions.iter().map(|f| cell.to_cartesian(f)).collect();
        let mut conf = Configuration::new(coords, Some(cell));

        conf.fold_coordinates().unwrap();
        for f in conf.to_box_coordinates().unwrap() {
            for v in f.iter() {
                assert!((-0.5..0.5).contains(v), "{v} not folded");
            }
        }
        let once = conf.coordinates().to_vec();
        conf.fold_coordinates().unwrap();
        assert_eq!(conf.coordinates(), once.as_slice());
    }

    #[test]
    fn wrap_fraction_handles_rounding_at_the_boundary() {
        assert_eq!(wrap_fraction(0.5), -0.5);
        assert_eq!(wrap_fraction(1.5), -0.5);
        assert_eq!(wrap_fraction(-0.5), -0.5);
        let just_below = 0.49999999999999994;
        assert_eq!(wrap_fraction(just_below), just_below);
        assert!((-0.5..0.5).contains(&wrap_fraction(-1.5000000000000002)));
    }

    #[test]
    fn fold_is_idempotent() {
        let cell = UnitCell::from_rows(&[
            vec![2.0, 0.0, 0.0],
            vec![0.4, 1.7, 0.0],
            vec![0.2, 0.3, 1.9],
        ])
        .unwrap();
        let mut conf = Configuration::new(
            vec![Vector3::new(5.3, -3.1, 2.2), Vector3::new(-7.7, 0.01, 9.9)],
            Some(cell),
        );
        conf.fold_coordinates().unwrap();
        let once = conf.coordinates().to_vec();
        conf.fold_coordinates().unwrap();
        assert_eq!(conf.coordinates(), once.as_slice());
    }

    #[test]
    fn box_real_round_trip() {
        let conf = periodic(vec![Vector3::new(0.3, 1.7, -4.2)], 3.0);
        let back = conf.to_real_coordinates(&conf.to_box_coordinates().unwrap()).unwrap();
        assert!((back[0] - conf.coordinates()[0]).norm() < 1e-10);
    }

    #[test]
    fn continuous_configuration_rejoins_broken_molecule() {
        let mut system = water_system(1);
        system.add_bond(0, 1).unwrap();
        system.add_bond(0, 2).unwrap();
        let conf = periodic(
            vec![
                Vector3::new(0.95, 0.0, 0.0),
                Vector3::new(-0.95, 0.0, 0.0),
                Vector3::new(0.95, 0.09, 0.0),
            ],
            2.0,
        );
        let whole = conf.continuous_configuration(&system).unwrap();
        assert!(!whole.is_periodic());
        assert!((whole.coordinates()[1] - Vector3::new(1.05, 0.0, 0.0)).norm() < 1e-12);
        assert!((whole.coordinates()[2] - Vector3::new(0.95, 0.09, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn contiguous_configuration_recentres_molecule() {
        let system = water_system(1);
        let conf = periodic(
            vec![
                Vector3::new(2.9, 0.0, 0.0),
                Vector3::new(-2.9, 0.0, 0.0),
                Vector3::new(2.9, 0.1, 0.0),
            ],
            6.0,
        );
        let whole = conf.contiguous_configuration(&system).unwrap();
        let xs: Vec<f64> = whole.coordinates().iter().map(|r| r.x).collect();
        assert!((xs[1] - xs[0] - 0.2).abs() < 1e-12);
    }
}
