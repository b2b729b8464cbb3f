use crate::core::models::unit_cell::UnitCell;
use nalgebra::{Matrix3, Matrix4, Quaternion, SymmetricEigen, UnitQuaternion, Vector3};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Cannot superpose empty or mismatched point sets ({reference} vs {target} points)")]
    MismatchedPointSets { reference: usize, target: usize },
    #[error("Superposition failed: {0}")]
    SuperpositionFailed(String),
}

/// Shortest periodic image of a displacement.
///
/// Displacements are first wrapped in fractional space; skewed cells then also test the 26
/// neighbouring images, since wrapping alone is not exact for them.
pub fn minimum_image(delta: &Vector3<f64>, cell: &UnitCell) -> Vector3<f64> {
    let frac = cell.to_fractional(delta).map(|f| f - f.round());
    let wrapped = cell.to_cartesian(&frac);
    if cell.is_orthorhombic() {
        return wrapped;
    }
    let mut best = wrapped;
    let mut best_norm = wrapped.norm_squared();
    for i in -1..=1 {
        for j in -1..=1 {
            for k in -1..=1 {
                if i == 0 && j == 0 && k == 0 {
                    continue;
                }
                let offset = Vector3::new(i as f64, j as f64, k as f64);
                let candidate = wrapped + cell.to_cartesian(&offset);
                let norm = candidate.norm_squared();
                if norm < best_norm {
                    best = candidate;
                    best_norm = norm;
                }
            }
        }
    }
    best
}

/// Weighted centroid. Returns the origin when the weights sum to zero.
pub fn center_of_mass(positions: &[Vector3<f64>], masses: &[f64]) -> Vector3<f64> {
    let total: f64 = masses.iter().sum();
    if total == 0.0 {
        return Vector3::zeros();
    }
    positions
        .iter()
        .zip(masses)
        .map(|(r, m)| r * *m)
        .sum::<Vector3<f64>>()
        / total
}

/// `n` nearly uniform unit vectors on a golden-angle spiral.
pub fn golden_spiral(n: usize) -> Vec<Vector3<f64>> {
    let golden_angle = std::f64::consts::PI * (3.0 - 5f64.sqrt());
    (0..n)
        .map(|i| {
            let z = 1.0 - (2.0 * i as f64 + 1.0) / n as f64;
            let radius = (1.0 - z * z).max(0.0).sqrt();
            let theta = golden_angle * i as f64;
            Vector3::new(radius * theta.cos(), radius * theta.sin(), z)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Superposition {
    /// Rotation taking the centred target onto the centred reference, scalar part ≥ 0.
    pub rotation: UnitQuaternion<f64>,
    pub reference_center: Vector3<f64>,
    pub target_center: Vector3<f64>,
    /// Weighted RMS deviation after the fit.
    pub rms: f64,
}

impl Superposition {
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        self.rotation.to_rotation_matrix().into_inner()
    }

    pub fn apply(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * (point - self.target_center) + self.reference_center
    }
}

/// Optimal weighted rigid superposition by Horn's quaternion method.
pub fn superpose(
    reference: &[Vector3<f64>],
    target: &[Vector3<f64>],
    weights: &[f64],
) -> Result<Superposition, GeometryError> {
    if reference.is_empty() || reference.len() != target.len() || weights.len() != target.len() {
        return Err(GeometryError::MismatchedPointSets {
            reference: reference.len(),
            target: target.len(),
        });
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(GeometryError::SuperpositionFailed(
            "weights sum to zero".to_string(),
        ));
    }
    let reference_center = center_of_mass(reference, weights);
    let target_center = center_of_mass(target, weights);

    let mut m = Matrix3::zeros();
    for ((r, t), w) in reference.iter().zip(target).zip(weights) {
        let a = t - target_center;
        let b = r - reference_center;
        m += a * b.transpose() * *w;
    }

    let (sxx, sxy, sxz) = (m[(0, 0)], m[(0, 1)], m[(0, 2)]);
    let (syx, syy, syz) = (m[(1, 0)], m[(1, 1)], m[(1, 2)]);
    let (szx, szy, szz) = (m[(2, 0)], m[(2, 1)], m[(2, 2)]);
    #[rustfmt::skip]
    let n = Matrix4::new(
        sxx + syy + szz, syz - szy,        szx - sxz,        sxy - syx,
        syz - szy,       sxx - syy - szz,  sxy + syx,        szx + sxz,
        szx - sxz,       sxy + syx,        -sxx + syy - szz, syz + szy,
        sxy - syx,       szx + sxz,        syz + szy,        -sxx - syy + szz,
    );

    let eigen = SymmetricEigen::new(n);
    let (best, lambda) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, v)| (i, *v))
        .ok_or_else(|| GeometryError::SuperpositionFailed("no eigenvalues".to_string()))?;
    let v = eigen.eigenvectors.column(best);
    if !lambda.is_finite() || v.iter().any(|x| !x.is_finite()) {
        return Err(GeometryError::SuperpositionFailed(
            "eigen decomposition did not converge".to_string(),
        ));
    }
    let sign = if v[0] < 0.0 { -1.0 } else { 1.0 };
    let rotation = UnitQuaternion::from_quaternion(Quaternion::new(
        sign * v[0],
        sign * v[1],
        sign * v[2],
        sign * v[3],
    ));
    let residual: f64 = reference
        .iter()
        .zip(target)
        .zip(weights)
        .map(|((r, t), w)| {
            w * (rotation * (t - target_center) - (r - reference_center)).norm_squared()
        })
        .sum();
    let rms = (residual / total).sqrt();

    Ok(Superposition {
        rotation,
        reference_center,
        target_center,
        rms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Unit;

    #[test]
    fn minimum_image_orthorhombic() {
        let cell = UnitCell::cubic(2.0).unwrap();
        let d = minimum_image(&Vector3::new(1.9, -1.2, 0.3), &cell);
        assert!((d - Vector3::new(-0.1, 0.8, 0.3)).norm() < 1e-12);
    }

    #[test]
    fn minimum_image_skewed_is_never_longer_than_wrapped() {
        let cell = UnitCell::from_rows(&[
            vec![1.0, 0.0, 0.0],
            vec![0.9, 0.5, 0.0],
            vec![0.0, 0.0, 1.0],
        ])
        .unwrap();
        let delta = Vector3::new(0.45, 0.24, 0.0);
        let d = minimum_image(&delta, &cell);
        assert!(d.norm() <= delta.norm() + 1e-12);
    }

    #[test]
    fn golden_spiral_points_are_unit_vectors() {
        let points = golden_spiral(100);
        assert_eq!(points.len(), 100);
        for p in &points {
            assert!((p.norm() - 1.0).abs() < 1e-12);
        }
        let mean: Vector3<f64> = points.iter().sum::<Vector3<f64>>() / 100.0;
        assert!(mean.norm() < 0.05);
    }

    #[test]
    fn superpose_recovers_known_rotation() {
        let reference = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 2.0, 0.0),
            Vector3::new(0.0, 0.0, 3.0),
        ];
        let rotation = UnitQuaternion::from_axis_angle(
            &Unit::new_normalize(Vector3::new(1.0, 1.0, 0.0)),
            0.7,
        );
        let shift = Vector3::new(5.0, -1.0, 2.0);
        let target: Vec<Vector3<f64>> = reference.iter().map(|r| rotation * r + shift).collect();
        let fit = superpose(&reference, &target, &[1.0; 4]).unwrap();
        assert!(fit.rms < 1e-9);
        for (r, t) in reference.iter().zip(&target) {
            assert!((fit.apply(t) - r).norm() < 1e-9);
        }
        assert!(fit.rotation.angle_to(&rotation.inverse()) < 1e-9);
        assert!(fit.rotation.w >= 0.0);
    }

    #[test]
    fn superpose_rms_stays_exact_for_widely_spread_points() {
        let reference: Vec<Vector3<f64>> = (0..6)
            .map(|i| {
                let i = i as f64;
                Vector3::new(1.0e4 * i, -3.0e3 * i * i, 2.5e3 * (i - 2.0))
            })
            .collect();
        let rotation = UnitQuaternion::from_euler_angles(0.3, -1.1, 2.0);
        let target: Vec<Vector3<f64>> = reference.iter().map(|r| rotation * r).collect();
        let fit = superpose(&reference, &target, &[1.0; 6]).unwrap();
        assert!(fit.rms < 1e-8, "rms {} should vanish", fit.rms);
    }

    #[test]
    fn superpose_rms_matches_the_fitted_residuals() {
        let reference = vec![
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
        ];
        let mut target = reference.clone();
        target[3].x += 0.2;
        let weights = [1.0, 2.0, 1.0, 0.5];
        let fit = superpose(&reference, &target, &weights).unwrap();

        let direct: f64 = reference
            .iter()
            .zip(&target)
            .zip(&weights)
            .map(|((r, t), w)| w * (fit.apply(t) - r).norm_squared())
            .sum::<f64>()
            / weights.iter().sum::<f64>();
        assert!(fit.rms > 0.01);
        assert!((fit.rms - direct.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn superpose_rejects_mismatched_inputs() {
        let err = superpose(&[Vector3::zeros()], &[], &[]).unwrap_err();
        assert!(matches!(err, GeometryError::MismatchedPointSets { .. }));
    }
}
