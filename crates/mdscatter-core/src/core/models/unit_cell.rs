use super::error::ModelError;
use nalgebra::{Matrix3, Vector3};

const EQUALITY_TOLERANCE: f64 = 1e-8;

/// The lattice of one frame, stored as a row-wise 3×3 direct matrix.
///
/// Rows are the `a`, `b` and `c` lattice vectors. A cartesian position `r` and its
/// fractional counterpart `f` are related by `r = Dᵀ·f`. The inverse is computed once at
/// construction; replacing the cell means building a new value.
#[derive(Debug, Clone, Copy)]
pub struct UnitCell {
    direct: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl UnitCell {
    /// Builds a cell from its direct matrix.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidUnitCell`] if the matrix is singular or contains
    /// non-finite entries.
    pub fn new(direct: Matrix3<f64>) -> Result<Self, ModelError> {
        if direct.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::InvalidUnitCell(
                "matrix contains non-finite values".to_string(),
            ));
        }
        let inverse = direct
            .try_inverse()
            .filter(|_| direct.determinant().abs() > f64::EPSILON)
            .ok_or_else(|| ModelError::InvalidUnitCell("matrix is singular".to_string()))?;
        Ok(Self { direct, inverse })
    }

    /// Builds a cell from nested rows, checking the `(3, 3)` shape.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, ModelError> {
        if rows.len() != 3 || rows.iter().any(|r| r.len() != 3) {
            let shape: Vec<usize> = rows.iter().map(Vec::len).collect();
            return Err(ModelError::InvalidUnitCell(format!(
                "expected shape (3, 3), got {} rows of lengths {:?}",
                rows.len(),
                shape
            )));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::new(Matrix3::from_row_slice(&flat))
    }

    /// Builds a cell from nine row-major values.
    pub fn from_row_slice(values: &[f64]) -> Result<Self, ModelError> {
        if values.len() != 9 {
            return Err(ModelError::InvalidUnitCell(format!(
                "expected 9 values, got {}",
                values.len()
            )));
        }
        Self::new(Matrix3::from_row_slice(values))
    }

    pub fn cubic(a: f64) -> Result<Self, ModelError> {
        Self::orthorhombic(a, a, a)
    }

    pub fn orthorhombic(a: f64, b: f64, c: f64) -> Result<Self, ModelError> {
        Self::new(Matrix3::from_diagonal(&Vector3::new(a, b, c)))
    }

    pub fn a_vector(&self) -> Vector3<f64> {
        self.direct.row(0).transpose()
    }

    pub fn b_vector(&self) -> Vector3<f64> {
        self.direct.row(1).transpose()
    }

    pub fn c_vector(&self) -> Vector3<f64> {
        self.direct.row(2).transpose()
    }

    pub fn direct(&self) -> &Matrix3<f64> {
        &self.direct
    }

    pub fn inverse(&self) -> &Matrix3<f64> {
        &self.inverse
    }

    pub fn transposed_direct(&self) -> Matrix3<f64> {
        self.direct.transpose()
    }

    pub fn transposed_inverse(&self) -> Matrix3<f64> {
        self.inverse.transpose()
    }

    pub fn volume(&self) -> f64 {
        self.direct.determinant().abs()
    }

    /// Returns the lattice lengths and the α, β, γ angles in degrees.
    pub fn abc_and_angles(&self) -> ([f64; 3], [f64; 3]) {
        let (a, b, c) = (self.a_vector(), self.b_vector(), self.c_vector());
        let angle = |u: &Vector3<f64>, v: &Vector3<f64>| {
            (u.dot(v) / (u.norm() * v.norm()))
                .clamp(-1.0, 1.0)
                .acos()
                .to_degrees()
        };
        (
            [a.norm(), b.norm(), c.norm()],
            [angle(&b, &c), angle(&a, &c), angle(&a, &b)],
        )
    }

    /// True when all off-diagonal elements are zero.
    pub fn is_orthorhombic(&self) -> bool {
        (0..3).all(|i| (0..3).all(|j| i == j || self.direct[(i, j)] == 0.0))
    }

    pub fn to_fractional(&self, position: &Vector3<f64>) -> Vector3<f64> {
        self.inverse.tr_mul(position)
    }

    pub fn to_cartesian(&self, fractional: &Vector3<f64>) -> Vector3<f64> {
        self.direct.tr_mul(fractional)
    }

    /// Row-major flattening, the layout used by the trajectory store.
    pub fn to_row_vec(&self) -> Vec<f64> {
        (0..3)
            .flat_map(|i| (0..3).map(move |j| self.direct[(i, j)]))
            .collect()
    }

    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        self.direct
            .iter()
            .zip(other.direct.iter())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

impl PartialEq for UnitCell {
    fn eq(&self, other: &Self) -> bool {
        self.approx_eq(other, EQUALITY_TOLERANCE)
    }
}
