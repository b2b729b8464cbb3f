use crate::core::models::unit_cell::UnitCell;
use crate::core::utils::geometry::minimum_image;
use nalgebra::Vector3;
use thiserror::Error;
use tracing::{debug, instrument};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Faces smaller than this fraction of the cell's squared radius are dropped.
const AREA_EPSILON: f64 = 1e-12;
const DISTANCE_EPSILON: f64 = 1e-12;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TessellationError {
    #[error("Periodic tessellation needs an orthorhombic cell")]
    NonOrthorhombic,
    #[error("Cannot tessellate an empty point set")]
    Empty,
}

/// The Voronoi cell of one point.
#[derive(Debug, Clone, PartialEq)]
pub struct VoronoiCell {
    pub volume: f64,
    /// Indices of the points sharing a face of non-zero area, sorted and distinct.
    pub neighbours: Vec<usize>,
}

#[derive(Debug, Clone)]
struct Face {
    /// Point whose bisector made this face; `None` for the bounding box.
    neighbour: Option<usize>,
    vertices: Vec<Vector3<f64>>,
}

/// A convex polyhedron around the origin, stored face by face.
#[derive(Debug, Clone)]
struct Polyhedron {
    faces: Vec<Face>,
}

impl Polyhedron {
    /// Axis-aligned box `[lo, hi]`, given relative to the generator.
    fn cuboid(lo: Vector3<f64>, hi: Vector3<f64>, neighbour: Option<usize>) -> Self {
        let corner = |x: bool, y: bool, z: bool| {
            Vector3::new(
                if x { hi.x } else { lo.x },
                if y { hi.y } else { lo.y },
                if z { hi.z } else { lo.z },
            )
        };
        let quad = |a, b, c, d| Face {
            neighbour,
            vertices: vec![a, b, c, d],
        };
        let (f, t) = (false, true);
        Self {
            faces: vec![
                quad(corner(f, f, f), corner(f, t, f), corner(f, t, t), corner(f, f, t)),
                quad(corner(t, f, f), corner(t, f, t), corner(t, t, t), corner(t, t, f)),
                quad(corner(f, f, f), corner(f, f, t), corner(t, f, t), corner(t, f, f)),
                quad(corner(f, t, f), corner(t, t, f), corner(t, t, t), corner(f, t, t)),
                quad(corner(f, f, f), corner(t, f, f), corner(t, t, f), corner(f, t, f)),
                quad(corner(f, f, t), corner(f, t, t), corner(t, t, t), corner(t, f, t)),
            ],
        }
    }

    fn max_radius_squared(&self) -> f64 {
        self.faces
            .iter()
            .flat_map(|f| f.vertices.iter())
            .map(|v| v.norm_squared())
            .fold(0.0, f64::max)
    }

    /// Keeps the half-space `x · normal ≤ offset`; `normal` has unit length.
    fn clip(&mut self, normal: &Vector3<f64>, offset: f64, neighbour: usize) {
        let side = |v: &Vector3<f64>| v.dot(normal) - offset;
        let outside = self
            .faces
            .iter()
            .flat_map(|f| f.vertices.iter())
            .any(|v| side(v) > DISTANCE_EPSILON);
        if !outside {
            return;
        }

        let mut cut = Vec::new();
        let mut faces = Vec::with_capacity(self.faces.len() + 1);
        for face in self.faces.drain(..) {
            let n = face.vertices.len();
            let mut kept = Vec::with_capacity(n + 1);
            for k in 0..n {
                let (a, b) = (face.vertices[k], face.vertices[(k + 1) % n]);
                let (sa, sb) = (side(&a), side(&b));
                let a_in = sa <= DISTANCE_EPSILON;
                let b_in = sb <= DISTANCE_EPSILON;
                if a_in {
                    kept.push(a);
                    if sa.abs() <= DISTANCE_EPSILON {
                        cut.push(a);
                    }
                }
                if a_in != b_in {
                    let point = a + (b - a) * (sa / (sa - sb));
                    kept.push(point);
                    cut.push(point);
                }
            }
            if kept.len() >= 3 {
                faces.push(Face {
                    neighbour: face.neighbour,
                    vertices: kept,
                });
            }
        }
        if let Some(vertices) = ordered_polygon(cut, normal) {
            faces.push(Face {
                neighbour: Some(neighbour),
                vertices,
            });
        }
        self.faces = faces;
    }

    /// Volume by fan triangulation against the origin, which lies inside.
    fn volume(&self) -> f64 {
        self.faces
            .iter()
            .map(|face| {
                let v0 = face.vertices[0];
                face.vertices[1..]
                    .windows(2)
                    .map(|w| v0.dot(&w[0].cross(&w[1])).abs() / 6.0)
                    .sum::<f64>()
            })
            .sum()
    }
}

fn polygon_area(vertices: &[Vector3<f64>]) -> f64 {
    let Some(&v0) = vertices.first() else {
        return 0.0;
    };
    vertices[1..]
        .windows(2)
        .map(|w| (w[0] - v0).cross(&(w[1] - v0)))
        .sum::<Vector3<f64>>()
        .norm()
        / 2.0
}

/// Distinct points of a planar convex section, ordered by angle around their centroid.
fn ordered_polygon(points: Vec<Vector3<f64>>, normal: &Vector3<f64>) -> Option<Vec<Vector3<f64>>> {
    let mut distinct: Vec<Vector3<f64>> = Vec::with_capacity(points.len());
    for p in points {
        if distinct.iter().all(|q| (p - q).norm_squared() > DISTANCE_EPSILON * DISTANCE_EPSILON) {
            distinct.push(p);
        }
    }
    if distinct.len() < 3 {
        return None;
    }
    let centroid = distinct.iter().sum::<Vector3<f64>>() / distinct.len() as f64;
    let u = (distinct[0] - centroid).normalize();
    let v = normal.cross(&u);
    let mut angled: Vec<(f64, Vector3<f64>)> = distinct
        .into_iter()
        .map(|p| {
            let d = p - centroid;
            (d.dot(&v).atan2(d.dot(&u)), p)
        })
        .collect();
    angled.sort_by(|a, b| a.0.total_cmp(&b.0));
    Some(angled.into_iter().map(|(_, p)| p).collect())
}

/// Voronoi cells of `points`.
///
/// With a cell the tessellation is periodic and every cell starts as the box centred on its
/// point; neighbours are searched among the 27 nearest images. Without one the cells are
/// clipped to the axis-aligned bounding box of the points, padded by `padding`.
#[instrument(skip_all, name = "voronoi", fields(points = points.len()))]
pub fn voronoi_cells(
    points: &[Vector3<f64>],
    cell: Option<&UnitCell>,
    padding: f64,
) -> Result<Vec<VoronoiCell>, TessellationError> {
    if points.is_empty() {
        return Err(TessellationError::Empty);
    }
    if cell.is_some_and(|c| !c.is_orthorhombic()) {
        return Err(TessellationError::NonOrthorhombic);
    }
    let (lo, hi, own_faces) = match cell {
        Some(cell) => {
            let half = Vector3::new(cell.a_vector().x, cell.b_vector().y, cell.c_vector().z) / 2.0;
            (-half, half, true)
        }
        None => {
            let lo = points.iter().fold(Vector3::repeat(f64::INFINITY), |a, p| a.inf(p));
            let hi = points.iter().fold(Vector3::repeat(f64::NEG_INFINITY), |a, p| a.sup(p));
            (lo.add_scalar(-padding), hi.add_scalar(padding), false)
        }
    };

    let cell_of = |i: usize| -> VoronoiCell {
        let origin = points[i];
        let mut polyhedron = if own_faces {
            Polyhedron::cuboid(lo, hi, Some(i))
        } else {
            Polyhedron::cuboid(lo - origin, hi - origin, None)
        };

        let mut candidates: Vec<(f64, usize, Vector3<f64>)> = Vec::new();
        for (j, point) in points.iter().enumerate() {
            let delta = point - origin;
            match cell {
                Some(cell) => {
                    let nearest = minimum_image(&delta, cell);
                    for a in -1..=1 {
                        for b in -1..=1 {
                            for c in -1..=1 {
                                let shift =
                                    cell.to_cartesian(&Vector3::new(a as f64, b as f64, c as f64));
                                let image = nearest + shift;
                                let norm = image.norm();
                                if norm > DISTANCE_EPSILON {
                                    candidates.push((norm, j, image));
                                }
                            }
                        }
                    }
                }
                None if j != i => candidates.push((delta.norm(), j, delta)),
                None => {}
            }
        }
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut radius_squared = polyhedron.max_radius_squared();
        for (distance, j, image) in candidates {
            if (distance / 2.0).powi(2) >= radius_squared {
                break;
            }
            polyhedron.clip(&(image / distance), distance / 2.0, j);
            radius_squared = polyhedron.max_radius_squared();
        }

        let min_area = AREA_EPSILON * radius_squared.max(f64::MIN_POSITIVE);
        let mut neighbours: Vec<usize> = polyhedron
            .faces
            .iter()
            .filter(|f| polygon_area(&f.vertices) > min_area)
            .filter_map(|f| f.neighbour)
            .filter(|&j| j != i)
            .collect();
        neighbours.sort_unstable();
        neighbours.dedup();
        VoronoiCell {
            volume: polyhedron.volume(),
            neighbours,
        }
    };

    #[cfg(feature = "parallel")]
    let cells: Vec<VoronoiCell> = (0..points.len()).into_par_iter().map(cell_of).collect();
    #[cfg(not(feature = "parallel"))]
    let cells: Vec<VoronoiCell> = (0..points.len()).map(cell_of).collect();

    debug!(total_volume = cells.iter().map(|c| c.volume).sum::<f64>(), "Tessellation done.");
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jittered_lattice(n: usize, spacing: f64) -> Vec<Vector3<f64>> {
        let mut points = Vec::new();
        let mut k: f64 = 0.0;
        for i in 0..n {
            for j in 0..n {
                for l in 0..n {
                    k += 1.0;
                    let jitter =
                        Vector3::new((1.3 * k).sin(), (2.1 * k).cos(), (0.7 * k).sin()) * 0.05;
                    let site = Vector3::new(i as f64, j as f64, l as f64).add_scalar(0.5);
                    points.push((site + jitter) * spacing);
                }
            }
        }
        points
    }

    #[test]
    fn single_point_fills_the_periodic_box() {
        let cell = UnitCell::orthorhombic(1.0, 2.0, 3.0).unwrap();
        let cells = voronoi_cells(&[Vector3::new(0.2, 0.4, 0.1)], Some(&cell), 0.0).unwrap();
        assert!((cells[0].volume - 6.0).abs() < 1e-12);
        assert!(cells[0].neighbours.is_empty());
    }

    #[test]
    fn simple_cubic_lattice_has_six_neighbours() {
        let cell = UnitCell::cubic(3.0).unwrap();
        let points: Vec<_> = (0..27)
            .map(|k| {
                Vector3::new((k / 9) as f64, ((k / 3) % 3) as f64, (k % 3) as f64).add_scalar(0.5)
            })
            .collect();
        let cells = voronoi_cells(&points, Some(&cell), 0.0).unwrap();
        for c in &cells {
            assert!((c.volume - 1.0).abs() < 1e-9);
            assert_eq!(c.neighbours.len(), 6);
        }
    }

    #[test]
    fn periodic_volumes_tile_the_box() {
        let cell = UnitCell::cubic(4.0).unwrap();
        let points = jittered_lattice(4, 1.0);
        let cells = voronoi_cells(&points, Some(&cell), 0.0).unwrap();
        let total: f64 = cells.iter().map(|c| c.volume).sum();
        assert!((total - 64.0).abs() < 64.0 * 1e-6, "{total}");
        for (i, c) in cells.iter().enumerate() {
            for &j in &c.neighbours {
                assert!(cells[j].neighbours.contains(&i));
            }
        }
    }

    #[test]
    fn open_volumes_tile_the_padded_bounds() {
        let points = jittered_lattice(3, 1.0);
        let cells = voronoi_cells(&points, None, 0.5).unwrap();
        let lo = points
            .iter()
            .fold(Vector3::repeat(f64::INFINITY), |a, p| a.inf(p))
            .add_scalar(-0.5);
        let hi = points
            .iter()
            .fold(Vector3::repeat(f64::NEG_INFINITY), |a, p| a.sup(p))
            .add_scalar(0.5);
        let expected = (hi - lo).product();
        let total: f64 = cells.iter().map(|c| c.volume).sum();
        assert!((total - expected).abs() < expected * 1e-6);
    }

    #[test]
    fn skewed_cells_are_rejected() {
        let cell = UnitCell::from_rows(&[
            vec![1.0, 0.0, 0.0],
            vec![0.5, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ])
        .unwrap();
        assert_eq!(
            voronoi_cells(&[Vector3::zeros()], Some(&cell), 0.0).unwrap_err(),
            TessellationError::NonOrthorhombic
        );
    }
}
