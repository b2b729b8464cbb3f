//! # mdscatter Core Library
//!
//! An analysis engine that reads molecular-dynamics trajectories and computes
//! neutron-scattering and structural observables from them.
//!
//! ## Architectural Philosophy
//!
//! The library keeps the same strict three-layer split throughout:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`ChemicalSystem`,
//!   `Configuration`, `UnitCell`), the atoms database, the trajectory store and the
//!   geometric and reciprocal-space utilities.
//!
//! - **[`engine`]: The Logic Core.** The job framework: typed configurators with
//!   dependency resolution, the step executor with its worker pool and cancellation,
//!   the status reporter, and the output writers.
//!
//! - **[`workflows`]: The Public API.** The concrete analyses (EISF, RMSD, MSD, density
//!   of states, pair distribution, molecule finder, rigid-body trajectory, Voronoi,
//!   solvent-accessible surface) registered with the engine and runnable by name.

pub mod core;
pub mod engine;
pub mod workflows;
