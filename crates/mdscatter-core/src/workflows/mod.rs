//! # Workflows Module
//!
//! The concrete analyses shipped with mdscatter, and the helpers that register them.
//!
//! ## Overview
//!
//! Every analysis implements [`Analysis`](crate::engine::job::Analysis) and is registered
//! in the engine's job registry under its `NAME`. Jobs hang under one abstract family node
//! so that listings can group them:
//!
//! - **Scattering** - [`eisf`], [`density_of_states`]
//! - **Dynamics** - [`msd`], [`rmsd`], [`rigid_body_trajectory`]
//! - **Structure** - [`pair_distribution_function`], [`voronoi`], [`sas`]
//! - **Trajectory** - [`molecule_finder`]
//!
//! [`default_engine`] is the usual entry point: the built-in atoms database with every job
//! above registered.

use crate::core::atoms::AtomsDatabase;
use crate::core::registry::{Registry, RegistryError};
use crate::engine::context::Engine;
use crate::engine::error::EngineError;
use crate::engine::job::{self, JobFactory};

pub mod common;
pub mod density_of_states;
pub mod eisf;
pub mod molecule_finder;
pub mod msd;
pub mod pair_distribution_function;
pub mod rigid_body_trajectory;
pub mod rmsd;
pub mod sas;
pub mod voronoi;

pub const SCATTERING: &str = "Scattering";
pub const DYNAMICS: &str = "Dynamics";
pub const STRUCTURE: &str = "Structure";
pub const TRAJECTORY: &str = "Trajectory";

/// Registers the family nodes and every built-in analysis into `registry`.
///
/// # Errors
///
/// [`RegistryError::Duplicate`] if any of the names is already taken.
pub fn register_jobs(registry: &mut Registry<JobFactory>) -> Result<(), RegistryError> {
    for family in [SCATTERING, DYNAMICS, STRUCTURE, TRAJECTORY] {
        registry.register_abstract(family, None)?;
    }
    let jobs: [(&str, &str, JobFactory); 9] = [
        (SCATTERING, eisf::NAME, job::boxed::<eisf::Eisf>),
        (
            SCATTERING,
            density_of_states::NAME,
            job::boxed::<density_of_states::DensityOfStates>,
        ),
        (DYNAMICS, msd::NAME, job::boxed::<msd::Msd>),
        (DYNAMICS, rmsd::NAME, job::boxed::<rmsd::Rmsd>),
        (
            DYNAMICS,
            rigid_body_trajectory::NAME,
            job::boxed::<rigid_body_trajectory::RigidBodyTrajectory>,
        ),
        (
            STRUCTURE,
            pair_distribution_function::NAME,
            job::boxed::<pair_distribution_function::PairDistributionFunction>,
        ),
        (STRUCTURE, voronoi::NAME, job::boxed::<voronoi::Voronoi>),
        (STRUCTURE, sas::NAME, job::boxed::<sas::Sas>),
        (
            TRAJECTORY,
            molecule_finder::NAME,
            job::boxed::<molecule_finder::MoleculeFinder>,
        ),
    ];
    for (family, name, factory) in jobs {
        registry.register_under(family, name, factory)?;
    }
    Ok(())
}

/// An engine over `atoms` with every built-in analysis registered.
pub fn engine_with(atoms: AtomsDatabase) -> Result<Engine, EngineError> {
    let mut engine = Engine::new(atoms);
    register_jobs(engine.jobs_mut())?;
    Ok(engine)
}

/// [`engine_with`] the built-in atoms database.
pub fn default_engine() -> Result<Engine, EngineError> {
    engine_with(AtomsDatabase::builtin()?)
}
