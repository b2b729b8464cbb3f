use thiserror::Error;

use super::config::ConfigError;
use super::output::FormatError;
use crate::core::atoms::AtomsDatabaseError;
use crate::core::connectivity::ConnectivityError;
use crate::core::io::codec::CodecError;
use crate::core::io::store::StoreError;
use crate::core::io::trajectory::TrajectoryError;
use crate::core::models::error::ModelError;
use crate::core::qvectors::QVectorError;
use crate::core::registry::RegistryError;
use crate::core::selection::SelectionError;
use crate::core::tessellation::TessellationError;
use crate::core::utils::geometry::GeometryError;
use crate::core::utils::units::UnitsError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Trajectory error: {0}")]
    Trajectory(#[from] TrajectoryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Atoms database error: {0}")]
    Atoms(#[from] AtomsDatabaseError),

    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),

    #[error("Q-vector error: {0}")]
    QVectors(#[from] QVectorError),

    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Tessellation(#[from] TessellationError),

    #[error("Output error: {0}")]
    Format(#[from] FormatError),

    #[error(transparent)]
    Units(#[from] UnitsError),

    #[error("Step {index} failed: {message}")]
    StepFailed { index: usize, message: String },

    #[error("Worker crashed while running step {index}: {message}")]
    WorkerCrashed { index: usize, message: String },

    #[error("Job '{0}' was cancelled")]
    Cancelled(String),

    #[error("Atom selection is empty")]
    EmptySelection,

    #[error("'{0}' needs an orthorhombic unit cell")]
    NonOrthorhombic(&'static str),

    #[error("'{0}' needs a periodic trajectory")]
    NotPeriodic(&'static str),

    #[error("Internal logic error: {0}")]
    Internal(String),
}
