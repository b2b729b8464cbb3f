//! Provides the on-disk trajectory store and its readers and writers.
//!
//! [`store`] is the hierarchical binary container; [`codec`] persists a chemical system
//! inside it; [`trajectory`] and [`trajectory_writer`] give frame-level access on top.

pub mod codec;
pub mod store;
pub mod trajectory;
pub mod trajectory_writer;
