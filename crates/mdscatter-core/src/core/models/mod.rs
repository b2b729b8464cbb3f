//! # Core Models Module
//!
//! Data structures describing the simulated sample and its frames.
//!
//! ## Key Components
//!
//! - [`unit_cell`] - Row-wise direct lattice with cached inverse and derived descriptors
//! - [`entity`] - Entity kinds, atoms, and grouping levels of the chemistry tree
//! - [`builder`] - Owned subtree descriptions validated on insertion
//! - [`system`] - The [`system::ChemicalSystem`] arena with its flat atom list and bond table
//! - [`configuration`] - Per-frame coordinates, variables, and periodic operations
//! - [`ids`] - Arena keys
//!
//! ## Usage
//!
//! ```ignore
//! use mdscatter::core::models::{builder::EntityBuilder, system::ChemicalSystem};
//!
//! let mut system = ChemicalSystem::new("waterbox");
//! system.add_chemical_entity(
//!     EntityBuilder::molecule("WAT1", "WAT")
//!         .with_child(EntityBuilder::atom("O", "OW"))
//!         .with_child(EntityBuilder::atom("H", "HW1"))
//!         .with_child(EntityBuilder::atom("H", "HW2")),
//! )?;
//! assert_eq!(system.number_of_atoms(), 3);
//! ```

pub mod builder;
pub mod configuration;
pub mod entity;
pub mod error;
pub mod ids;
pub mod system;
pub mod unit_cell;
