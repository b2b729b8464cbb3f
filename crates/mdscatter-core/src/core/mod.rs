//! # Core Module
//!
//! Stateless building blocks shared by every analysis: the chemistry model, the
//! trajectory store, the element database and the geometric and reciprocal-space
//! utilities built on top of them.
//!
//! ## Architecture
//!
//! - **Chemistry and frames** ([`models`]) - unit cells, the chemical entity tree, bonds
//!   and per-frame configurations
//! - **Element data** ([`atoms`]) - the typed, user-extensible atoms database
//! - **Storage** ([`io`]) - the chunked binary container and trajectory readers/writers
//! - **Bond perception** ([`connectivity`]) - covalent-radius bond detection and
//!   molecule rebuilding
//! - **Atom selection** ([`selection`]) - the selection language and substructure matching
//! - **Reciprocal space** ([`qvectors`]) - q-shell generators
//! - **Space partitioning** ([`tessellation`]) - periodic and open Voronoi cells
//! - **Extensibility** ([`registry`]) - case-insensitive, name-keyed factory registries
//! - **Parameters** ([`value`]) - the loosely typed value tree read from parameter files
//! - **Utilities** ([`utils`]) - geometry kernels and unit conversion
//!
//! Lengths are in nm, times in ps and wave vectors in nm⁻¹ throughout.

pub mod atoms;
pub mod connectivity;
pub mod io;
pub mod models;
pub mod qvectors;
pub mod registry;
pub mod selection;
pub mod tessellation;
pub mod utils;
pub mod value;
