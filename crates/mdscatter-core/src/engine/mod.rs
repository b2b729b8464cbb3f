//! # Engine Module
//!
//! The job framework every analysis runs on.
//!
//! ## Overview
//!
//! A job is an [`job::Analysis`] wrapped into the object-safe [`job::Job`] and registered
//! with the [`Engine`] under a name. Running it goes through the same phases every time:
//!
//! 1. **Configuration** ([`configurators`]): the raw parameter table is checked against the
//!    job's declared settings and resolved in dependency order into typed values.
//! 2. **Initialization**: the analysis builds its step runner from the configuration.
//! 3. **Execution** ([`executor`]): steps run on the owner thread or on a scoped worker
//!    pool; payloads are combined on the owner thread only, optionally in index order.
//! 4. **Finalization and output** ([`output`]): the analysis produces its named variables,
//!    which are written in each requested format together with a parameter header.
//!
//! Progress and cancellation go through one shared [`progress::StatusReporter`].
//!
//! ## Error Handling
//!
//! Every fallible engine operation returns [`error::EngineError`]; parameter problems are
//! [`config::ConfigError`], wrapped as [`error::EngineError::Config`].

pub mod config;
pub mod configurators;
pub mod context;
pub mod error;
pub mod executor;
pub mod job;
pub mod output;
pub mod progress;

#[cfg(test)]
pub(crate) mod testing;

pub use context::Engine;
