//! Assembly of job parameters from a parameter file, `--set` overrides and the
//! shorthand flags of `mdscatter run`.

mod builder;
mod defaults;
mod file;
mod models;

pub use builder::ParameterBuilder;
pub use defaults::DefaultsConfig;
pub use file::JobFile;
pub use models::JobRequest;
