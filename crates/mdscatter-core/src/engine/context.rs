use super::config::ConfigError;
use super::configurators::{
    self, Configuration, ConfiguratorFactory, Instrument, Parameters, Setting,
};
use super::error::EngineError;
use super::job::{Job, JobFactory, JobOutcome};
use super::output::{self, FormatFactory};
use super::progress::StatusReporter;
use crate::core::atoms::AtomsDatabase;
use crate::core::qvectors::{self, QVectorFactory};
use crate::core::registry::{Registry, RegistryError};
use crate::core::selection::{self, SelectorFactory};
use tracing::info;

/// Everything a job needs besides its parameters: the atoms database, the known
/// instruments and the registries of every extensible family.
///
/// The engine is built once and shared read-only by all runs.
pub struct Engine {
    atoms: AtomsDatabase,
    instruments: Vec<Instrument>,
    jobs: Registry<JobFactory>,
    configurators: Registry<ConfiguratorFactory>,
    formats: Registry<FormatFactory>,
    qvectors: Registry<QVectorFactory>,
    selectors: Registry<SelectorFactory>,
}

impl Engine {
    /// An engine with the built-in configurators, formats, generators and selectors, and no
    /// jobs.
    pub fn new(atoms: AtomsDatabase) -> Self {
        Self {
            atoms,
            instruments: Vec::new(),
            jobs: Registry::new("job"),
            configurators: configurators::registry(),
            formats: output::registry(),
            qvectors: qvectors::registry(),
            selectors: selection::registry(),
        }
    }

    pub fn atoms(&self) -> &AtomsDatabase {
        &self.atoms
    }

    pub fn atoms_mut(&mut self) -> &mut AtomsDatabase {
        &mut self.atoms
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn set_instruments(&mut self, instruments: Vec<Instrument>) {
        self.instruments = instruments;
    }

    pub fn jobs(&self) -> &Registry<JobFactory> {
        &self.jobs
    }

    pub fn jobs_mut(&mut self) -> &mut Registry<JobFactory> {
        &mut self.jobs
    }

    pub fn configurators(&self) -> &Registry<ConfiguratorFactory> {
        &self.configurators
    }

    pub fn formats(&self) -> &Registry<FormatFactory> {
        &self.formats
    }

    pub fn qvectors(&self) -> &Registry<QVectorFactory> {
        &self.qvectors
    }

    pub fn selectors(&self) -> &Registry<SelectorFactory> {
        &self.selectors
    }

    pub fn create_job(&self, name: &str) -> Result<Box<dyn Job>, RegistryError> {
        Ok(self.jobs.get(name)?())
    }

    pub fn job_settings(&self, name: &str) -> Result<Vec<Setting>, RegistryError> {
        Ok(self.create_job(name)?.settings())
    }

    pub fn configure(
        &self,
        settings: &[Setting],
        parameters: &Parameters,
    ) -> Result<Configuration, ConfigError> {
        configurators::resolve(self, settings, parameters)
    }

    /// Creates the job `name` and runs it with `parameters`.
    ///
    /// # Errors
    ///
    /// Only an unknown job name is an error here; everything that goes wrong during the
    /// run is reported through [`JobOutcome::Failed`].
    pub fn run_job(
        &self,
        name: &str,
        parameters: &Parameters,
        status: &StatusReporter,
    ) -> Result<JobOutcome, EngineError> {
        let mut job = self.create_job(name)?;
        info!(job = job.name(), "Starting job.");
        Ok(job.run(self, parameters, status))
    }
}
