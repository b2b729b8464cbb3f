use crate::error::{CliError, Result};
use mdscatter::core::value::Value;
use mdscatter::engine::Engine;
use mdscatter::engine::configurators::Setting;
use mdscatter::workflows;
use std::io::{self, Write};

pub fn run(job: &str) -> Result<()> {
    let engine = workflows::default_engine()?;
    let stdout = io::stdout();
    write_info(&engine, job, &mut stdout.lock())
}

fn effective_default(engine: &Engine, setting: &Setting) -> Result<(Value, Option<Vec<String>>)> {
    let factory = engine.configurators().get(setting.kind)?;
    let configurator = factory(setting).map_err(|e| CliError::Config(e.to_string()))?;
    let default = setting
        .default
        .clone()
        .unwrap_or_else(|| configurator.default_value());
    Ok((default, configurator.choices()))
}

fn write_info(engine: &Engine, job: &str, out: &mut impl Write) -> Result<()> {
    let settings = engine.job_settings(job)?;
    let name = engine.jobs().canonical_name(job).unwrap_or(job);
    writeln!(out, "{name}")?;

    let width = settings.iter().map(|s| s.name.len()).max().unwrap_or(0);
    for setting in &settings {
        let (default, choices) = effective_default(engine, setting)?;
        let default = if default.is_null() {
            "(required)".to_string()
        } else {
            default.to_string()
        };
        writeln!(
            out,
            "  {:<width$}  {:<22} {}  [{}]",
            setting.name, setting.kind, default, setting.label
        )?;
        if let Some(choices) = choices {
            writeln!(out, "  {:<width$}  choices: {}", "", choices.join(", "))?;
        }
    }
    Ok(())
}
