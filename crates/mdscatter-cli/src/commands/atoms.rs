use crate::cli::{AtomsArgs, AtomsCommands};
use crate::data::DataManager;
use crate::error::{CliError, Result};
use crate::utils::parser;
use mdscatter::core::atoms::{AtomsDatabase, PropertyType, PropertyValue};
use std::io::{self, Write};
use tracing::info;

pub fn run(args: AtomsArgs) -> Result<()> {
    let manager = DataManager::new()?;
    let mut database = manager.load_atoms()?;
    let stdout = io::stdout();
    if apply(&mut database, args.command, &mut stdout.lock())? {
        manager.save_atoms(&database)?;
        println!("Atoms database saved to {}", manager.atoms_path().display());
    }
    Ok(())
}

/// Applies one subcommand. Returns whether the database was modified.
fn apply(
    database: &mut AtomsDatabase,
    command: AtomsCommands,
    out: &mut impl Write,
) -> Result<bool> {
    match command {
        AtomsCommands::Show { symbol: None } => {
            let symbols: Vec<&str> = database.symbols().collect();
            writeln!(out, "{} elements: {}", symbols.len(), symbols.join(" "))?;
            let properties: Vec<String> = database
                .properties()
                .iter()
                .map(|(name, ty)| format!("{name} ({ty})"))
                .collect();
            writeln!(out, "properties: {}", properties.join(", "))?;
            Ok(false)
        }
        AtomsCommands::Show { symbol: Some(symbol) } => {
            let record = database.get(&symbol)?;
            writeln!(out, "{symbol}")?;
            for (name, value) in record {
                writeln!(out, "  {name:<24} {value}")?;
            }
            Ok(false)
        }
        AtomsCommands::AddAtom { symbol } => {
            database.add_atom(&symbol)?;
            info!("Added atom '{}'", symbol);
            Ok(true)
        }
        AtomsCommands::AddProperty {
            name,
            property_type,
        } => {
            let property_type: PropertyType = property_type.parse()?;
            database.add_property(&name, property_type)?;
            info!("Added property '{}' of type {}", name, property_type);
            Ok(true)
        }
        AtomsCommands::Set {
            symbol,
            property,
            value,
        } => {
            let value: PropertyValue = parser::parse_value(&value).to_typed().map_err(|e| {
                CliError::Argument(format!("'{value}' is not a valid property value: {e}"))
            })?;
            database.set_value(&symbol, &property, value)?;
            Ok(true)
        }
    }
}
