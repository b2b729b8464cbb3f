use phf::{Map, phf_map};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Dimensionless,
    Length,
    Time,
    InverseLength,
    Velocity,
    Mass,
    Energy,
    Area,
    Volume,
    Frequency,
    Angle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitDef {
    /// Factor to the internal unit of the same dimension (nm, ps, uma, kJ/mol, …).
    pub factor: f64,
    pub dimension: Dimension,
}

const fn unit(factor: f64, dimension: Dimension) -> UnitDef {
    UnitDef { factor, dimension }
}

static UNITS: Map<&'static str, UnitDef> = phf_map! {
    "au" => unit(1.0, Dimension::Dimensionless),
    "" => unit(1.0, Dimension::Dimensionless),
    "%" => unit(0.01, Dimension::Dimensionless),
    "nm" => unit(1.0, Dimension::Length),
    "ang" => unit(0.1, Dimension::Length),
    "pm" => unit(1e-3, Dimension::Length),
    "m" => unit(1e9, Dimension::Length),
    "ps" => unit(1.0, Dimension::Time),
    "fs" => unit(1e-3, Dimension::Time),
    "ns" => unit(1e3, Dimension::Time),
    "s" => unit(1e12, Dimension::Time),
    "1/nm" => unit(1.0, Dimension::InverseLength),
    "1/ang" => unit(10.0, Dimension::InverseLength),
    "nm/ps" => unit(1.0, Dimension::Velocity),
    "ang/fs" => unit(100.0, Dimension::Velocity),
    "ang/ps" => unit(0.1, Dimension::Velocity),
    "m/s" => unit(1e-3, Dimension::Velocity),
    "uma" => unit(1.0, Dimension::Mass),
    "g/mol" => unit(1.0, Dimension::Mass),
    "kj/mol" => unit(1.0, Dimension::Energy),
    "kcal/mol" => unit(4.184, Dimension::Energy),
    "mev" => unit(96.485_332_12e-3, Dimension::Energy),
    "nm2" => unit(1.0, Dimension::Area),
    "ang2" => unit(0.01, Dimension::Area),
    "nm3" => unit(1.0, Dimension::Volume),
    "ang3" => unit(1e-3, Dimension::Volume),
    "1/ps" => unit(1.0, Dimension::Frequency),
    "thz" => unit(1.0, Dimension::Frequency),
    "rad" => unit(1.0, Dimension::Angle),
    "deg" => unit(std::f64::consts::PI / 180.0, Dimension::Angle),
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum UnitsError {
    #[error("Unknown unit: '{0}'")]
    UnknownUnit(String),
    #[error("Cannot convert '{from}' to '{to}': incompatible dimensions")]
    Incompatible { from: String, to: String },
}

pub fn lookup(name: &str) -> Result<UnitDef, UnitsError> {
    UNITS
        .get(name.trim().to_ascii_lowercase().as_str())
        .copied()
        .ok_or_else(|| UnitsError::UnknownUnit(name.to_string()))
}

/// Multiplier taking a value expressed in `from` to `to`.
pub fn conversion_factor(from: &str, to: &str) -> Result<f64, UnitsError> {
    let (a, b) = (lookup(from)?, lookup(to)?);
    if a.dimension != b.dimension {
        return Err(UnitsError::Incompatible {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    Ok(a.factor / b.factor)
}

/// Label copy of a unit string: brackets and percent signs removed.
pub fn display_units(units: &str) -> String {
    units
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '%'))
        .collect::<String>()
        .trim()
        .to_string()
}
