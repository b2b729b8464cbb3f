use super::entity::{EntityKind, GroupingLevel};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("Invalid unit cell: {0}")]
    InvalidUnitCell(String),

    #[error("Variable '{name}' must hold {expected} rows, got {found}")]
    InvalidVariable {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Configuration has no variable named '{0}'")]
    UnknownVariable(String),

    #[error("Operation requires a periodic configuration")]
    NotPeriodic,

    #[error("Invalid chemical entity: {0}")]
    InvalidEntity(String),

    #[error("A {child:?} cannot be placed inside a {parent:?}")]
    InvalidNesting { parent: EntityKind, child: EntityKind },

    #[error("Atom index {index} is out of range for a system of {count} atoms")]
    AtomIndexOutOfRange { index: usize, count: usize },

    #[error("Atom {atom} does not belong to any entity at the '{level}' level")]
    MissingGroupingLevel { atom: usize, level: GroupingLevel },

    #[error("An atom cannot be bonded to itself (index {0})")]
    SelfBond(usize),
}
