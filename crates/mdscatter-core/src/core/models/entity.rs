use super::ids::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of node kinds that make up a chemistry tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Atom,
    AtomCluster,
    Molecule,
    Residue,
    Nucleotide,
    PeptideChain,
    NucleotideChain,
    Protein,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Atom,
        EntityKind::AtomCluster,
        EntityKind::Molecule,
        EntityKind::Residue,
        EntityKind::Nucleotide,
        EntityKind::PeptideChain,
        EntityKind::NucleotideChain,
        EntityKind::Protein,
    ];

    /// Stable type tag used in the `contents` manifest of a trajectory store.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Atom => "atom",
            Self::AtomCluster => "atom_cluster",
            Self::Molecule => "molecule",
            Self::Residue => "residue",
            Self::Nucleotide => "nucleotide",
            Self::PeptideChain => "peptide_chain",
            Self::NucleotideChain => "nucleotide_chain",
            Self::Protein => "protein",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    /// Name of the `chemical_system/` dataset holding records of this kind.
    pub fn dataset(self) -> &'static str {
        match self {
            Self::Atom => "atoms",
            Self::AtomCluster => "clusters",
            Self::Molecule => "molecules",
            Self::Residue => "residues",
            Self::Nucleotide => "nucleotides",
            Self::PeptideChain => "peptide_chains",
            Self::NucleotideChain => "nucleotide_chains",
            Self::Protein => "proteins",
        }
    }

    pub fn allowed_children(self) -> &'static [EntityKind] {
        match self {
            Self::Atom => &[],
            Self::AtomCluster | Self::Molecule | Self::Residue | Self::Nucleotide => {
                &[EntityKind::Atom]
            }
            Self::PeptideChain => &[EntityKind::Residue],
            Self::NucleotideChain => &[EntityKind::Nucleotide],
            Self::Protein => &[EntityKind::PeptideChain],
        }
    }

    /// Residues and nucleotides only exist inside their chains.
    pub fn can_be_top_level(self) -> bool {
        !matches!(self, Self::Residue | Self::Nucleotide)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Granularity at which per-atom quantities are pooled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingLevel {
    #[default]
    Atom,
    Molecule,
    Residue,
    Chain,
}

impl GroupingLevel {
    /// Entity kinds that form a group at this level; `Atom` has none.
    pub fn kinds(self) -> &'static [EntityKind] {
        match self {
            Self::Atom => &[],
            Self::Molecule => &[EntityKind::Molecule, EntityKind::AtomCluster],
            Self::Residue => &[EntityKind::Residue, EntityKind::Nucleotide],
            Self::Chain => &[EntityKind::PeptideChain, EntityKind::NucleotideChain],
        }
    }
}

impl FromStr for GroupingLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "atom" => Ok(Self::Atom),
            "molecule" => Ok(Self::Molecule),
            "residue" | "nucleotide" => Ok(Self::Residue),
            "chain" => Ok(Self::Chain),
            other => Err(format!("unknown grouping level '{other}'")),
        }
    }
}

impl fmt::Display for GroupingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Atom => "atom",
            Self::Molecule => "molecule",
            Self::Residue => "residue",
            Self::Chain => "chain",
        };
        f.write_str(s)
    }
}

/// A leaf of the chemistry tree. `index` is its position in the system's flat atom list.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    pub symbol: String,
    pub name: String,
    pub index: usize,
    pub ghost: bool,
    pub entity: EntityId,
}

/// A node of the chemistry tree. Parent links are plain ids and never own anything.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub kind: EntityKind,
    pub name: String,
    /// Residue or molecule code (e.g. `ALA`, `WAT`) when the kind carries one.
    pub code: Option<String>,
    pub parent: Option<EntityId>,
    pub children: Vec<EntityId>,
    /// Set for `Atom` entities only.
    pub atom_index: Option<usize>,
}

/// A pooled set of atoms produced by [`GroupingLevel`] reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomGroup {
    pub name: String,
    pub atoms: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_tag(kind.tag()), Some(kind));
        }
        assert_eq!(EntityKind::from_tag("h5atom"), None);
    }

    #[test]
    fn nesting_rules() {
        assert!(EntityKind::Molecule.allowed_children().contains(&EntityKind::Atom));
        assert!(EntityKind::Atom.allowed_children().is_empty());
        assert!(!EntityKind::Protein
            .allowed_children()
            .contains(&EntityKind::Residue));
        assert!(!EntityKind::Residue.can_be_top_level());
        assert!(EntityKind::Atom.can_be_top_level());
    }

    #[test]
    fn grouping_level_parses_case_insensitively() {
        assert_eq!("Molecule".parse::<GroupingLevel>(), Ok(GroupingLevel::Molecule));
        assert_eq!("nucleotide".parse::<GroupingLevel>(), Ok(GroupingLevel::Residue));
        assert!("galaxy".parse::<GroupingLevel>().is_err());
    }
}
