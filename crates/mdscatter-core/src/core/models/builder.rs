use super::entity::EntityKind;
use super::error::ModelError;

/// An owned description of a chemistry subtree, validated and flattened by
/// [`ChemicalSystem::add_chemical_entity`](super::system::ChemicalSystem::add_chemical_entity).
#[derive(Debug, Clone, PartialEq)]
pub struct EntityBuilder {
    pub(crate) kind: EntityKind,
    pub(crate) name: String,
    pub(crate) code: Option<String>,
    pub(crate) symbol: Option<String>,
    pub(crate) ghost: bool,
    pub(crate) children: Vec<EntityBuilder>,
}

impl EntityBuilder {
    fn node(kind: EntityKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            code: None,
            symbol: None,
            ghost: false,
            children: Vec::new(),
        }
    }

    pub fn atom(symbol: &str, name: &str) -> Self {
        let mut builder = Self::node(EntityKind::Atom, name);
        builder.symbol = Some(symbol.to_string());
        builder
    }

    pub fn cluster(name: &str) -> Self {
        Self::node(EntityKind::AtomCluster, name)
    }

    pub fn molecule(name: &str, code: &str) -> Self {
        Self::node(EntityKind::Molecule, name).with_code(code)
    }

    pub fn residue(name: &str, code: &str) -> Self {
        Self::node(EntityKind::Residue, name).with_code(code)
    }

    pub fn nucleotide(name: &str, code: &str) -> Self {
        Self::node(EntityKind::Nucleotide, name).with_code(code)
    }

    pub fn peptide_chain(name: &str) -> Self {
        Self::node(EntityKind::PeptideChain, name)
    }

    pub fn nucleotide_chain(name: &str) -> Self {
        Self::node(EntityKind::NucleotideChain, name)
    }

    pub fn protein(name: &str) -> Self {
        Self::node(EntityKind::Protein, name)
    }

    /// Generic constructor used when rebuilding entities from stored records.
    pub fn of_kind(kind: EntityKind, name: &str) -> Self {
        Self::node(kind, name)
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    pub fn with_symbol(mut self, symbol: &str) -> Self {
        self.symbol = Some(symbol.to_string());
        self
    }

    pub fn ghost(mut self) -> Self {
        self.ghost = true;
        self
    }

    pub fn with_child(mut self, child: EntityBuilder) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = EntityBuilder>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn add_child(&mut self, child: EntityBuilder) {
        self.children.push(child);
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of atoms in the subtree.
    pub fn atom_count(&self) -> usize {
        match self.kind {
            EntityKind::Atom => 1,
            _ => self.children.iter().map(EntityBuilder::atom_count).sum(),
        }
    }

    /// Checks the subtree against the kind nesting rules without touching any system.
    pub fn validate(&self) -> Result<(), ModelError> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.kind == EntityKind::Atom {
                match &node.symbol {
                    Some(s) if !s.is_empty() => {}
                    _ => {
                        return Err(ModelError::InvalidEntity(format!(
                            "atom '{}' has no element symbol",
                            node.name
                        )));
                    }
                }
            } else if node.children.is_empty() {
                return Err(ModelError::InvalidEntity(format!(
                    "{} '{}' has no children",
                    node.kind, node.name
                )));
            }
            for child in &node.children {
                if !node.kind.allowed_children().contains(&child.kind) {
                    return Err(ModelError::InvalidNesting {
                        parent: node.kind,
                        child: child.kind,
                    });
                }
                stack.push(child);
            }
        }
        Ok(())
    }
}
