use super::builder::EntityBuilder;
use super::entity::{Atom, AtomGroup, Entity, EntityKind, GroupingLevel};
use super::error::ModelError;
use super::ids::EntityId;
use slotmap::SlotMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

/// The whole sample: a forest of chemical entities plus a flat, index-ordered atom list.
///
/// Entities live in a slot-map arena and refer to each other by [`EntityId`]. Atom indices
/// follow insertion order (depth first within each added subtree) and never change once
/// assigned. Bonds are kept in a side adjacency table keyed by atom index.
#[derive(Debug, Clone, Default)]
pub struct ChemicalSystem {
    name: String,
    entities: SlotMap<EntityId, Entity>,
    top_level: Vec<EntityId>,
    atoms: Vec<Atom>,
    bonds: Vec<BTreeSet<usize>>,
    unique_molecules: OnceLock<Vec<String>>,
}

impl ChemicalSystem {
    /// Creates an empty system.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    /// Adds a top-level entity and all of its descendants.
    ///
    /// # Arguments
    ///
    /// * `builder` - The subtree to insert.
    ///
    /// # Return
    ///
    /// The id of the new top-level entity.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidEntity`] or [`ModelError::InvalidNesting`] if the subtree
    /// breaks the kind nesting rules; the system is left untouched in that case.
    pub fn add_chemical_entity(&mut self, builder: EntityBuilder) -> Result<EntityId, ModelError> {
        if !builder.kind.can_be_top_level() {
            return Err(ModelError::InvalidEntity(format!(
                "a {} cannot be added at the top level",
                builder.kind
            )));
        }
        builder.validate()?;

        let mut root = None;
        let mut stack: Vec<(EntityBuilder, Option<EntityId>)> = vec![(builder, None)];
        while let Some((node, parent)) = stack.pop() {
            let atom_index = (node.kind == EntityKind::Atom).then(|| self.atoms.len());
            let id = self.entities.insert(Entity {
                kind: node.kind,
                name: node.name.clone(),
                code: node.code.clone(),
                parent,
                children: Vec::new(),
                atom_index,
            });
            if let Some(index) = atom_index {
                self.atoms.push(Atom {
                    symbol: node.symbol.clone().unwrap_or_default(),
                    name: node.name.clone(),
                    index,
                    ghost: node.ghost,
                    entity: id,
                });
                self.bonds.push(BTreeSet::new());
            }
            match parent {
                Some(p) => self.entities[p].children.push(id),
                None => root = Some(id),
            }
            stack.extend(node.children.into_iter().rev().map(|c| (c, Some(id))));
        }

        let root = root.ok_or_else(|| ModelError::InvalidEntity("empty subtree".to_string()))?;
        self.top_level.push(root);
        self.unique_molecules = OnceLock::new();
        Ok(root)
    }

    pub fn atom_list(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn number_of_atoms(&self) -> usize {
        self.atoms.len()
    }

    pub fn atom(&self, index: usize) -> Result<&Atom, ModelError> {
        self.atoms.get(index).ok_or(ModelError::AtomIndexOutOfRange {
            index,
            count: self.atoms.len(),
        })
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn entities(&self) -> impl Iterator<Item = (EntityId, &Entity)> {
        self.entities.iter()
    }

    pub fn top_level_entities(&self) -> &[EntityId] {
        &self.top_level
    }

    pub fn parent(&self, id: EntityId) -> Option<EntityId> {
        self.entities.get(id).and_then(|e| e.parent)
    }

    pub fn children(&self, id: EntityId) -> &[EntityId] {
        self.entities
            .get(id)
            .map(|e| e.children.as_slice())
            .unwrap_or(&[])
    }

    /// Walks up from an atom to the nearest ancestor whose kind is in `kinds`.
    pub fn ancestor_of_kind(&self, atom_index: usize, kinds: &[EntityKind]) -> Option<EntityId> {
        let mut current = self.atoms.get(atom_index)?.entity;
        while let Some(parent) = self.parent(current) {
            if kinds.contains(&self.entities[parent].kind) {
                return Some(parent);
            }
            current = parent;
        }
        None
    }

    /// The top-level entity an atom belongs to.
    pub fn root_of(&self, atom_index: usize) -> Option<EntityId> {
        let mut current = self.atoms.get(atom_index)?.entity;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        Some(current)
    }

    /// Atom indices under an entity, ascending.
    pub fn atoms_of(&self, id: EntityId) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(entity) = self.entities.get(current) else {
                continue;
            };
            if let Some(index) = entity.atom_index {
                out.push(index);
            }
            stack.extend(entity.children.iter().copied());
        }
        out.sort_unstable();
        out
    }

    pub fn add_bond(&mut self, a: usize, b: usize) -> Result<(), ModelError> {
        let count = self.atoms.len();
        for index in [a, b] {
            if index >= count {
                return Err(ModelError::AtomIndexOutOfRange { index, count });
            }
        }
        if a == b {
            return Err(ModelError::SelfBond(a));
        }
        self.bonds[a].insert(b);
        self.bonds[b].insert(a);
        Ok(())
    }

    pub fn bonded(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.bonds.get(index).into_iter().flatten().copied()
    }

    /// Every bond once, as `(low, high)` pairs in ascending order.
    pub fn bond_pairs(&self) -> Vec<(usize, usize)> {
        self.bonds
            .iter()
            .enumerate()
            .flat_map(|(i, set)| set.range(i + 1..).map(move |&j| (i, j)))
            .collect()
    }

    pub fn number_of_bonds(&self) -> usize {
        self.bonds.iter().map(BTreeSet::len).sum::<usize>() / 2
    }

    pub fn clear_bonds(&mut self) {
        self.bonds.iter_mut().for_each(BTreeSet::clear);
    }

    /// Pools the selected atoms at the requested level.
    ///
    /// Groups keep only selected atoms and are ordered by their lowest atom index.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::MissingGroupingLevel`] when a selected atom has no ancestor at
    /// `level`.
    pub fn group_atoms(
        &self,
        level: GroupingLevel,
        selection: &[usize],
    ) -> Result<Vec<AtomGroup>, ModelError> {
        let mut sorted: Vec<usize> = selection.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        if level == GroupingLevel::Atom {
            return sorted
                .into_iter()
                .map(|i| {
                    let atom = self.atom(i)?;
                    Ok(AtomGroup {
                        name: atom.name.clone(),
                        atoms: vec![i],
                    })
                })
                .collect();
        }

        let mut order: Vec<EntityId> = Vec::new();
        let mut groups: HashMap<EntityId, Vec<usize>> = HashMap::new();
        for index in sorted {
            self.atom(index)?;
            let owner = self
                .ancestor_of_kind(index, level.kinds())
                .ok_or(ModelError::MissingGroupingLevel { atom: index, level })?;
            groups
                .entry(owner)
                .or_insert_with(|| {
                    order.push(owner);
                    Vec::new()
                })
                .push(index);
        }
        Ok(order
            .into_iter()
            .map(|id| AtomGroup {
                name: self.entities[id].name.clone(),
                atoms: groups.remove(&id).unwrap_or_default(),
            })
            .collect())
    }

    /// Splits the selection by element symbol.
    pub fn atoms_by_element(&self, selection: &[usize]) -> BTreeMap<String, Vec<usize>> {
        let mut out: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for &index in selection {
            if let Some(atom) = self.atoms.get(index) {
                out.entry(atom.symbol.clone()).or_default().push(index);
            }
        }
        out
    }

    /// Hill formula of a set of atoms: carbon, then hydrogen, then the rest alphabetically.
    /// Without carbon every element is alphabetical.
    pub fn formula(&self, atoms: &[usize]) -> String {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for &index in atoms {
            if let Some(atom) = self.atoms.get(index) {
                *counts.entry(atom.symbol.as_str()).or_default() += 1;
            }
        }
        let mut ordered: Vec<(&str, usize)> = Vec::with_capacity(counts.len());
        if let Some(c) = counts.remove("C") {
            ordered.push(("C", c));
            if let Some(h) = counts.remove("H") {
                ordered.push(("H", h));
            }
        }
        ordered.extend(counts);
        ordered
            .into_iter()
            .map(|(symbol, n)| {
                if n == 1 {
                    symbol.to_string()
                } else {
                    format!("{symbol}{n}")
                }
            })
            .collect()
    }

    /// Distinct Hill formulas of the molecule-level entities, sorted. Computed once.
    pub fn unique_molecules(&self) -> &[String] {
        self.unique_molecules.get_or_init(|| {
            let formulas: BTreeSet<String> = self
                .entities
                .iter()
                .filter(|(_, e)| GroupingLevel::Molecule.kinds().contains(&e.kind))
                .map(|(id, _)| self.formula(&self.atoms_of(id)))
                .collect();
            formulas.into_iter().collect()
        })
    }

    /// Rebuilds owned builders for every top-level entity, in order.
    pub fn to_builders(&self) -> Vec<EntityBuilder> {
        self.top_level
            .iter()
            .filter_map(|&id| self.subtree_builder(id, None))
            .collect()
    }

    /// A new system holding only `selection` (ascending, deduplicated). Containers left
    /// empty are dropped and bonds between kept atoms are carried over.
    pub fn subset(&self, selection: &[usize]) -> Result<ChemicalSystem, ModelError> {
        let mut keep: Vec<usize> = selection.to_vec();
        keep.sort_unstable();
        keep.dedup();
        for &index in &keep {
            self.atom(index)?;
        }
        let keep_set: BTreeSet<usize> = keep.iter().copied().collect();

        let mut out = ChemicalSystem::new(&self.name);
        for &id in &self.top_level {
            if let Some(builder) = self.subtree_builder(id, Some(&keep_set)) {
                out.add_chemical_entity(builder)?;
            }
        }
        let remap: HashMap<usize, usize> = keep.iter().enumerate().map(|(n, &o)| (o, n)).collect();
        for (a, b) in self.bond_pairs() {
            if let (Some(&na), Some(&nb)) = (remap.get(&a), remap.get(&b)) {
                out.add_bond(na, nb)?;
            }
        }
        Ok(out)
    }

    fn subtree_builder(
        &self,
        id: EntityId,
        keep: Option<&BTreeSet<usize>>,
    ) -> Option<EntityBuilder> {
        let entity = self.entities.get(id)?;
        if let Some(index) = entity.atom_index {
            if keep.is_some_and(|k| !k.contains(&index)) {
                return None;
            }
            let atom = &self.atoms[index];
            let builder = EntityBuilder::atom(&atom.symbol, &atom.name);
            return Some(if atom.ghost { builder.ghost() } else { builder });
        }
        let children: Vec<EntityBuilder> = entity
            .children
            .iter()
            .filter_map(|&c| self.subtree_builder(c, keep))
            .collect();
        if children.is_empty() {
            return None;
        }
        let mut builder = EntityBuilder::of_kind(entity.kind, &entity.name).with_children(children);
        builder.code = entity.code.clone();
        Some(builder)
    }
}
