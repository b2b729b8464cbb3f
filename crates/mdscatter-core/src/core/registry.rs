//! Name-keyed registries of factories, one per extensible family (jobs, configurators,
//! output formats, q-vector generators, selectors).
//!
//! Each registry is a small tree: entries hang under an optional parent, which lets a
//! family expose intermediate abstract groups (for instance lattice-based q-vector
//! generators) while lookups stay flat and case-insensitive.

use std::collections::{BTreeMap, HashMap, VecDeque};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown {family} '{name}'{}", suggestion_suffix(.suggestion))]
    Unknown {
        family: &'static str,
        name: String,
        suggestion: Option<String>,
    },
    #[error("{family} '{name}' is already registered")]
    Duplicate { family: &'static str, name: String },
    #[error("{family} parent '{parent}' is not registered")]
    UnknownParent { family: &'static str, parent: String },
    #[error("{family} '{name}' is abstract and cannot be instantiated")]
    Abstract { family: &'static str, name: String },
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{s}'?)"),
        None => String::new(),
    }
}

#[derive(Debug, Clone)]
struct Entry<F> {
    name: String,
    parent: Option<usize>,
    factory: Option<F>,
}

#[derive(Debug, Clone)]
pub struct Registry<F> {
    family: &'static str,
    entries: Vec<Entry<F>>,
    index: HashMap<String, usize>,
}

impl<F> Registry<F> {
    pub fn new(family: &'static str) -> Self {
        Self {
            family,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn family(&self) -> &'static str {
        self.family
    }

    /// Registers a concrete entry directly under the family root.
    pub fn register(&mut self, name: &str, factory: F) -> Result<(), RegistryError> {
        self.insert(name, None, Some(factory))
    }

    /// Registers a concrete entry under an already registered parent.
    pub fn register_under(
        &mut self,
        parent: &str,
        name: &str,
        factory: F,
    ) -> Result<(), RegistryError> {
        self.insert(name, Some(parent), Some(factory))
    }

    /// Registers a grouping node that has children but cannot be created itself.
    pub fn register_abstract(
        &mut self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<(), RegistryError> {
        self.insert(name, parent, None)
    }

    fn insert(
        &mut self,
        name: &str,
        parent: Option<&str>,
        factory: Option<F>,
    ) -> Result<(), RegistryError> {
        let key = name.to_lowercase();
        if self.index.contains_key(&key) {
            return Err(RegistryError::Duplicate {
                family: self.family,
                name: name.to_string(),
            });
        }
        let parent = match parent {
            Some(p) => Some(*self.index.get(&p.to_lowercase()).ok_or_else(|| {
                RegistryError::UnknownParent {
                    family: self.family,
                    parent: p.to_string(),
                }
            })?),
            None => None,
        };
        self.index.insert(key, self.entries.len());
        self.entries.push(Entry {
            name: name.to_string(),
            parent,
            factory,
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_lowercase())
    }

    /// The factory registered as `name`, compared case-insensitively.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Unknown`] carries the closest registered name when one is
    /// reasonably near; [`RegistryError::Abstract`] is returned for grouping nodes.
    pub fn get(&self, name: &str) -> Result<&F, RegistryError> {
        let entry = self
            .index
            .get(&name.to_lowercase())
            .map(|&i| &self.entries[i])
            .ok_or_else(|| RegistryError::Unknown {
                family: self.family,
                name: name.to_string(),
                suggestion: self.suggest(name),
            })?;
        entry.factory.as_ref().ok_or_else(|| RegistryError::Abstract {
            family: self.family,
            name: entry.name.clone(),
        })
    }

    /// Canonical spelling of a registered name.
    pub fn canonical_name(&self, name: &str) -> Option<&str> {
        self.index
            .get(&name.to_lowercase())
            .map(|&i| self.entries[i].name.as_str())
    }

    /// Direct children of the family root, in registration order.
    pub fn subclasses(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.parent.is_none())
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Direct children of a registered entry. Empty for unknown names.
    pub fn children(&self, name: &str) -> Vec<&str> {
        let Some(&parent) = self.index.get(&name.to_lowercase()) else {
            return Vec::new();
        };
        self.entries
            .iter()
            .filter(|e| e.parent == Some(parent))
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Every entry, breadth-first from the root, siblings in registration order.
    pub fn indirect_subclasses(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(self.entries.len());
        let mut queue: VecDeque<Option<usize>> = VecDeque::from([None]);
        while let Some(parent) = queue.pop_front() {
            for (i, entry) in self.entries.iter().enumerate() {
                if entry.parent == parent {
                    out.push(entry.name.as_str());
                    queue.push_back(Some(i));
                }
            }
        }
        out
    }

    /// Concrete entries keyed by name.
    pub fn indirect_subclass_dictionary(&self) -> BTreeMap<&str, &F> {
        self.entries
            .iter()
            .filter_map(|e| e.factory.as_ref().map(|f| (e.name.as_str(), f)))
            .collect()
    }

    /// Names of the concrete entries, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| e.factory.is_some())
            .map(|e| e.name.as_str())
    }

    fn suggest(&self, name: &str) -> Option<String> {
        closest(name, self.entries.iter().map(|e| e.name.as_str())).map(str::to_string)
    }
}

/// The candidate nearest to `name` by [`edit_distance`], compared case-insensitively.
///
/// Candidates further than about half their length are ignored. Equal distances prefer
/// the candidate whose length is closest to `name`, then the earliest one.
pub fn closest<'a>(name: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let wanted = name.to_lowercase();
    let wanted_len = wanted.chars().count();
    candidates
        .into_iter()
        .map(|candidate| {
            let lower = candidate.to_lowercase();
            let len = lower.chars().count();
            (edit_distance(&wanted, &lower), len.abs_diff(wanted_len), len, candidate)
        })
        .filter(|(d, _, len, _)| *d <= (*len).max(3) / 2 + 1)
        .min_by_key(|(d, len_gap, _, _)| (*d, *len_gap))
        .map(|(_, _, _, candidate)| candidate)
}

/// Optimal string alignment distance: unit costs for insertion, deletion, substitution
/// and transposition of two adjacent characters.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut rows = vec![vec![0usize; b.len() + 1]; a.len() + 1];
    for (i, row) in rows.iter_mut().enumerate() {
        row[0] = i;
    }
    rows[0] = (0..=b.len()).collect();
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut best = (rows[i - 1][j] + 1)
                .min(rows[i][j - 1] + 1)
                .min(rows[i - 1][j - 1] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                best = best.min(rows[i - 2][j - 2] + 1);
            }
            rows[i][j] = best;
        }
    }
    rows[a.len()][b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Registry<fn() -> u32> {
        let mut registry: Registry<fn() -> u32> = Registry::new("QVectors");
        registry.register_abstract("LatticeQVectors", None).unwrap();
        registry.register("spherical_vectors", || 1).unwrap();
        registry
            .register_under("LatticeQVectors", "spherical_lattice", || 2)
            .unwrap();
        registry
            .register_under("LatticeQVectors", "linear_lattice", || 3)
            .unwrap();
        registry
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = sample();
        assert_eq!(registry.get("Spherical_Lattice").unwrap()(), 2);
        assert_eq!(registry.get("LINEAR_LATTICE").unwrap()(), 3);
        assert_eq!(registry.canonical_name("SPHERICAL_VECTORS"), Some("spherical_vectors"));
    }

    #[test]
    fn every_concrete_entry_is_creatable() {
        let registry = sample();
        for (name, factory) in registry.indirect_subclass_dictionary() {
            assert_eq!(registry.get(name).unwrap()(), factory());
        }
    }

    #[test]
    fn unknown_names_suggest_the_nearest_entry() {
        let registry = sample();
        let err = registry.get("sphercal_latice").unwrap_err();
        assert_eq!(
            err,
            RegistryError::Unknown {
                family: "QVectors",
                name: "sphercal_latice".to_string(),
                suggestion: Some("spherical_lattice".to_string()),
            }
        );
        assert!(err.to_string().contains("did you mean 'spherical_lattice'"));
        assert!(matches!(
            registry.get("zzz"),
            Err(RegistryError::Unknown { suggestion: None, .. })
        ));
    }

    #[test]
    fn tree_queries() {
        let registry = sample();
        assert_eq!(registry.subclasses(), ["LatticeQVectors", "spherical_vectors"]);
        assert_eq!(
            registry.indirect_subclasses(),
            [
                "LatticeQVectors",
                "spherical_vectors",
                "spherical_lattice",
                "linear_lattice"
            ]
        );
        assert_eq!(
            registry.children("latticeqvectors"),
            ["spherical_lattice", "linear_lattice"]
        );
        assert!(registry.children("missing").is_empty());
        assert!(matches!(
            registry.get("latticeqvectors"),
            Err(RegistryError::Abstract { .. })
        ));
    }

    #[test]
    fn duplicates_and_missing_parents_are_rejected() {
        let mut registry = sample();
        assert!(matches!(
            registry.register("Spherical_Vectors", || 9),
            Err(RegistryError::Duplicate { .. })
        ));
        assert!(matches!(
            registry.register_under("nope", "x", || 9),
            Err(RegistryError::UnknownParent { .. })
        ));
    }

    #[test]
    fn edit_distances() {
        assert_eq!(edit_distance("kitten", "sitting"), 3);
        assert_eq!(edit_distance("", "abc"), 3);
        assert_eq!(edit_distance("same", "same"), 0);
        assert_eq!(edit_distance("rsmd", "rmsd"), 1);
        assert_eq!(edit_distance("ca", "abc"), 3);
    }

    #[test]
    fn swapped_letters_suggest_the_transposed_name() {
        let mut registry: Registry<fn() -> u32> = Registry::new("job");
        for name in ["msd", "rmsd", "eisf"] {
            registry.register(name, || 0).unwrap();
        }
        assert!(matches!(
            registry.get("rsmd"),
            Err(RegistryError::Unknown { suggestion: Some(s), .. }) if s == "rmsd"
        ));
        assert_eq!(closest("MDS", ["msd", "rmsd"]), Some("msd"));
        assert_eq!(closest("eifs", ["msd", "rmsd", "eisf"]), Some("eisf"));
    }
}
