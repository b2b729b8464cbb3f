use super::SelectionError;
use crate::core::models::system::ChemicalSystem;
use std::collections::BTreeSet;

/// Resolves a chemistry substructure pattern to the atoms taking part in any match.
pub trait SubstructureMatcher: Send + Sync {
    fn matches(
        &self,
        system: &ChemicalSystem,
        pattern: &str,
    ) -> Result<BTreeSet<usize>, SelectionError>;
}

/// Matches linear chains of bonded elements such as `O-H` or `C-C-O`; `*` matches any
/// element. Every atom on a matching path is reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainMatcher;

impl SubstructureMatcher for ChainMatcher {
    fn matches(
        &self,
        system: &ChemicalSystem,
        pattern: &str,
    ) -> Result<BTreeSet<usize>, SelectionError> {
        let elements: Vec<&str> = pattern.split('-').map(str::trim).collect();
        if elements.iter().any(|e| e.is_empty()) {
            return Err(SelectionError::InvalidPattern(pattern.to_string()));
        }
        let fits = |index: usize, element: &str| {
            element == "*"
                || system
                    .atom(index)
                    .is_ok_and(|a| a.symbol.eq_ignore_ascii_case(element))
        };

        let mut found = BTreeSet::new();
        for start in 0..system.number_of_atoms() {
            if !fits(start, elements[0]) {
                continue;
            }
            let mut stack: Vec<Vec<usize>> = vec![vec![start]];
            while let Some(path) = stack.pop() {
                if path.len() == elements.len() {
                    found.extend(path);
                    continue;
                }
                let Some(&last) = path.last() else {
                    continue;
                };
                let element = elements[path.len()];
                for next in system.bonded(last) {
                    if !path.contains(&next) && fits(next, element) {
                        let mut extended = path.clone();
                        extended.push(next);
                        stack.push(extended);
                    }
                }
            }
        }
        Ok(found)
    }
}

impl ChemicalSystem {
    /// Atoms matched by `pattern` using the default [`ChainMatcher`].
    pub fn get_substructure_matches(
        &self,
        pattern: &str,
    ) -> Result<BTreeSet<usize>, SelectionError> {
        self.get_substructure_matches_with(&ChainMatcher, pattern)
    }

    pub fn get_substructure_matches_with(
        &self,
        matcher: &dyn SubstructureMatcher,
        pattern: &str,
    ) -> Result<BTreeSet<usize>, SelectionError> {
        matcher.matches(self, pattern)
    }

    pub fn has_substructure_match(&self, pattern: &str) -> Result<bool, SelectionError> {
        Ok(!self.get_substructure_matches(pattern)?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::builder::EntityBuilder;
    use crate::core::models::system::tests::water_system;

    fn bonded_waters(n: usize) -> ChemicalSystem {
        let mut system = water_system(n);
        for m in 0..n {
            system.add_bond(3 * m, 3 * m + 1).unwrap();
            system.add_bond(3 * m, 3 * m + 2).unwrap();
        }
        system
    }

    #[test]
    fn hydroxyl_pattern_matches_all_water_atoms() {
        let system = bonded_waters(2);
        let found = system.get_substructure_matches("O-H").unwrap();
        assert_eq!(found.into_iter().collect::<Vec<_>>(), [0, 1, 2, 3, 4, 5]);
        assert!(system.has_substructure_match("H-O-H").unwrap());
        assert!(!system.has_substructure_match("O-O").unwrap());
    }

    #[test]
    fn wildcard_and_longer_chains() {
        let mut system = ChemicalSystem::new("ethanol");
        system
            .add_chemical_entity(EntityBuilder::molecule("eth", "ETH").with_children([
                EntityBuilder::atom("C", "C1"),
                EntityBuilder::atom("C", "C2"),
                EntityBuilder::atom("O", "O"),
                EntityBuilder::atom("H", "HO"),
            ]))
            .unwrap();
        system.add_bond(0, 1).unwrap();
        system.add_bond(1, 2).unwrap();
        system.add_bond(2, 3).unwrap();
        let found = system.get_substructure_matches("C-C-O").unwrap();
        assert_eq!(found.into_iter().collect::<Vec<_>>(), [0, 1, 2]);
        let found = system.get_substructure_matches("*-O-H").unwrap();
        assert_eq!(found.into_iter().collect::<Vec<_>>(), [1, 2, 3]);
    }

    #[test]
    fn malformed_pattern_is_rejected() {
        let system = bonded_waters(1);
        assert!(matches!(
            system.get_substructure_matches("O--H"),
            Err(SelectionError::InvalidPattern(_))
        ));
    }
}
