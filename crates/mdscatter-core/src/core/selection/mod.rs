//! Atom selection: an expression language over the chemical system and the substructure
//! matchers it delegates to.
//!
//! Expressions are terms combined left to right with `|` (union) and `&` (intersection);
//! a leading `!` complements the following term.
//!
//! | term                  | selects                                                 |
//! |-----------------------|---------------------------------------------------------|
//! | `all`                 | every atom                                              |
//! | `element H O`         | atoms of the listed elements                            |
//! | `name OW HW1`         | atoms with the listed names                             |
//! | `index 0 4-7`         | atoms by index, ranges inclusive                        |
//! | `molecule WAT H2O`    | atoms of molecules matching a name, code, or formula    |
//! | `substructure O-H`    | atoms on a matching bonded chain                        |

pub mod substructure;

use crate::core::models::entity::GroupingLevel;
use crate::core::models::error::ModelError;
use crate::core::models::system::ChemicalSystem;
use crate::core::registry::Registry;
use std::collections::BTreeSet;
use substructure::{ChainMatcher, SubstructureMatcher};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SelectionError {
    #[error("Empty selection expression")]
    EmptyExpression,
    #[error("Unknown selection keyword: '{0}'")]
    UnknownKeyword(String),
    #[error("Keyword '{0}' needs at least one argument")]
    MissingArguments(String),
    #[error("Invalid atom index or range: '{0}'")]
    InvalidIndex(String),
    #[error("Operator '{0}' is not preceded by a term")]
    DanglingOperator(String),
    #[error("Invalid substructure pattern: '{0}'")]
    InvalidPattern(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Turns a selection string into an ascending set of atom indices. Must be deterministic.
pub trait Selector: Send + Sync {
    fn select(
        &self,
        system: &ChemicalSystem,
        expression: &str,
    ) -> Result<BTreeSet<usize>, SelectionError>;
}

/// The built-in expression language described in the module docs.
pub struct ExpressionSelector {
    matcher: Box<dyn SubstructureMatcher>,
}

impl Default for ExpressionSelector {
    fn default() -> Self {
        Self::new(Box::new(ChainMatcher))
    }
}

impl ExpressionSelector {
    pub fn new(matcher: Box<dyn SubstructureMatcher>) -> Self {
        Self { matcher }
    }

    fn term(
        &self,
        system: &ChemicalSystem,
        keyword: &str,
        args: &[&str],
    ) -> Result<BTreeSet<usize>, SelectionError> {
        let keyword = keyword.to_ascii_lowercase();
        if keyword != "all" && args.is_empty() {
            return Err(SelectionError::MissingArguments(keyword));
        }
        let atoms = system.atom_list();
        let out = match keyword.as_str() {
            "all" => (0..atoms.len()).collect(),
            "element" => atoms
                .iter()
                .filter(|a| args.iter().any(|s| a.symbol.eq_ignore_ascii_case(s)))
                .map(|a| a.index)
                .collect(),
            "name" => atoms
                .iter()
                .filter(|a| args.contains(&a.name.as_str()))
                .map(|a| a.index)
                .collect(),
            "index" => {
                let mut out = BTreeSet::new();
                for arg in args {
                    let (lo, hi) = parse_range(arg)?;
                    if hi >= atoms.len() {
                        return Err(ModelError::AtomIndexOutOfRange {
                            index: hi,
                            count: atoms.len(),
                        }
                        .into());
                    }
                    out.extend(lo..=hi);
                }
                out
            }
            "molecule" => {
                let kinds = GroupingLevel::Molecule.kinds();
                let mut out = BTreeSet::new();
                for (id, entity) in system.entities() {
                    if !kinds.contains(&entity.kind) {
                        continue;
                    }
                    let members = system.atoms_of(id);
                    let formula = system.formula(&members);
                    let hit = args.iter().any(|s| {
                        *s == entity.name || Some(*s) == entity.code.as_deref() || *s == formula
                    });
                    if hit {
                        out.extend(members);
                    }
                }
                out
            }
            "substructure" => {
                let mut out = BTreeSet::new();
                for pattern in args {
                    out.extend(self.matcher.matches(system, pattern)?);
                }
                out
            }
            _ => return Err(SelectionError::UnknownKeyword(keyword)),
        };
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combine {
    Union,
    Intersection,
}

impl Selector for ExpressionSelector {
    fn select(
        &self,
        system: &ChemicalSystem,
        expression: &str,
    ) -> Result<BTreeSet<usize>, SelectionError> {
        let tokens = tokenize(expression);
        if tokens.is_empty() {
            return Err(SelectionError::EmptyExpression);
        }
        let universe: BTreeSet<usize> = (0..system.number_of_atoms()).collect();

        let mut result: Option<BTreeSet<usize>> = None;
        let mut pending = Combine::Union;
        let mut negate = false;
        let mut i = 0;
        while i < tokens.len() {
            match tokens[i] {
                "|" | "&" => {
                    if result.is_none() || negate {
                        return Err(SelectionError::DanglingOperator(tokens[i].to_string()));
                    }
                    pending = if tokens[i] == "|" {
                        Combine::Union
                    } else {
                        Combine::Intersection
                    };
                    i += 1;
                }
                "!" => {
                    negate = !negate;
                    i += 1;
                }
                keyword => {
                    let end = tokens[i + 1..]
                        .iter()
                        .position(|t| matches!(*t, "|" | "&" | "!"))
                        .map_or(tokens.len(), |p| i + 1 + p);
                    let mut set = self.term(system, keyword, &tokens[i + 1..end])?;
                    if negate {
                        set = universe.difference(&set).copied().collect();
                        negate = false;
                    }
                    result = Some(match (result, pending) {
                        (None, _) => set,
                        (Some(acc), Combine::Union) => acc.union(&set).copied().collect(),
                        (Some(acc), Combine::Intersection) => {
                            acc.intersection(&set).copied().collect()
                        }
                    });
                    i = end;
                }
            }
        }
        if negate {
            return Err(SelectionError::DanglingOperator("!".to_string()));
        }
        result.ok_or(SelectionError::EmptyExpression)
    }
}

/// Selects exactly the listed indices; the expression is a whitespace or comma separated
/// list of indices and inclusive ranges.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexSelector;

impl Selector for IndexSelector {
    fn select(
        &self,
        system: &ChemicalSystem,
        expression: &str,
    ) -> Result<BTreeSet<usize>, SelectionError> {
        let mut out = BTreeSet::new();
        for token in expression.split([',', ' ', '\t']).filter(|t| !t.is_empty()) {
            let (lo, hi) = parse_range(token)?;
            if hi >= system.number_of_atoms() {
                return Err(ModelError::AtomIndexOutOfRange {
                    index: hi,
                    count: system.number_of_atoms(),
                }
                .into());
            }
            out.extend(lo..=hi);
        }
        if out.is_empty() {
            return Err(SelectionError::EmptyExpression);
        }
        Ok(out)
    }
}

pub const EXPRESSION: &str = "expression";
pub const INDICES: &str = "indices";

pub type SelectorFactory = fn() -> Box<dyn Selector>;

fn expression_selector() -> Box<dyn Selector> {
    Box::new(ExpressionSelector::default())
}

fn index_selector() -> Box<dyn Selector> {
    Box::new(IndexSelector)
}

pub fn registry() -> Registry<SelectorFactory> {
    let mut registry: Registry<SelectorFactory> = Registry::new("selector");
    // Names are distinct constants.
    let _ = registry.register(EXPRESSION, expression_selector);
    let _ = registry.register(INDICES, index_selector);
    registry
}

fn tokenize(expression: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    for word in expression.split_whitespace() {
        let mut rest = word;
        while !rest.is_empty() {
            match rest.find(['|', '&', '!']) {
                Some(0) => {
                    tokens.push(&rest[..1]);
                    rest = &rest[1..];
                }
                Some(p) => {
                    tokens.push(&rest[..p]);
                    rest = &rest[p..];
                }
                None => {
                    tokens.push(rest);
                    rest = "";
                }
            }
        }
    }
    tokens
}

fn parse_range(token: &str) -> Result<(usize, usize), SelectionError> {
    let invalid = || SelectionError::InvalidIndex(token.to_string());
    match token.split_once('-') {
        Some((lo, hi)) => {
            let lo: usize = lo.trim().parse().map_err(|_| invalid())?;
            let hi: usize = hi.trim().parse().map_err(|_| invalid())?;
            if lo > hi {
                return Err(invalid());
            }
            Ok((lo, hi))
        }
        None => {
            let v: usize = token.trim().parse().map_err(|_| invalid())?;
            Ok((v, v))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::system::tests::water_system;

    fn select(expression: &str) -> Result<Vec<usize>, SelectionError> {
        let system = water_system(3);
        ExpressionSelector::default()
            .select(&system, expression)
            .map(|s| s.into_iter().collect())
    }

    #[test]
    fn basic_terms() {
        assert_eq!(select("all").unwrap().len(), 9);
        assert_eq!(select("element O").unwrap(), [0, 3, 6]);
        assert_eq!(select("name HW1 HW2").unwrap(), [1, 2, 4, 5, 7, 8]);
        assert_eq!(select("index 0 4-5").unwrap(), [0, 4, 5]);
        assert_eq!(select("molecule WAT2").unwrap(), [3, 4, 5]);
        assert_eq!(select("molecule H2O").unwrap().len(), 9);
    }

    #[test]
    fn operators_combine_left_to_right() {
        assert_eq!(select("element O | index 1").unwrap(), [0, 1, 3, 6]);
        assert_eq!(select("element H & molecule WAT1").unwrap(), [1, 2]);
        assert_eq!(select("!element H").unwrap(), [0, 3, 6]);
        assert_eq!(select("all&!element H").unwrap(), [0, 3, 6]);
    }

    #[test]
    fn errors_are_reported() {
        assert_eq!(select("   "), Err(SelectionError::EmptyExpression));
        assert_eq!(
            select("residue ALA"),
            Err(SelectionError::UnknownKeyword("residue".to_string()))
        );
        assert_eq!(
            select("element"),
            Err(SelectionError::MissingArguments("element".to_string()))
        );
        assert_eq!(
            select("| element O"),
            Err(SelectionError::DanglingOperator("|".to_string()))
        );
        assert!(matches!(select("index 5-2"), Err(SelectionError::InvalidIndex(_))));
        assert!(matches!(select("index 42"), Err(SelectionError::Model(_))));
    }

    #[test]
    fn index_selector_accepts_lists_and_ranges() {
        let system = water_system(2);
        let set = IndexSelector.select(&system, "0, 2-3 5").unwrap();
        assert_eq!(set.into_iter().collect::<Vec<_>>(), [0, 2, 3, 5]);
    }

    #[test]
    fn tokenize_splits_glued_operators() {
        assert_eq!(tokenize("a|b &!c"), ["a", "|", "b", "&", "!", "c"]);
    }
}
