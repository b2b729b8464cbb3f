use super::input::InputTrajectory;
use super::{Configured, Configurator, Context, Setting};
use crate::core::atoms::PropertyType;
use crate::core::models::entity::{AtomGroup, GroupingLevel};
use crate::core::models::error::ModelError;
use crate::core::models::system::ChemicalSystem;
use crate::core::selection::EXPRESSION;
use crate::core::value::Value;
use crate::engine::config::ConfigError;
use std::collections::{BTreeMap, BTreeSet};

pub const ATOM_SELECTION: &str = "atom_selection";
pub const ATOM_TRANSMUTATION: &str = "atom_transmutation";
pub const GROUPING_LEVEL: &str = "grouping_level";
pub const WEIGHTS: &str = "weights";

/// Weighting scheme that gives every group the same weight.
pub const EQUAL: &str = "equal";

/// Selected atoms, ascending and without duplicates.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomSelection {
    pub selector: String,
    pub expression: String,
    pub indices: Vec<usize>,
}

impl AtomSelection {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

#[derive(Debug)]
struct AtomSelectionConfigurator;

pub fn atom_selection(_: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(AtomSelectionConfigurator))
}

fn select(
    ctx: &Context<'_>,
    system: &ChemicalSystem,
    selector: &str,
    expression: &str,
) -> Result<BTreeSet<usize>, ConfigError> {
    let registry = ctx.engine.selectors();
    let factory = registry.get(selector).map_err(|e| ctx.invalid(e))?;
    factory()
        .select(system, expression)
        .map_err(|e| ctx.invalid(format!("'{expression}': {e}")))
}

impl Configurator for AtomSelectionConfigurator {
    fn default_value(&self) -> Value {
        Value::from("all")
    }

    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let input: &InputTrajectory = ctx.dependency("trajectory")?;
        let (selector, expression) = match value {
            Value::Null => (EXPRESSION.to_string(), "all".to_string()),
            Value::Str(expression) => (EXPRESSION.to_string(), expression.clone()),
            Value::List(items) => {
                let indices = items
                    .iter()
                    .map(|v| {
                        v.as_i64()
                            .map(|i| i.to_string())
                            .ok_or_else(|| ctx.wrong_type("an atom index", v))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                (crate::core::selection::INDICES.to_string(), indices.join(","))
            }
            Value::Table(table) => {
                let expression = table
                    .get("expression")
                    .ok_or_else(|| ctx.missing())?;
                let expression = expression
                    .as_str()
                    .ok_or_else(|| ctx.wrong_type("a selection expression", expression))?;
                let selector = table.get("selector").and_then(Value::as_str).unwrap_or(EXPRESSION);
                (selector.to_string(), expression.to_string())
            }
            other => return Err(ctx.wrong_type("a selection expression", other)),
        };
        let indices = select(ctx, &input.system, &selector, &expression)?;
        if indices.is_empty() {
            return Err(ctx.invalid(format!("'{expression}' selects no atom")));
        }
        Ok(Configured::AtomSelection(AtomSelection {
            selector,
            expression,
            indices: indices.into_iter().collect(),
        }))
    }
}

/// Element overrides for some atoms of the selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transmutation {
    pub symbols: BTreeMap<usize, String>,
}

impl Transmutation {
    /// The element of atom `index`, after overrides.
    pub fn symbol<'a>(
        &'a self,
        system: &'a ChemicalSystem,
        index: usize,
    ) -> Result<&'a str, ModelError> {
        match self.symbols.get(&index) {
            Some(symbol) => Ok(symbol),
            None => Ok(system.atom(index)?.symbol.as_str()),
        }
    }
}

/// Element of `index` with `transmutation` applied when there is one.
pub fn element_of<'a>(
    system: &'a ChemicalSystem,
    transmutation: Option<&'a Transmutation>,
    index: usize,
) -> Result<&'a str, ModelError> {
    match transmutation {
        Some(t) => t.symbol(system, index),
        None => Ok(system.atom(index)?.symbol.as_str()),
    }
}

#[derive(Debug)]
struct TransmutationConfigurator;

pub fn atom_transmutation(_: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(TransmutationConfigurator))
}

impl Configurator for TransmutationConfigurator {
    fn default_value(&self) -> Value {
        Value::List(Vec::new())
    }

    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let input: &InputTrajectory = ctx.dependency("trajectory")?;
        let selection: &AtomSelection = ctx.dependency("selection")?;

        let rules: Vec<(String, String)> = match value {
            Value::Null => Vec::new(),
            Value::Table(table) => table
                .iter()
                .map(|(expression, element)| {
                    element
                        .as_str()
                        .map(|e| (expression.clone(), e.to_string()))
                        .ok_or_else(|| ctx.wrong_type("an element symbol", element))
                })
                .collect::<Result<_, _>>()?,
            Value::List(items) => items
                .iter()
                .map(|item| match item.as_list() {
                    Some([Value::Str(expression), Value::Str(element)]) => {
                        Ok((expression.clone(), element.clone()))
                    }
                    _ => Err(ctx.wrong_type("an [expression, element] pair", item)),
                })
                .collect::<Result<_, _>>()?,
            other => return Err(ctx.wrong_type("a list of [expression, element] pairs", other)),
        };

        let selected: BTreeSet<usize> = selection.indices.iter().copied().collect();
        let mut symbols = BTreeMap::new();
        for (expression, element) in rules {
            if !ctx.engine.atoms().has_atom(&element) {
                return Err(ctx.invalid(format!("unknown element '{element}'")));
            }
            for index in select(ctx, &input.system, EXPRESSION, &expression)? {
                if selected.contains(&index) {
                    symbols.insert(index, element.clone());
                }
            }
        }
        Ok(Configured::Transmutation(Transmutation { symbols }))
    }
}

/// The selection pooled at one level, with a species label per group.
#[derive(Debug, Clone, PartialEq)]
pub struct Grouping {
    pub level: GroupingLevel,
    pub groups: Vec<AtomGroup>,
    /// Element for single-atom groups, Hill formula otherwise.
    pub species: Vec<String>,
}

impl Grouping {
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Distinct species, sorted.
    pub fn species_names(&self) -> Vec<&str> {
        let names: BTreeSet<&str> = self.species.iter().map(String::as_str).collect();
        names.into_iter().collect()
    }

    /// Indices of the groups of `species`.
    pub fn members(&self, species: &str) -> Vec<usize> {
        self.species
            .iter()
            .enumerate()
            .filter(|(_, s)| *s == species)
            .map(|(i, _)| i)
            .collect()
    }
}

#[derive(Debug)]
struct GroupingConfigurator;

pub fn grouping_level(_: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(GroupingConfigurator))
}

impl Configurator for GroupingConfigurator {
    fn default_value(&self) -> Value {
        Value::from("atom")
    }

    fn choices(&self) -> Option<Vec<String>> {
        Some(["atom", "molecule", "residue", "chain"].map(String::from).to_vec())
    }

    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let input: &InputTrajectory = ctx.dependency("trajectory")?;
        let selection: &AtomSelection = ctx.dependency("selection")?;
        let transmutation: Option<&Transmutation> = ctx.optional_dependency("transmutation")?;

        let level = match value {
            Value::Null => GroupingLevel::Atom,
            Value::Str(s) => s.parse::<GroupingLevel>().map_err(|_| ConfigError::UnknownChoice {
                name: ctx.name(),
                value: s.clone(),
                choices: self.choices().unwrap_or_default(),
            })?,
            other => return Err(ctx.wrong_type("a grouping level", other)),
        };
        let system = &input.system;
        let groups = system
            .group_atoms(level, &selection.indices)
            .map_err(|e| ctx.invalid(e))?;
        let species = groups
            .iter()
            .map(|group| match group.atoms.as_slice() {
                [single] => element_of(system, transmutation, *single).map(str::to_string),
                atoms => Ok(system.formula(atoms)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ctx.invalid(e))?;
        Ok(Configured::Grouping(Grouping {
            level,
            groups,
            species,
        }))
    }
}

/// Per-group weights and the normalized share of each species.
#[derive(Debug, Clone, PartialEq)]
pub struct Weights {
    pub property: String,
    pub group_weights: Vec<f64>,
    /// `Σ w(species groups) / Σ w(all groups)`; sums to one.
    pub factors: BTreeMap<String, f64>,
}

impl Weights {
    pub fn factor(&self, species: &str) -> f64 {
        self.factors.get(species).copied().unwrap_or(0.0)
    }

    /// `Σ_s factor(s) · values(s)` over the species present in `values`.
    pub fn weighted_sum<'a>(&self, values: impl IntoIterator<Item = (&'a str, f64)>) -> f64 {
        values
            .into_iter()
            .map(|(species, value)| self.factor(species) * value)
            .sum()
    }
}

#[derive(Debug)]
struct WeightsConfigurator;

pub fn weights(_: &Setting) -> Result<Box<dyn Configurator>, ConfigError> {
    Ok(Box::new(WeightsConfigurator))
}

impl Configurator for WeightsConfigurator {
    fn default_value(&self) -> Value {
        Value::from(EQUAL)
    }

    fn configure(&self, value: &Value, ctx: &Context<'_>) -> Result<Configured, ConfigError> {
        let input: &InputTrajectory = ctx.dependency("trajectory")?;
        let grouping: &Grouping = ctx.dependency("grouping")?;
        let transmutation: Option<&Transmutation> = ctx.optional_dependency("transmutation")?;
        let database = ctx.engine.atoms();

        let property = match value {
            Value::Null => EQUAL,
            Value::Str(s) => s.as_str(),
            other => return Err(ctx.wrong_type("an atom property name", other)),
        };
        let numeric = |p: &str| {
            matches!(
                database.property_type(p),
                Some(PropertyType::Float | PropertyType::Int)
            )
        };
        if !property.eq_ignore_ascii_case(EQUAL) && !numeric(property) {
            let mut choices: Vec<String> = database
                .properties()
                .iter()
                .filter(|(name, _)| numeric(name))
                .map(|(name, _)| name.clone())
                .collect();
            choices.insert(0, EQUAL.to_string());
            return Err(ConfigError::UnknownChoice {
                name: ctx.name(),
                value: property.to_string(),
                choices,
            });
        }

        let system = &input.system;
        let mut group_weights = Vec::with_capacity(grouping.len());
        for group in &grouping.groups {
            let weight = if property.eq_ignore_ascii_case(EQUAL) {
                1.0
            } else {
                let mut sum = 0.0;
                for &atom in &group.atoms {
                    let symbol =
                        element_of(system, transmutation, atom).map_err(|e| ctx.invalid(e))?;
                    sum += database.numeric(symbol, property).map_err(|e| ctx.invalid(e))?;
                }
                sum
            };
            group_weights.push(weight);
        }

        let total: f64 = group_weights.iter().sum();
        if total == 0.0 {
            return Err(ctx.invalid(format!("'{property}' weights of the selection sum to zero")));
        }
        let mut factors: BTreeMap<String, f64> = BTreeMap::new();
        for (species, weight) in grouping.species.iter().zip(&group_weights) {
            *factors.entry(species.clone()).or_default() += weight / total;
        }
        Ok(Configured::Weights(Weights {
            property: property.to_string(),
            group_weights,
            factors,
        }))
    }
}
