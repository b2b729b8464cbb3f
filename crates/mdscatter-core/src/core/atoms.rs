use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

const BUILTIN_DATABASE: &str = include_str!("../../data/atoms.json");

/// The declared type of an element property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Float,
    Int,
    Str,
    List,
}

impl PropertyType {
    /// Value every element receives when the property is first declared.
    pub fn default_value(self) -> PropertyValue {
        match self {
            PropertyType::Float => PropertyValue::Float(0.0),
            PropertyType::Int => PropertyValue::Int(0),
            PropertyType::Str => PropertyValue::Str(String::new()),
            PropertyType::List => PropertyValue::List(Vec::new()),
        }
    }
}

impl FromStr for PropertyType {
    type Err = AtomsDatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "float" | "f64" => Ok(Self::Float),
            "int" | "integer" => Ok(Self::Int),
            "str" | "string" => Ok(Self::Str),
            "list" => Ok(Self::List),
            other => Err(AtomsDatabaseError::UnknownPropertyType(other.to_string())),
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Float => "float",
            Self::Int => "int",
            Self::Str => "str",
            Self::List => "list",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<f64>),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            Self::Int(_) => PropertyType::Int,
            Self::Float(_) => PropertyType::Float,
            Self::Str(_) => PropertyType::Str,
            Self::List(_) => PropertyType::List,
        }
    }

    /// Numeric view of the value; integers are widened, strings and lists yield `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    fn coerce(self, expected: PropertyType) -> Option<Self> {
        match (self, expected) {
            (Self::Int(v), PropertyType::Float) => Some(Self::Float(v as f64)),
            (v, t) if v.property_type() == t => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
            Self::List(v) => write!(f, "{v:?}"),
        }
    }
}

pub type AtomRecord = BTreeMap<String, PropertyValue>;

#[derive(Debug, Error)]
pub enum AtomsDatabaseError {
    #[error("Unknown atom: '{0}'")]
    UnknownAtom(String),
    #[error("Unknown property: '{0}'")]
    UnknownProperty(String),
    #[error("Atom '{0}' is already registered")]
    DuplicateAtom(String),
    #[error("Property '{0}' is already registered")]
    DuplicateProperty(String),
    #[error("Unknown property type: '{0}'")]
    UnknownPropertyType(String),
    #[error("Property '{property}' expects a value of type {expected}, got {found}")]
    TypeMismatch {
        property: String,
        expected: PropertyType,
        found: PropertyType,
    },
    #[error("Property '{property}' of atom '{symbol}' is not numeric")]
    NotNumeric { symbol: String, property: String },
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("JSON error for '{path}': {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct DatabaseFile {
    properties: Vec<(String, PropertyType)>,
    atoms: BTreeMap<String, AtomRecord>,
}

/// Element symbol to physical-property table.
///
/// Every element carries the same property set. Declaring a new property back-fills it on
/// all registered elements with the type default, so readers never miss a key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtomsDatabase {
    properties: Vec<(String, PropertyType)>,
    atoms: BTreeMap<String, AtomRecord>,
}

impl AtomsDatabase {
    /// Creates an empty database with no elements and no properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the table shipped with the library.
    pub fn builtin() -> Result<Self, AtomsDatabaseError> {
        Self::from_json(BUILTIN_DATABASE, "<builtin>")
    }

    pub fn from_json(content: &str, origin: &str) -> Result<Self, AtomsDatabaseError> {
        let file: DatabaseFile =
            serde_json::from_str(content).map_err(|e| AtomsDatabaseError::Json {
                path: origin.to_string(),
                source: e,
            })?;
        let mut db = Self {
            properties: file.properties,
            atoms: BTreeMap::new(),
        };
        for (symbol, record) in file.atoms {
            let mut normalized = AtomRecord::new();
            for (name, ty) in &db.properties {
                let value = match record.get(name) {
                    Some(v) => v.clone().coerce(*ty).ok_or_else(|| {
                        AtomsDatabaseError::TypeMismatch {
                            property: name.clone(),
                            expected: *ty,
                            found: v.property_type(),
                        }
                    })?,
                    None => ty.default_value(),
                };
                normalized.insert(name.clone(), value);
            }
            db.atoms.insert(symbol, normalized);
        }
        debug!(
            origin,
            atoms = db.atoms.len(),
            properties = db.properties.len(),
            "Loaded atoms database."
        );
        Ok(db)
    }

    pub fn load(path: &Path) -> Result<Self, AtomsDatabaseError> {
        let content = std::fs::read_to_string(path).map_err(|e| AtomsDatabaseError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })?;
        Self::from_json(&content, &path.to_string_lossy())
    }

    pub fn to_json(&self) -> String {
        let file = DatabaseFile {
            properties: self.properties.clone(),
            atoms: self.atoms.clone(),
        };
        serde_json::to_string_pretty(&file).unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<(), AtomsDatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AtomsDatabaseError::Io {
                path: parent.to_string_lossy().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, self.to_json()).map_err(|e| AtomsDatabaseError::Io {
            path: path.to_string_lossy().to_string(),
            source: e,
        })
    }

    pub fn has_atom(&self, symbol: &str) -> bool {
        self.atoms.contains_key(symbol)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.iter().any(|(p, _)| p == name)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.atoms.keys().map(String::as_str)
    }

    pub fn properties(&self) -> &[(String, PropertyType)] {
        &self.properties
    }

    pub fn property_type(&self, name: &str) -> Option<PropertyType> {
        self.properties
            .iter()
            .find(|(p, _)| p == name)
            .map(|(_, t)| *t)
    }

    pub fn get(&self, symbol: &str) -> Result<&AtomRecord, AtomsDatabaseError> {
        self.atoms
            .get(symbol)
            .ok_or_else(|| AtomsDatabaseError::UnknownAtom(symbol.to_string()))
    }

    /// Returns the value of `property` for every element.
    pub fn get_property(
        &self,
        property: &str,
    ) -> Result<BTreeMap<&str, &PropertyValue>, AtomsDatabaseError> {
        if !self.has_property(property) {
            return Err(AtomsDatabaseError::UnknownProperty(property.to_string()));
        }
        Ok(self
            .atoms
            .iter()
            .filter_map(|(symbol, record)| record.get(property).map(|v| (symbol.as_str(), v)))
            .collect())
    }

    pub fn get_value(
        &self,
        symbol: &str,
        property: &str,
    ) -> Result<&PropertyValue, AtomsDatabaseError> {
        let record = self.get(symbol)?;
        record
            .get(property)
            .ok_or_else(|| AtomsDatabaseError::UnknownProperty(property.to_string()))
    }

    /// Numeric property lookup used by weighting and geometry code.
    pub fn numeric(&self, symbol: &str, property: &str) -> Result<f64, AtomsDatabaseError> {
        self.get_value(symbol, property)?
            .as_f64()
            .ok_or_else(|| AtomsDatabaseError::NotNumeric {
                symbol: symbol.to_string(),
                property: property.to_string(),
            })
    }

    pub fn add_atom(&mut self, symbol: &str) -> Result<(), AtomsDatabaseError> {
        if self.has_atom(symbol) {
            return Err(AtomsDatabaseError::DuplicateAtom(symbol.to_string()));
        }
        let record = self
            .properties
            .iter()
            .map(|(name, ty)| (name.clone(), ty.default_value()))
            .collect();
        self.atoms.insert(symbol.to_string(), record);
        Ok(())
    }

    pub fn add_property(
        &mut self,
        name: &str,
        property_type: PropertyType,
    ) -> Result<(), AtomsDatabaseError> {
        if self.has_property(name) {
            return Err(AtomsDatabaseError::DuplicateProperty(name.to_string()));
        }
        self.properties.push((name.to_string(), property_type));
        for record in self.atoms.values_mut() {
            record.insert(name.to_string(), property_type.default_value());
        }
        Ok(())
    }

    pub fn set_value(
        &mut self,
        symbol: &str,
        property: &str,
        value: PropertyValue,
    ) -> Result<(), AtomsDatabaseError> {
        let expected = self
            .property_type(property)
            .ok_or_else(|| AtomsDatabaseError::UnknownProperty(property.to_string()))?;
        let found = value.property_type();
        let value = value
            .coerce(expected)
            .ok_or_else(|| AtomsDatabaseError::TypeMismatch {
                property: property.to_string(),
                expected,
                found,
            })?;
        let record = self
            .atoms
            .get_mut(symbol)
            .ok_or_else(|| AtomsDatabaseError::UnknownAtom(symbol.to_string()))?;
        record.insert(property.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn builtin_database_has_uniform_schema() {
        let db = AtomsDatabase::builtin().unwrap();
        assert!(db.has_atom("H"));
        assert!(db.has_atom("O"));
        for symbol in db.symbols() {
            let record = db.get(symbol).unwrap();
            assert_eq!(record.len(), db.properties().len(), "atom {symbol}");
        }
    }

    #[test]
    fn get_unknown_atom_fails() {
        let db = AtomsDatabase::builtin().unwrap();
        assert!(matches!(
            db.get("Xx"),
            Err(AtomsDatabaseError::UnknownAtom(s)) if s == "Xx"
        ));
    }

    #[test]
    fn get_property_returns_value_for_every_atom() {
        let db = AtomsDatabase::builtin().unwrap();
        let masses = db.get_property("mass").unwrap();
        assert_eq!(masses.len(), db.symbols().count());
        assert!((masses["O"].as_f64().unwrap() - 15.9994).abs() < 1e-9);
        assert!(matches!(
            db.get_property("nope"),
            Err(AtomsDatabaseError::UnknownProperty(_))
        ));
    }

    #[test]
    fn add_atom_initializes_all_properties_to_defaults() {
        let mut db = AtomsDatabase::builtin().unwrap();
        db.add_atom("Xx").unwrap();
        let record = db.get("Xx").unwrap();
        assert_eq!(record["mass"], PropertyValue::Float(0.0));
        assert_eq!(record["atomic_number"], PropertyValue::Int(0));
        assert_eq!(record["color"], PropertyValue::Str(String::new()));
        assert!(matches!(
            db.add_atom("Xx"),
            Err(AtomsDatabaseError::DuplicateAtom(_))
        ));
    }

    #[test]
    fn add_property_backfills_existing_atoms() {
        let mut db = AtomsDatabase::builtin().unwrap();
        db.add_property("spin", PropertyType::Float).unwrap();
        for symbol in db.symbols() {
            assert_eq!(
                db.get_value(symbol, "spin").unwrap(),
                &PropertyValue::Float(0.0)
            );
        }
        assert!(matches!(
            db.add_property("spin", PropertyType::Int),
            Err(AtomsDatabaseError::DuplicateProperty(_))
        ));
    }

    #[test]
    fn set_value_checks_types_and_widens_integers() {
        let mut db = AtomsDatabase::builtin().unwrap();
        db.set_value("H", "mass", PropertyValue::Int(1)).unwrap();
        assert_eq!(db.numeric("H", "mass").unwrap(), 1.0);
        let err = db
            .set_value("H", "mass", PropertyValue::Str("heavy".into()))
            .unwrap_err();
        assert!(matches!(err, AtomsDatabaseError::TypeMismatch { .. }));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("atoms.json");
        let mut db = AtomsDatabase::builtin().unwrap();
        db.add_atom("Xx").unwrap();
        db.set_value("Xx", "mass", PropertyValue::Float(42.0)).unwrap();
        db.save(&path).unwrap();

        let loaded = AtomsDatabase::load(&path).unwrap();
        assert_eq!(loaded, db);
    }

    #[test]
    fn property_type_parses_aliases() {
        assert_eq!("FLOAT".parse::<PropertyType>().unwrap(), PropertyType::Float);
        assert_eq!("integer".parse::<PropertyType>().unwrap(), PropertyType::Int);
        assert!("complex".parse::<PropertyType>().is_err());
    }
}
