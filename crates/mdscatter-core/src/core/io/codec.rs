use super::store::{ArrayData, Compression, StoreError, StoreReader, StoreWriter};
use crate::core::models::builder::EntityBuilder;
use crate::core::models::entity::EntityKind;
use crate::core::models::error::ModelError;
use crate::core::models::ids::EntityId;
use crate::core::models::system::ChemicalSystem;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const CHEMICAL_SYSTEM_GROUP: &str = "chemical_system";
const RECORD_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Unsupported chemical entity tag: '{0}'")]
    UnsupportedEntityTag(String),
    #[error("Unsupported record version {version} in '{dataset}'")]
    UnsupportedVersion { dataset: String, version: u32 },
    #[error("Malformed record {index} in '{dataset}': {source}")]
    Record {
        dataset: String,
        index: usize,
        source: serde_json::Error,
    },
    #[error("Reference to missing {tag} record {index}")]
    DanglingReference { tag: String, index: usize },
    #[error("Malformed chemical system: {0}")]
    Malformed(String),
}

/// One stored entity. Containers refer to their children by `(tag, index)` into the
/// per-kind datasets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EntityRecord {
    v: u32,
    tag: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    symbol: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    ghost: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<(String, usize)>,
}

impl ChemicalSystem {
    /// Writes the chemistry tree, `contents` manifest and bond table under
    /// `chemical_system/`.
    pub fn serialize(&self, store: &mut StoreWriter) -> Result<(), CodecError> {
        let mut records: BTreeMap<EntityKind, Vec<String>> = BTreeMap::new();
        let mut contents = Vec::with_capacity(self.top_level_entities().len() * 2);
        for &root in self.top_level_entities() {
            let (kind, index) = self.encode_entity(root, &mut records)?;
            contents.push(kind.tag().to_string());
            contents.push(index.to_string());
        }

        store.create_group(CHEMICAL_SYSTEM_GROUP)?;
        store.set_attribute(CHEMICAL_SYSTEM_GROUP, "name", self.name());
        store.set_attribute(
            CHEMICAL_SYSTEM_GROUP,
            "number_of_atoms",
            &self.number_of_atoms().to_string(),
        );
        for kind in EntityKind::ALL {
            let values = records.remove(&kind).unwrap_or_default();
            store.write_strings(&format!("{CHEMICAL_SYSTEM_GROUP}/{}", kind.dataset()), &values)?;
        }
        store.write_dataset(
            &format!("{CHEMICAL_SYSTEM_GROUP}/contents"),
            &[contents.len() / 2, 2],
            &ArrayData::Str(contents),
            Compression::None,
        )?;
        let pairs = self.bond_pairs();
        let flat: Vec<i64> = pairs
            .iter()
            .flat_map(|&(a, b)| [a as i64, b as i64])
            .collect();
        store.write_dataset(
            &format!("{CHEMICAL_SYSTEM_GROUP}/bonds"),
            &[pairs.len(), 2],
            &ArrayData::I64(flat),
            Compression::None,
        )?;
        Ok(())
    }

    fn encode_entity(
        &self,
        id: EntityId,
        records: &mut BTreeMap<EntityKind, Vec<String>>,
    ) -> Result<(EntityKind, usize), CodecError> {
        let entity = self
            .entity(id)
            .ok_or_else(|| CodecError::Malformed("dangling entity id".to_string()))?;
        let mut record = EntityRecord {
            v: RECORD_VERSION,
            tag: entity.kind.tag().to_string(),
            name: entity.name.clone(),
            code: entity.code.clone(),
            symbol: None,
            ghost: false,
            children: Vec::with_capacity(entity.children.len()),
        };
        if let Some(index) = entity.atom_index {
            let atom = self.atom(index)?;
            record.symbol = Some(atom.symbol.clone());
            record.ghost = atom.ghost;
        }
        for &child in &entity.children {
            let (kind, index) = self.encode_entity(child, records)?;
            record.children.push((kind.tag().to_string(), index));
        }
        let bucket = records.entry(entity.kind).or_default();
        let index = bucket.len();
        let text = serde_json::to_string(&record).map_err(|e| CodecError::Record {
            dataset: entity.kind.dataset().to_string(),
            index,
            source: e,
        })?;
        bucket.push(text);
        Ok((entity.kind, index))
    }

    /// Rebuilds a system previously written by [`ChemicalSystem::serialize`].
    pub fn load(store: &mut StoreReader) -> Result<ChemicalSystem, CodecError> {
        let name = store
            .attribute(CHEMICAL_SYSTEM_GROUP, "name")
            .unwrap_or_default()
            .to_string();

        let mut records: BTreeMap<EntityKind, Vec<EntityRecord>> = BTreeMap::new();
        for kind in EntityKind::ALL {
            let path = format!("{CHEMICAL_SYSTEM_GROUP}/{}", kind.dataset());
            if !store.has_dataset(&path) {
                continue;
            }
            let parsed = store
                .read_strings(&path)?
                .iter()
                .enumerate()
                .map(|(index, text)| parse_record(text, kind, index))
                .collect::<Result<Vec<_>, _>>()?;
            records.insert(kind, parsed);
        }

        let contents = store.read_strings(&format!("{CHEMICAL_SYSTEM_GROUP}/contents"))?;
        if contents.len() % 2 != 0 {
            return Err(CodecError::Malformed(
                "contents manifest has an odd number of fields".to_string(),
            ));
        }
        let mut system = ChemicalSystem::new(&name);
        for pair in contents.chunks_exact(2) {
            let kind = EntityKind::from_tag(&pair[0])
                .ok_or_else(|| CodecError::UnsupportedEntityTag(pair[0].clone()))?;
            let index: usize = pair[1].parse().map_err(|_| {
                CodecError::Malformed(format!("invalid contents index '{}'", pair[1]))
            })?;
            let builder = build_entity(&records, kind, index)?;
            system.add_chemical_entity(builder)?;
        }

        let bonds_path = format!("{CHEMICAL_SYSTEM_GROUP}/bonds");
        if store.has_dataset(&bonds_path) {
            if let ArrayData::I64(flat) = store.read_all(&bonds_path)? {
                for pair in flat.chunks_exact(2) {
                    system.add_bond(pair[0] as usize, pair[1] as usize)?;
                }
            }
        }
        Ok(system)
    }
}

fn parse_record(text: &str, kind: EntityKind, index: usize) -> Result<EntityRecord, CodecError> {
    let record: EntityRecord = serde_json::from_str(text).map_err(|e| CodecError::Record {
        dataset: kind.dataset().to_string(),
        index,
        source: e,
    })?;
    if record.v != RECORD_VERSION {
        return Err(CodecError::UnsupportedVersion {
            dataset: kind.dataset().to_string(),
            version: record.v,
        });
    }
    if EntityKind::from_tag(&record.tag) != Some(kind) {
        return Err(CodecError::UnsupportedEntityTag(record.tag));
    }
    Ok(record)
}

fn build_entity(
    records: &BTreeMap<EntityKind, Vec<EntityRecord>>,
    kind: EntityKind,
    index: usize,
) -> Result<EntityBuilder, CodecError> {
    let record = records
        .get(&kind)
        .and_then(|r| r.get(index))
        .ok_or_else(|| CodecError::DanglingReference {
            tag: kind.tag().to_string(),
            index,
        })?;
    let mut builder = EntityBuilder::of_kind(kind, &record.name);
    if let Some(code) = &record.code {
        builder = builder.with_code(code);
    }
    if let Some(symbol) = &record.symbol {
        builder = builder.with_symbol(symbol);
    }
    if record.ghost {
        builder = builder.ghost();
    }
    for (tag, child_index) in &record.children {
        let child_kind =
            EntityKind::from_tag(tag).ok_or_else(|| CodecError::UnsupportedEntityTag(tag.clone()))?;
        // Kinds strictly descend, which bounds the recursion depth.
        if !kind.allowed_children().contains(&child_kind) {
            return Err(ModelError::InvalidNesting {
                parent: kind,
                child: child_kind,
            }
            .into());
        }
        builder.add_child(build_entity(records, child_kind, *child_index)?);
    }
    Ok(builder)
}
