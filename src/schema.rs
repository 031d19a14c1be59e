//! Append-only schema codec for schema-typed stores.
//!
//! A schema maps field names to small numeric indices so records can be
//! stored compactly: `{"temperature":72.5}` becomes `{"1":72.5}`.  Schema
//! versions only ever add fields; every `(index, name, type)` triple of a
//! published version is frozen.  That makes reads forward-compatible: a
//! record written under version N expands correctly under any version >= N,
//! and unknown indices are dropped rather than rejected.
//!
//! The set is persisted as `schema.json` in the store directory:
//!
//! ```text
//! {
//!   "current_version": 2,
//!   "schemas": {
//!     "1": { "version": 1, "fields": [ {"index":1,"name":"t","type":"float32"} ] },
//!     "2": { ... }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use log::debug;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

// ── Field types ──────────────────────────────────────────────────────────────

/// Closed set of storable field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    Bool,
    String,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Int8 => "int8",
            FieldType::Int16 => "int16",
            FieldType::Int32 => "int32",
            FieldType::Int64 => "int64",
            FieldType::Uint8 => "uint8",
            FieldType::Uint16 => "uint16",
            FieldType::Uint32 => "uint32",
            FieldType::Uint64 => "uint64",
            FieldType::Float32 => "float32",
            FieldType::Float64 => "float64",
            FieldType::Bool => "bool",
            FieldType::String => "string",
        }
    }

    /// Does a JSON value fit this type?
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::Int8 => in_i64_range(value, i8::MIN as i64, i8::MAX as i64),
            FieldType::Int16 => in_i64_range(value, i16::MIN as i64, i16::MAX as i64),
            FieldType::Int32 => in_i64_range(value, i32::MIN as i64, i32::MAX as i64),
            FieldType::Int64 => value.as_i64().is_some(),
            FieldType::Uint8 => in_u64_range(value, u8::MAX as u64),
            FieldType::Uint16 => in_u64_range(value, u16::MAX as u64),
            FieldType::Uint32 => in_u64_range(value, u32::MAX as u64),
            FieldType::Uint64 => value.as_u64().is_some(),
            FieldType::Float32 | FieldType::Float64 => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::String => value.is_string(),
        }
    }
}

fn in_i64_range(value: &Value, min: i64, max: i64) -> bool {
    value.as_i64().is_some_and(|v| v >= min && v <= max)
}

fn in_u64_range(value: &Value, max: u64) -> bool {
    value.as_u64().is_some_and(|v| v <= max)
}

// ── Schema ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub index: u32,
    pub name:  String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl SchemaField {
    pub fn new(index: u32, name: &str, field_type: FieldType) -> Self {
        Self { index, name: name.to_owned(), field_type }
    }
}

/// One published schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub version: u32,
    pub fields:  Vec<SchemaField>,
}

impl Schema {
    pub fn new(version: u32, fields: Vec<SchemaField>) -> Self {
        Self { version, fields }
    }

    fn field_by_name(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }

    fn field_by_index(&self, index: u32) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.index == index)
    }

    /// Structural checks that hold for every version: a non-empty field list
    /// with unique positive indices and unique non-empty names.
    fn check_fields(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(StoreError::InvalidSchema("schema has no fields".into()));
        }
        let mut indices = HashSet::new();
        let mut names = HashSet::new();
        for field in &self.fields {
            if field.index == 0 {
                return Err(StoreError::InvalidSchema(format!(
                    "field {:?} has index 0, indices start at 1",
                    field.name
                )));
            }
            if field.name.is_empty() {
                return Err(StoreError::InvalidSchema(format!(
                    "field index {} has an empty name",
                    field.index
                )));
            }
            if !indices.insert(field.index) {
                return Err(StoreError::InvalidSchema(format!(
                    "duplicate field index {}",
                    field.index
                )));
            }
            if !names.insert(field.name.as_str()) {
                return Err(StoreError::InvalidSchema(format!(
                    "duplicate field name {:?}",
                    field.name
                )));
            }
        }
        Ok(())
    }
}

// ── SchemaSet ────────────────────────────────────────────────────────────────

/// The append-only history of schema versions for one store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSet {
    pub current_version: u32,
    pub schemas: BTreeMap<u32, Schema>,
}

impl SchemaSet {
    // ── Persistence ──────────────────────────────────────────────────────────

    /// Load `schema.json`, or `None` if it has not been written yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let set: SchemaSet = serde_json::from_slice(&bytes)?;
        if set.current_version != 0 && !set.schemas.contains_key(&set.current_version) {
            return Err(StoreError::InvalidSchema(format!(
                "schema.json current_version {} has no schema body",
                set.current_version
            )));
        }
        Ok(Some(set))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path, bytes)?;
        debug!("persisted schema set v{} to {}", self.current_version, path.display());
        Ok(())
    }

    // ── Versioning ───────────────────────────────────────────────────────────

    fn current(&self) -> Result<&Schema> {
        self.schemas
            .get(&self.current_version)
            .ok_or(StoreError::SchemaRequired)
    }

    fn at_version(&self, version: u32) -> Result<&Schema> {
        if version == 0 {
            return self.current();
        }
        self.schemas.get(&version).ok_or_else(|| {
            StoreError::InvalidSchema(format!("unknown schema version {version}"))
        })
    }

    /// Append the next schema version.
    ///
    /// Version numbers are sequential.  Versions past the first must carry
    /// every previously published `(index, name, type)` triple unchanged;
    /// they may only add fields.
    pub fn append(&mut self, schema: Schema) -> Result<()> {
        if schema.version != self.current_version + 1 {
            return Err(StoreError::InvalidSchema(format!(
                "version {} does not follow current version {}",
                schema.version, self.current_version
            )));
        }
        schema.check_fields()?;

        if let Some(previous) = self.schemas.get(&self.current_version) {
            for old in &previous.fields {
                match schema.field_by_index(old.index) {
                    Some(new) if new.name == old.name && new.field_type == old.field_type => {}
                    Some(new) => {
                        return Err(StoreError::InvalidSchema(format!(
                            "field index {} changed from {:?} {} to {:?} {}",
                            old.index,
                            old.name,
                            old.field_type.name(),
                            new.name,
                            new.field_type.name(),
                        )));
                    }
                    None => {
                        return Err(StoreError::InvalidSchema(format!(
                            "field index {} ({:?}) dropped, versions are append-only",
                            old.index, old.name
                        )));
                    }
                }
            }
        }

        self.current_version = schema.version;
        self.schemas.insert(schema.version, schema);
        Ok(())
    }

    // ── Record translation ───────────────────────────────────────────────────

    /// Rewrite a full-format record (name keys) to compact form (decimal
    /// index keys) under the current schema.
    pub fn full_to_compact(&self, record: &[u8]) -> Result<Vec<u8>> {
        let schema = self.current()?;
        let fields = parse_object(record)?;
        let mut out = Map::new();
        for (name, value) in fields {
            let field = schema
                .field_by_name(&name)
                .ok_or_else(|| StoreError::FieldNotInSchema(name.clone()))?;
            out.insert(field.index.to_string(), value);
        }
        Ok(serde_json::to_vec(&Value::Object(out))?)
    }

    /// Rewrite a compact record back to full form with the schema at
    /// `version` (0 = current).  Indices unknown to that version are dropped
    /// silently, so old readers survive newer records.
    pub fn compact_to_full(&self, record: &[u8], version: u32) -> Result<Vec<u8>> {
        let schema = self.at_version(version)?;
        let fields = parse_object(record)?;
        let mut out = Map::new();
        for (key, value) in fields {
            let index: u32 = key
                .parse()
                .map_err(|_| StoreError::InvalidCompactKey(key.clone()))?;
            if let Some(field) = schema.field_by_index(index) {
                out.insert(field.name.clone(), value);
            }
        }
        Ok(serde_json::to_vec(&Value::Object(out))?)
    }

    /// Check a record in either format against the current schema.  The
    /// format is detected from the first key: numeric keys mean compact.
    pub fn validate(&self, record: &[u8]) -> Result<()> {
        let schema = self.current()?;
        let fields = parse_object(record)?;
        let compact = fields
            .keys()
            .next()
            .is_some_and(|k| k.chars().all(|c| c.is_ascii_digit()));

        for (key, value) in &fields {
            let field = if compact {
                let index: u32 = key
                    .parse()
                    .map_err(|_| StoreError::InvalidCompactKey(key.clone()))?;
                schema
                    .field_by_index(index)
                    .ok_or_else(|| StoreError::FieldNotInSchema(key.clone()))?
            } else {
                schema
                    .field_by_name(key)
                    .ok_or_else(|| StoreError::FieldNotInSchema(key.clone()))?
            };
            if !field.field_type.matches(value) {
                return Err(StoreError::InvalidFieldType {
                    field:    field.name.clone(),
                    expected: field.field_type.name(),
                });
            }
        }
        Ok(())
    }
}

fn parse_object(record: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice(record)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::InvalidJSON(serde_json::Error::custom(
            "record is not a JSON object",
        ))),
    }
}
