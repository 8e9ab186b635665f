use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::schema::field_type::{FieldDef, FieldType};

/// Persisted type of one discovered column.
///
/// Older tables store the bare backend type string; newer ones store both the
/// backend type and the field type it was resolved to at discovery time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawColumnType {
    Legacy(String),
    Structured { clickhouse: String, hogql: FieldType },
}

impl RawColumnType {
    pub fn structured(clickhouse: impl Into<String>, hogql: FieldType) -> Self {
        RawColumnType::Structured {
            clickhouse: clickhouse.into(),
            hogql,
        }
    }

    pub fn backend_type(&self) -> &str {
        match self {
            RawColumnType::Legacy(ty) => ty,
            RawColumnType::Structured { clickhouse, .. } => clickhouse,
        }
    }
}

/// Column name to persisted type, in discovery order.
pub type ColumnSchema = IndexMap<String, RawColumnType>;

/// Exposed field name to resolved field, in discovery order.
pub type FieldSchema = IndexMap<String, FieldDef>;
