use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::schema::column::{ColumnSchema, FieldSchema, RawColumnType};
use crate::schema::field_type::FieldType;
use crate::schema::normalize::{clean_backend_type, normalize_columns, strip_nullable, SchemaError};
use crate::schema::overrides::{strip_table_prefix, ExternalTableOverrides};

#[derive(Debug, Error)]
pub enum TableError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("table '{0}' has no credential attached")]
    MissingCredential(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableFormat {
    #[serde(rename = "CSV")]
    Csv,
    Parquet,
    #[serde(rename = "JSONEachRow")]
    JsonEachRow,
}

impl TableFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            TableFormat::Csv => "CSV",
            TableFormat::Parquet => "Parquet",
            TableFormat::JsonEachRow => "JSONEachRow",
        }
    }
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CSV" => Ok(TableFormat::Csv),
            "Parquet" => Ok(TableFormat::Parquet),
            "JSONEachRow" => Ok(TableFormat::JsonEachRow),
            other => Err(format!("unsupported table format '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub access_key: String,
    #[serde(skip_serializing, default)]
    pub access_secret: String,
}

/// The sync source a table came from; its prefix is prepended to table names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalDataSource {
    pub id: Uuid,
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseTable {
    pub id: Uuid,
    pub team_id: i64,
    pub name: String,
    pub format: TableFormat,
    /// Object-store URI, possibly with glob characters.
    pub url_pattern: String,
    pub credential: Option<Credential>,
    pub external_data_source: Option<ExternalDataSource>,
    #[serde(default)]
    pub columns: ColumnSchema,
    pub row_count: Option<i64>,
    #[serde(default)]
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub created_by_id: Option<i64>,
}

/// Everything the query layer needs to read a table through the virtual
/// object-store table function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct S3TableDefinition {
    pub name: String,
    pub url: String,
    pub format: TableFormat,
    pub access_key: String,
    #[serde(skip_serializing)]
    pub access_secret: String,
    pub fields: FieldSchema,
    pub structure: String,
}

impl WarehouseTable {
    pub fn new(
        team_id: i64,
        name: impl Into<String>,
        format: TableFormat,
        url_pattern: impl Into<String>,
        credential: Option<Credential>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            team_id,
            name: name.into(),
            format,
            url_pattern: url_pattern.into(),
            credential,
            external_data_source: None,
            columns: ColumnSchema::new(),
            row_count: None,
            deleted: false,
            deleted_at: None,
            created_at: Utc::now(),
            created_by_id: None,
        }
    }

    pub fn prefix(&self) -> &str {
        self.external_data_source
            .as_ref()
            .and_then(|source| source.prefix.as_deref())
            .unwrap_or("")
    }

    pub fn table_name_without_prefix(&self) -> &str {
        strip_table_prefix(&self.name, self.prefix())
    }

    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    pub fn soft_delete(&mut self, now: DateTime<Utc>) {
        self.deleted = true;
        self.deleted_at = Some(now);
    }

    pub fn credential(&self) -> Result<&Credential, TableError> {
        self.credential
            .as_ref()
            .ok_or_else(|| TableError::MissingCredential(self.name.clone()))
    }

    /// Resolved fields for this table, with canonical definitions applied.
    pub fn fields(&self, overrides: &ExternalTableOverrides) -> Result<FieldSchema, SchemaError> {
        let normalized = normalize_columns(&self.columns)?;
        Ok(overrides.apply(&self.name, self.prefix(), normalized.fields))
    }

    pub fn hogql_definition(&self, overrides: &ExternalTableOverrides) -> Result<S3TableDefinition, TableError> {
        let credential = self.credential()?;
        let normalized = normalize_columns(&self.columns)?;
        let fields = overrides.apply(&self.name, self.prefix(), normalized.fields);

        Ok(S3TableDefinition {
            name: self.name.clone(),
            url: self.url_pattern.clone(),
            format: self.format,
            access_key: credential.access_key.clone(),
            access_secret: credential.access_secret.clone(),
            fields,
            structure: normalized.structure,
        })
    }

    /// Stored backend type of a column. Structured entries come back without
    /// their nullable wrapper; legacy strings are returned as stored.
    pub fn clickhouse_column_type(&self, column: &str) -> Option<String> {
        match self.columns.get(column)? {
            RawColumnType::Legacy(ty) => Some(ty.clone()),
            RawColumnType::Structured { clickhouse, .. } => Some(strip_nullable(clickhouse).to_string()),
        }
    }

    /// Replaces the column schema with freshly described backend types,
    /// stored in the structured encoding.
    pub fn set_discovered_columns(&mut self, described: &IndexMap<String, String>) -> Result<(), SchemaError> {
        let mut columns = ColumnSchema::with_capacity(described.len());
        for (name, backend_type) in described {
            let cleaned = clean_backend_type(name, backend_type)?;
            let field_type = FieldType::from_backend_type(&cleaned).ok_or_else(|| {
                SchemaError::UnknownBackendType {
                    column: name.clone(),
                    backend_type: cleaned.clone(),
                }
            })?;
            columns.insert(name.clone(), RawColumnType::structured(backend_type.clone(), field_type));
        }
        self.columns = columns;
        Ok(())
    }
}

/// Active table synced from `source_id` at `url_pattern`.
pub fn find_by_url_pattern_and_source<'a>(
    tables: &'a [WarehouseTable],
    team_id: i64,
    source_id: Uuid,
    url_pattern: &str,
) -> Option<&'a WarehouseTable> {
    tables.iter().find(|t| {
        t.is_active()
            && t.team_id == team_id
            && t.url_pattern == url_pattern
            && t.external_data_source.as_ref().is_some_and(|s| s.id == source_id)
    })
}
