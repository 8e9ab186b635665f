use serde::{Deserialize, Serialize};

/// Field vocabulary understood by the downstream query layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    #[serde(rename = "BooleanDatabaseField")]
    Boolean,
    #[serde(rename = "DateDatabaseField")]
    Date,
    #[serde(rename = "DateTimeDatabaseField")]
    DateTime,
    #[serde(rename = "FloatDatabaseField")]
    Float,
    #[serde(rename = "IntegerDatabaseField")]
    Integer,
    #[serde(rename = "StringArrayDatabaseField")]
    StringArray,
    #[serde(rename = "StringDatabaseField")]
    String,
    #[serde(rename = "StringJSONDatabaseField")]
    StringJson,
}

/// Backend type prefix (text before the first `(`) to field type.
const CLICKHOUSE_FIELD_TYPES: &[(&str, FieldType)] = &[
    ("UUID", FieldType::String),
    ("String", FieldType::String),
    ("DateTime64", FieldType::DateTime),
    ("DateTime32", FieldType::DateTime),
    ("DateTime", FieldType::DateTime),
    ("Date", FieldType::Date),
    ("Date32", FieldType::Date),
    ("UInt8", FieldType::Integer),
    ("UInt16", FieldType::Integer),
    ("UInt32", FieldType::Integer),
    ("UInt64", FieldType::Integer),
    ("Float8", FieldType::Float),
    ("Float16", FieldType::Float),
    ("Float32", FieldType::Float),
    ("Float64", FieldType::Float),
    ("Int8", FieldType::Integer),
    ("Int16", FieldType::Integer),
    ("Int32", FieldType::Integer),
    ("Int64", FieldType::Integer),
    ("Tuple", FieldType::StringJson),
    ("Array", FieldType::StringArray),
    ("Map", FieldType::StringJson),
    ("Bool", FieldType::Boolean),
    ("Decimal", FieldType::Float),
];

impl FieldType {
    pub const ALL: [FieldType; 8] = [
        FieldType::Boolean,
        FieldType::Date,
        FieldType::DateTime,
        FieldType::Float,
        FieldType::Integer,
        FieldType::StringArray,
        FieldType::String,
        FieldType::StringJson,
    ];

    /// Looks up a bare backend type name such as `Int64` or `Array`.
    pub fn from_backend_prefix(prefix: &str) -> Option<FieldType> {
        CLICKHOUSE_FIELD_TYPES
            .iter()
            .find(|(name, _)| *name == prefix)
            .map(|(_, ty)| *ty)
    }

    /// Resolves a full backend type (`Decimal(10, 2)`, `Array(String)`) by its prefix.
    pub fn from_backend_type(backend_type: &str) -> Option<FieldType> {
        let prefix = backend_type
            .split_once('(')
            .map_or(backend_type, |(head, _)| head)
            .trim();
        Self::from_backend_prefix(prefix)
    }

    pub fn from_hogql_name(name: &str) -> Option<FieldType> {
        Self::ALL.into_iter().find(|ty| ty.hogql_name() == name)
    }

    pub fn hogql_name(self) -> &'static str {
        match self {
            FieldType::Boolean => "BooleanDatabaseField",
            FieldType::Date => "DateDatabaseField",
            FieldType::DateTime => "DateTimeDatabaseField",
            FieldType::Float => "FloatDatabaseField",
            FieldType::Integer => "IntegerDatabaseField",
            FieldType::StringArray => "StringArrayDatabaseField",
            FieldType::String => "StringDatabaseField",
            FieldType::StringJson => "StringJSONDatabaseField",
        }
    }

    pub fn serialized(self) -> SerializedFieldType {
        match self {
            FieldType::Boolean => SerializedFieldType::Boolean,
            FieldType::Date => SerializedFieldType::Date,
            FieldType::DateTime => SerializedFieldType::DateTime,
            FieldType::Float => SerializedFieldType::Float,
            FieldType::Integer => SerializedFieldType::Integer,
            FieldType::StringArray => SerializedFieldType::Array,
            FieldType::String => SerializedFieldType::String,
            FieldType::StringJson => SerializedFieldType::Json,
        }
    }

    /// Canonical backend type used when a column is created from a field type.
    pub fn clickhouse_type(self) -> &'static str {
        self.serialized().clickhouse_type()
    }
}

/// Serialized field vocabulary exposed to API consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializedFieldType {
    Integer,
    Float,
    String,
    #[serde(rename = "datetime")]
    DateTime,
    Date,
    Boolean,
    Array,
    Json,
}

impl SerializedFieldType {
    pub fn clickhouse_type(self) -> &'static str {
        match self {
            SerializedFieldType::Integer => "Int64",
            SerializedFieldType::Float => "Float64",
            SerializedFieldType::String => "String",
            SerializedFieldType::DateTime => "DateTime64",
            SerializedFieldType::Date => "Date",
            SerializedFieldType::Boolean => "Bool",
            SerializedFieldType::Array => "Array",
            SerializedFieldType::Json => "Map",
        }
    }
}

/// A resolved field: the key it is exposed under maps to one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Underlying backend column.
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub hidden: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            hidden: false,
        }
    }

    pub fn hidden(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            hidden: true,
        }
    }
}
