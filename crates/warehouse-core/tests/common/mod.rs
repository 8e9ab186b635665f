#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

use warehouse_core::cohort::memory::MemoryCohortStore;
use warehouse_core::cohort::model::Person;
use warehouse_core::schema::column::{ColumnSchema, RawColumnType};
use warehouse_core::warehouse::discovery::{AnalyticsClient, ErrorReporter, QueryError, QueryParams, Rows};
use warehouse_core::warehouse::table::{Credential, ExternalDataSource, TableFormat, WarehouseTable};

pub fn fixture_path(name: &str) -> String {
    format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name)
}

pub fn load_json_fixture(name: &str) -> Value {
    let s = std::fs::read_to_string(fixture_path(name)).expect("fixture read");
    serde_json::from_str(&s).expect("fixture parse")
}

pub fn legacy_columns(columns: &[(&str, &str)]) -> ColumnSchema {
    columns
        .iter()
        .map(|(name, ty)| (name.to_string(), RawColumnType::Legacy(ty.to_string())))
        .collect()
}

pub fn s3_table(name: &str, format: TableFormat) -> WarehouseTable {
    let credential = Credential {
        id: Uuid::new_v4(),
        access_key: "AKIAEXAMPLE".to_string(),
        access_secret: "s3cr3t".to_string(),
    };
    WarehouseTable::new(
        1,
        name,
        format,
        "https://bucket.s3.amazonaws.com/exports/*.parquet",
        Some(credential),
    )
}

pub fn with_source_prefix(mut table: WarehouseTable, prefix: &str) -> WarehouseTable {
    table.external_data_source = Some(ExternalDataSource {
        id: Uuid::new_v4(),
        prefix: Some(prefix.to_string()),
    });
    table
}

/// Analytics client answering queries from a fixed script, in order.
#[derive(Default)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<Result<Rows, QueryError>>>,
    calls: Mutex<Vec<(String, QueryParams)>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<Result<Rows, QueryError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, QueryParams)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalyticsClient for ScriptedClient {
    async fn query(&self, sql: &str, params: &QueryParams) -> Result<Rows, QueryError> {
        self.calls.lock().unwrap().push((sql.to_string(), params.clone()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(QueryError::new("no scripted response left")))
    }
}

#[derive(Default)]
pub struct RecordingReporter {
    reported: Mutex<Vec<QueryError>>,
}

impl RecordingReporter {
    pub fn reported(&self) -> Vec<QueryError> {
        self.reported.lock().unwrap().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, err: &QueryError) {
        self.reported.lock().unwrap().push(err.clone());
    }
}

pub fn rows(values: Value) -> Rows {
    serde_json::from_value(values).expect("rows")
}

pub fn param_names(params: &QueryParams) -> Vec<&str> {
    params.keys().map(String::as_str).collect()
}

/// Team 1: persons 1..=4. Team 2: person 9, who shares distinct id, email
/// and properties with person 1.
pub fn seeded_store() -> MemoryCohortStore {
    let store = MemoryCohortStore::new();
    let persons = [
        Person::new(1, 1)
            .with_distinct_ids(["123", "anon-1"])
            .with_property("email", "ada@example.com")
            .with_property("plan", "pro")
            .with_property("age", 36),
        Person::new(2, 1)
            .with_distinct_ids(["abc"])
            .with_property("email", "grace@example.com")
            .with_property("plan", "free")
            .with_property("age", 45),
        Person::new(3, 1)
            .with_distinct_ids(["def"])
            .with_property("plan", "pro")
            .with_property("$browser", "Chrome"),
        Person::new(4, 1).with_distinct_ids(["ghi"]),
        Person::new(9, 2)
            .with_distinct_ids(["123"])
            .with_property("email", "ada@example.com")
            .with_property("plan", "pro")
            .with_property("age", 36),
    ];
    for person in persons {
        store.add_person(person).expect("add person");
    }
    store
}

pub fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

pub fn field_names(fields: &IndexMap<String, warehouse_core::schema::field_type::FieldDef>) -> Vec<&str> {
    fields.keys().map(String::as_str).collect()
}
