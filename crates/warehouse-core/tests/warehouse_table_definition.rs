mod common;

use chrono::{TimeZone, Utc};
use indexmap::IndexMap;
use uuid::Uuid;
use warehouse_core::schema::column::RawColumnType;
use warehouse_core::schema::field_type::{FieldDef, FieldType};
use warehouse_core::schema::normalize::SchemaError;
use warehouse_core::schema::overrides::ExternalTableOverrides;
use warehouse_core::warehouse::table::{find_by_url_pattern_and_source, TableError, TableFormat};

use crate::common::{legacy_columns, s3_table, with_source_prefix};

#[test]
fn definition_carries_location_credentials_and_structure() {
    let mut table = s3_table("orders", TableFormat::Parquet);
    table.columns = legacy_columns(&[("id", "String"), ("total", "Nullable(Decimal(10, 2))")]);

    let definition = table.hogql_definition(&ExternalTableOverrides::default()).unwrap();
    assert_eq!(definition.name, "orders");
    assert_eq!(definition.url, "https://bucket.s3.amazonaws.com/exports/*.parquet");
    assert_eq!(definition.format, TableFormat::Parquet);
    assert_eq!(definition.access_key, "AKIAEXAMPLE");
    assert_eq!(definition.access_secret, "s3cr3t");
    assert_eq!(definition.structure, "id String, total Decimal(10, 2)");
    assert_eq!(definition.fields["total"], FieldDef::new("total", FieldType::Float));

    let json = serde_json::to_string(&definition).unwrap();
    assert!(!json.contains("s3cr3t"));
}

#[test]
fn registered_tables_get_their_canonical_fields() {
    let mut table = with_source_prefix(s3_table("prod_stripe_price", TableFormat::Parquet), "prod_");
    table.columns = legacy_columns(&[("id", "String"), ("created", "DateTime64(3)")]);

    assert_eq!(table.table_name_without_prefix(), "stripe_price");

    let definition = table.hogql_definition(ExternalTableOverrides::builtin()).unwrap();
    assert_eq!(definition.fields["created_at"], FieldDef::new("created", FieldType::DateTime));
    assert_eq!(definition.fields["unit_amount"], FieldDef::new("unit_amount", FieldType::Integer));
    assert!(definition.fields.contains_key("__dlt_load_id"));
    // The structure always reflects what was discovered.
    assert_eq!(definition.structure, "id String, created DateTime64(3)");
}

#[test]
fn definition_needs_a_credential() {
    let mut table = s3_table("orders", TableFormat::Csv);
    table.credential = None;

    let err = table.hogql_definition(ExternalTableOverrides::builtin()).unwrap_err();
    assert!(matches!(err, TableError::MissingCredential(name) if name == "orders"));
}

#[test]
fn fields_surface_schema_errors() {
    let mut table = s3_table("orders", TableFormat::Csv);
    table.columns = legacy_columns(&[("ip", "IPv4")]);

    let err = table.fields(ExternalTableOverrides::builtin()).unwrap_err();
    assert!(matches!(err, SchemaError::UnknownBackendType { .. }));
}

#[test]
fn column_type_strips_nullable_for_structured_entries_only() {
    let mut table = s3_table("orders", TableFormat::JsonEachRow);
    table.columns.insert(
        "id".to_string(),
        RawColumnType::structured("Nullable(String)", FieldType::String),
    );
    table.columns.insert(
        "total".to_string(),
        RawColumnType::Legacy("Nullable(Float64)".to_string()),
    );

    assert_eq!(table.clickhouse_column_type("id").as_deref(), Some("String"));
    assert_eq!(table.clickhouse_column_type("total").as_deref(), Some("Nullable(Float64)"));
    assert_eq!(table.clickhouse_column_type("missing"), None);
}

#[test]
fn discovered_columns_are_stored_structured() {
    let mut table = s3_table("orders", TableFormat::Parquet);
    let described = IndexMap::from([
        ("id".to_string(), "Nullable(String)".to_string()),
        ("lines".to_string(), "Array(Tuple(sku String, qty Int64))".to_string()),
    ]);

    table.set_discovered_columns(&described).unwrap();
    assert_eq!(field_names_of_columns(&table.columns), ["id", "lines"]);
    assert_eq!(
        table.columns["lines"],
        RawColumnType::structured("Array(Tuple(sku String, qty Int64))", FieldType::StringArray)
    );

    insta::assert_json_snapshot!(table.columns, @r###"
    {
      "id": {
        "clickhouse": "Nullable(String)",
        "hogql": "StringDatabaseField"
      },
      "lines": {
        "clickhouse": "Array(Tuple(sku String, qty Int64))",
        "hogql": "StringArrayDatabaseField"
      }
    }
    "###);
}

fn field_names_of_columns(columns: &IndexMap<String, RawColumnType>) -> Vec<&str> {
    columns.keys().map(String::as_str).collect()
}

#[test]
fn soft_deleted_tables_are_not_found() {
    let source = Uuid::new_v4();
    let mut tables = vec![
        with_source_prefix(s3_table("stripe_customer", TableFormat::Parquet), ""),
        with_source_prefix(s3_table("stripe_customer", TableFormat::Parquet), ""),
    ];
    for table in &mut tables {
        if let Some(s) = table.external_data_source.as_mut() {
            s.id = source;
        }
    }
    let url = tables[0].url_pattern.clone();

    let found = find_by_url_pattern_and_source(&tables, 1, source, &url).unwrap();
    assert_eq!(found.id, tables[0].id);

    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    tables[0].soft_delete(now);
    assert!(!tables[0].is_active());
    assert_eq!(tables[0].deleted_at, Some(now));

    let found = find_by_url_pattern_and_source(&tables, 1, source, &url).unwrap();
    assert_eq!(found.id, tables[1].id);

    assert!(find_by_url_pattern_and_source(&tables, 2, source, &url).is_none());
    assert!(find_by_url_pattern_and_source(&tables, 1, Uuid::new_v4(), &url).is_none());
}

#[test]
fn formats_round_trip_through_their_backend_names() {
    for format in [TableFormat::Csv, TableFormat::Parquet, TableFormat::JsonEachRow] {
        assert_eq!(format.as_str().parse::<TableFormat>(), Ok(format));
    }
    assert!("Avro".parse::<TableFormat>().is_err());
    assert_eq!(serde_json::to_string(&TableFormat::JsonEachRow).unwrap(), "\"JSONEachRow\"");
}

#[test]
fn serialized_tables_hide_the_secret() {
    let table = s3_table("orders", TableFormat::Csv);
    let json = serde_json::to_value(&table).unwrap();
    assert_eq!(json["credential"]["access_key"], "AKIAEXAMPLE");
    assert!(json["credential"].get("access_secret").is_none());
}
