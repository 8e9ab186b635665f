mod common;

use warehouse_core::schema::column::{ColumnSchema, RawColumnType};
use warehouse_core::schema::field_type::{FieldDef, FieldType};
use warehouse_core::schema::normalize::{
    clean_backend_type, normalize, normalize_columns, remove_named_tuples, SchemaError,
};

use crate::common::legacy_columns;

#[test]
fn every_mapped_backend_type_resolves() {
    let expected = [
        ("UUID", FieldType::String),
        ("String", FieldType::String),
        ("DateTime64(6, 'UTC')", FieldType::DateTime),
        ("DateTime32", FieldType::DateTime),
        ("DateTime", FieldType::DateTime),
        ("Date", FieldType::Date),
        ("Date32", FieldType::Date),
        ("UInt8", FieldType::Integer),
        ("UInt64", FieldType::Integer),
        ("Int16", FieldType::Integer),
        ("Int64", FieldType::Integer),
        ("Float32", FieldType::Float),
        ("Float64", FieldType::Float),
        ("Decimal(18, 2)", FieldType::Float),
        ("Tuple(a String, b Int64)", FieldType::StringJson),
        ("Map(String, String)", FieldType::StringJson),
        ("Array(String)", FieldType::StringArray),
        ("Bool", FieldType::Boolean),
    ];

    for (backend_type, field_type) in expected {
        let columns = legacy_columns(&[("c", backend_type)]);
        let first = normalize(&columns).unwrap();
        let second = normalize(&columns).unwrap();
        assert_eq!(first, second, "{backend_type}");
        assert_eq!(first["c"].field_type, field_type, "{backend_type}");
    }
}

#[test]
fn nullable_wrapper_is_stripped() {
    let fields = normalize(&legacy_columns(&[("a", "Nullable(Int64)")])).unwrap();
    assert_eq!(fields["a"], FieldDef::new("a", FieldType::Integer));
}

#[test]
fn only_one_nullable_wrapper_is_stripped() {
    assert_eq!(clean_backend_type("a", "Nullable(Nullable(Int64))").unwrap(), "Nullable(Int64)");

    let err = normalize(&legacy_columns(&[("a", "Nullable(Nullable(Int64))")])).unwrap_err();
    assert_eq!(
        err,
        SchemaError::UnknownBackendType {
            column: "a".to_string(),
            backend_type: "Nullable(Int64)".to_string(),
        }
    );
}

#[test]
fn array_of_tuples_is_an_array_field() {
    let normalized = normalize_columns(&legacy_columns(&[("a", "Array(Tuple(String, Int64))")])).unwrap();
    assert_eq!(normalized.fields["a"].field_type, FieldType::StringArray);
    assert_eq!(normalized.structure, "a Array(Tuple(String, Int64))");
}

#[test]
fn named_tuple_elements_are_flattened() {
    let normalized = normalize_columns(&legacy_columns(&[(
        "items",
        "Nullable(Array(Tuple(id String, amount Nullable(Float64), created DateTime64(3, 'UTC'))))",
    )]))
    .unwrap();

    assert_eq!(normalized.fields["items"].field_type, FieldType::StringArray);
    assert_eq!(
        normalized.structure,
        "items Array(Tuple(String, Nullable(Float64), DateTime64(3, 'UTC')))"
    );
}

#[test]
fn nested_named_tuples_are_flattened() {
    assert_eq!(
        remove_named_tuples("Array(Tuple(`line item` Tuple(sku String, qty Int32), tags Array(LowCardinality(String))))")
            .unwrap(),
        "Array(Tuple(Tuple(String, Int32), Array(LowCardinality(String))))"
    );
    assert_eq!(
        remove_named_tuples("Array(Map(String, Tuple(k String, v UInt8)))").unwrap(),
        "Array(Map(String, Tuple(String, UInt8)))"
    );
}

#[test]
fn unmapped_array_element_types_pass_through() {
    let columns = legacy_columns(&[
        ("digests", "Array(FixedString(16))"),
        ("ips", "Nullable(Array(IPv4))"),
        ("states", "Array(Enum8('a' = 1, 'b' = 2))"),
        ("events", "Array(Tuple(id String, kind Enum8('x' = 1, 'y' = -2)))"),
        ("hosts", "Array(Tuple(name String, ip IPv4))"),
    ]);

    let normalized = normalize_columns(&columns).unwrap();
    for field in normalized.fields.values() {
        assert_eq!(field.field_type, FieldType::StringArray, "{}", field.name);
    }
    assert_eq!(
        normalized.structure,
        "digests Array(FixedString(16)), ips Array(IPv4), states Array(Enum8('a' = 1, 'b' = 2)), \
         events Array(Tuple(String, Enum8('x' = 1, 'y' = -2))), hosts Array(Tuple(String, IPv4))"
    );
}

#[test]
fn structured_array_entries_with_unmapped_elements_resolve() {
    let mut columns = ColumnSchema::new();
    columns.insert(
        "digests".to_string(),
        RawColumnType::structured("Nullable(Array(FixedString(16)))", FieldType::StringArray),
    );

    let normalized = normalize_columns(&columns).unwrap();
    assert_eq!(normalized.fields["digests"].field_type, FieldType::StringArray);
    assert_eq!(normalized.structure, "digests Array(FixedString(16))");
}

#[test]
fn malformed_array_types_are_errors() {
    let err = normalize(&legacy_columns(&[("hosts", "Array(Tuple(id String name))")])).unwrap_err();
    assert_eq!(
        err,
        SchemaError::UnflattenableType {
            column: "hosts".to_string(),
            backend_type: "Array(Tuple(id String name))".to_string(),
            reason: "expected ',' or ')', found Ident(\"name\")".to_string(),
        }
    );

    assert!(remove_named_tuples("Array(Tuple(String, Int64)").is_err());
    assert!(remove_named_tuples("Array(Tuple(id String,))").is_err());
    assert!(remove_named_tuples("Array(FixedString())").is_err());
    assert!(remove_named_tuples("Array(Enum8('a = 1))").is_err());
}

#[test]
fn unknown_backend_type_is_surfaced() {
    let err = normalize(&legacy_columns(&[("ok", "String"), ("addr", "IPv6")])).unwrap_err();
    assert_eq!(
        err,
        SchemaError::UnknownBackendType {
            column: "addr".to_string(),
            backend_type: "IPv6".to_string(),
        }
    );
    assert_eq!(err.to_string(), "unknown backend type 'IPv6' for column 'addr'");
}

#[test]
fn structured_entries_use_their_field_type() {
    let mut columns = ColumnSchema::new();
    columns.insert(
        "payload".to_string(),
        RawColumnType::structured("Nullable(String)", FieldType::StringJson),
    );
    columns.insert("id".to_string(), RawColumnType::Legacy("UUID".to_string()));

    let normalized = normalize_columns(&columns).unwrap();
    assert_eq!(normalized.fields["payload"].field_type, FieldType::StringJson);
    assert_eq!(normalized.structure, "payload String, id UUID");
}

#[test]
fn output_keeps_column_order() {
    let columns = legacy_columns(&[("zeta", "String"), ("alpha", "Int64"), ("mid", "Bool")]);
    let fields = normalize(&columns).unwrap();
    assert_eq!(fields.keys().collect::<Vec<_>>(), ["zeta", "alpha", "mid"]);
}

#[test]
fn both_encodings_deserialize_from_stored_json() {
    let columns: ColumnSchema = serde_json::from_value(serde_json::json!({
        "id": "Nullable(String)",
        "total": { "clickhouse": "Nullable(Float64)", "hogql": "FloatDatabaseField" }
    }))
    .unwrap();

    assert_eq!(columns["id"], RawColumnType::Legacy("Nullable(String)".to_string()));
    assert_eq!(columns["total"], RawColumnType::structured("Nullable(Float64)", FieldType::Float));

    insta::assert_json_snapshot!(normalize(&columns).unwrap(), @r###"
    {
      "id": {
        "name": "id",
        "type": "StringDatabaseField",
        "hidden": false
      },
      "total": {
        "name": "total",
        "type": "FloatDatabaseField",
        "hidden": false
      }
    }
    "###);
}

#[test]
fn field_types_map_back_to_canonical_backend_types() {
    let canonical: Vec<&str> = FieldType::ALL.iter().map(|t| t.clickhouse_type()).collect();
    assert_eq!(
        canonical,
        ["Bool", "Date", "DateTime64", "Float64", "Int64", "Array", "String", "Map"]
    );
    for ty in FieldType::ALL {
        assert_eq!(FieldType::from_hogql_name(ty.hogql_name()), Some(ty));
    }
}
