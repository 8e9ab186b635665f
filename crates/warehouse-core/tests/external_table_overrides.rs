mod common;

use indexmap::IndexMap;
use warehouse_core::schema::column::FieldSchema;
use warehouse_core::schema::field_type::{FieldDef, FieldType};
use warehouse_core::schema::overrides::{strip_table_prefix, ExternalTableOverrides, WILDCARD};

use crate::common::{field_names, fixture_path};

fn discovered() -> FieldSchema {
    FieldSchema::from([
        ("id".to_string(), FieldDef::new("id", FieldType::Integer)),
        ("surprise".to_string(), FieldDef::new("surprise", FieldType::String)),
    ])
}

#[test]
fn registered_table_replaces_discovered_fields() {
    let overrides = ExternalTableOverrides::builtin();
    let fields = overrides.apply("stripe_customer", "", discovered());

    assert!(!fields.contains_key("surprise"));
    assert_eq!(fields["id"], FieldDef::new("id", FieldType::String));
    assert_eq!(fields["created_at"], FieldDef::new("created", FieldType::DateTime));
    assert_eq!(
        field_names(&fields),
        [
            "id",
            "name",
            "email",
            "phone",
            "description",
            "address",
            "balance",
            "currency",
            "delinquent",
            "default_source",
            "invoice_prefix",
            "livemode",
            "created_at",
            "metadata",
            "__dlt_id",
            "__dlt_load_id",
        ]
    );
    assert!(fields["__dlt_id"].hidden);
}

#[test]
fn result_ignores_discovered_entirely() {
    let overrides = ExternalTableOverrides::builtin();
    let from_discovered = overrides.apply("stripe_invoice", "", discovered());
    let from_nothing = overrides.apply("stripe_invoice", "", FieldSchema::new());
    assert_eq!(from_discovered, from_nothing);
}

#[test]
fn unregistered_table_passes_discovered_through() {
    let overrides = ExternalTableOverrides::builtin();
    assert_eq!(overrides.apply("events_export", "", discovered()), discovered());
}

#[test]
fn source_prefix_is_stripped_before_lookup() {
    let overrides = ExternalTableOverrides::builtin();
    let fields = overrides.apply("prod_stripe_charge", "prod_", discovered());
    assert_eq!(fields["amount"], FieldDef::new("amount", FieldType::Integer));

    assert_eq!(strip_table_prefix("prod_stripe_charge", "prod_"), "stripe_charge");
    assert_eq!(strip_table_prefix("stripe_charge", "prod_"), "stripe_charge");
    assert_eq!(strip_table_prefix("stripe_charge", ""), "stripe_charge");
}

#[test]
fn table_entry_wins_over_wildcard_on_shared_keys() {
    let mut tables = IndexMap::new();
    tables.insert(
        WILDCARD.to_string(),
        FieldSchema::from([
            ("id".to_string(), FieldDef::hidden("_id", FieldType::String)),
            ("loaded_at".to_string(), FieldDef::hidden("_loaded_at", FieldType::DateTime)),
        ]),
    );
    tables.insert(
        "orders".to_string(),
        FieldSchema::from([("id".to_string(), FieldDef::new("order_id", FieldType::Integer))]),
    );
    let overrides = ExternalTableOverrides::new(tables);

    let fields = overrides.apply("orders", "", discovered());
    assert_eq!(field_names(&fields), ["id", "loaded_at"]);
    assert_eq!(fields["id"], FieldDef::new("order_id", FieldType::Integer));
}

#[test]
fn loaded_definitions_layer_over_builtins() {
    let overrides = ExternalTableOverrides::load(&fixture_path("external_tables.json")).unwrap();

    let contacts = overrides.get("hubspot_contacts").unwrap();
    assert_eq!(contacts["created_at"], FieldDef::new("createdate", FieldType::DateTime));

    // A file entry replaces the built-in entry of the same name.
    assert_eq!(field_names(overrides.get("stripe_customer").unwrap()), ["id", "email"]);
    assert!(overrides.get("stripe_invoice").is_some());
    assert!(overrides.table_names().any(|name| name == WILDCARD));

    let fields = overrides.apply("hubspot_contacts", "", FieldSchema::new());
    assert_eq!(field_names(&fields), ["id", "email", "created_at", "__dlt_id", "__dlt_load_id"]);
}

#[test]
fn missing_definitions_file_is_reported_with_its_path() {
    let err = ExternalTableOverrides::load("/nonexistent/external_tables.json").unwrap_err();
    assert_eq!(
        err.to_string(),
        "read external table definitions: /nonexistent/external_tables.json"
    );
}
