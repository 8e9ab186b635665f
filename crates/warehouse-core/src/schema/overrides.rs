use std::sync::OnceLock;

use anyhow::Context;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::schema::column::FieldSchema;
use crate::schema::field_type::{FieldDef, FieldType};

/// Registry key whose fields sit under every other entry.
pub const WILDCARD: &str = "*";

/// Fixed field definitions for well-known external tables, keyed by table
/// name with any source prefix removed.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ExternalTableOverrides {
    tables: IndexMap<String, FieldSchema>,
}

static BUILTIN: OnceLock<ExternalTableOverrides> = OnceLock::new();

impl ExternalTableOverrides {
    pub fn new(tables: IndexMap<String, FieldSchema>) -> Self {
        Self { tables }
    }

    /// Process-wide built-in definitions, built on first use.
    pub fn builtin() -> &'static ExternalTableOverrides {
        BUILTIN.get_or_init(builtin_definitions)
    }

    /// Built-ins with the entries of a JSON file layered on top.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read external table definitions: {}", path))?;
        let extra: ExternalTableOverrides = serde_json::from_str(&raw)
            .with_context(|| format!("parse external table definitions: {}", path))?;

        let mut merged = Self::builtin().clone();
        merged.tables.extend(extra.tables);
        Ok(merged)
    }

    pub fn get(&self, table: &str) -> Option<&FieldSchema> {
        self.tables.get(table)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Replaces `discovered` with the canonical definition when one exists.
    ///
    /// A matching entry wins over the wildcard on shared keys; discovered
    /// fields are not merged in. Without a match `discovered` is returned as is.
    pub fn apply(&self, table_name: &str, prefix: &str, discovered: FieldSchema) -> FieldSchema {
        let key = strip_table_prefix(table_name, prefix);
        let Some(fields) = self.tables.get(key) else {
            return discovered;
        };

        let mut merged = fields.clone();
        if let Some(wildcard) = self.tables.get(WILDCARD) {
            for (name, field) in wildcard {
                merged.entry(name.clone()).or_insert_with(|| field.clone());
            }
        }
        merged
    }
}

pub fn strip_table_prefix<'a>(table_name: &'a str, prefix: &str) -> &'a str {
    table_name.strip_prefix(prefix).unwrap_or(table_name)
}

fn schema(fields: &[(&str, &str, FieldType)]) -> FieldSchema {
    fields
        .iter()
        .map(|(key, column, ty)| (key.to_string(), FieldDef::new(*column, *ty)))
        .collect()
}

// TODO: load these from the source connector manifests once they publish field types.
fn builtin_definitions() -> ExternalTableOverrides {
    use FieldType::*;

    let mut tables = IndexMap::new();

    tables.insert(
        WILDCARD.to_string(),
        FieldSchema::from([
            ("__dlt_id".to_string(), FieldDef::hidden("_dlt_id", String)),
            ("__dlt_load_id".to_string(), FieldDef::hidden("_dlt_load_id", String)),
        ]),
    );

    tables.insert(
        "stripe_account".to_string(),
        schema(&[
            ("id", "id", String),
            ("payouts_enabled", "payouts_enabled", Boolean),
            ("charges_enabled", "charges_enabled", Boolean),
            ("details_submitted", "details_submitted", Boolean),
            ("business_type", "business_type", String),
            ("country", "country", String),
            ("default_currency", "default_currency", String),
            ("email", "email", String),
            ("type", "type", String),
            ("created_at", "created", DateTime),
            ("metadata", "metadata", StringJson),
            ("business_profile", "business_profile", StringJson),
            ("capabilities", "capabilities", StringJson),
        ]),
    );

    tables.insert(
        "stripe_customer".to_string(),
        schema(&[
            ("id", "id", String),
            ("name", "name", String),
            ("email", "email", String),
            ("phone", "phone", String),
            ("description", "description", String),
            ("address", "address", StringJson),
            ("balance", "balance", Integer),
            ("currency", "currency", String),
            ("delinquent", "delinquent", Boolean),
            ("default_source", "default_source", String),
            ("invoice_prefix", "invoice_prefix", String),
            ("livemode", "livemode", Boolean),
            ("created_at", "created", DateTime),
            ("metadata", "metadata", StringJson),
        ]),
    );

    tables.insert(
        "stripe_invoice".to_string(),
        schema(&[
            ("id", "id", String),
            ("customer_id", "customer", String),
            ("subscription_id", "subscription", String),
            ("charge_id", "charge", String),
            ("status", "status", String),
            ("paid", "paid", Boolean),
            ("currency", "currency", String),
            ("amount_due", "amount_due", Integer),
            ("amount_paid", "amount_paid", Integer),
            ("amount_remaining", "amount_remaining", Integer),
            ("subtotal", "subtotal", Integer),
            ("total", "total", Integer),
            ("attempt_count", "attempt_count", Integer),
            ("period_start_at", "period_start", DateTime),
            ("period_end_at", "period_end", DateTime),
            ("created_at", "created", DateTime),
            ("lines", "lines", StringJson),
            ("metadata", "metadata", StringJson),
        ]),
    );

    tables.insert(
        "stripe_charge".to_string(),
        schema(&[
            ("id", "id", String),
            ("customer_id", "customer", String),
            ("invoice_id", "invoice", String),
            ("amount", "amount", Integer),
            ("amount_captured", "amount_captured", Integer),
            ("amount_refunded", "amount_refunded", Integer),
            ("currency", "currency", String),
            ("status", "status", String),
            ("paid", "paid", Boolean),
            ("refunded", "refunded", Boolean),
            ("captured", "captured", Boolean),
            ("disputed", "disputed", Boolean),
            ("failure_code", "failure_code", String),
            ("failure_message", "failure_message", String),
            ("created_at", "created", DateTime),
            ("metadata", "metadata", StringJson),
        ]),
    );

    tables.insert(
        "stripe_price".to_string(),
        schema(&[
            ("id", "id", String),
            ("product_id", "product", String),
            ("active", "active", Boolean),
            ("currency", "currency", String),
            ("nickname", "nickname", String),
            ("type", "type", String),
            ("unit_amount", "unit_amount", Integer),
            ("unit_amount_decimal", "unit_amount_decimal", Float),
            ("billing_scheme", "billing_scheme", String),
            ("recurring", "recurring", StringJson),
            ("created_at", "created", DateTime),
            ("metadata", "metadata", StringJson),
        ]),
    );

    tables.insert(
        "stripe_product".to_string(),
        schema(&[
            ("id", "id", String),
            ("name", "name", String),
            ("description", "description", String),
            ("active", "active", Boolean),
            ("default_price_id", "default_price", String),
            ("images", "images", StringArray),
            ("url", "url", String),
            ("created_at", "created", DateTime),
            ("updated_at", "updated", DateTime),
            ("metadata", "metadata", StringJson),
        ]),
    );

    tables.insert(
        "stripe_subscription".to_string(),
        schema(&[
            ("id", "id", String),
            ("customer_id", "customer", String),
            ("status", "status", String),
            ("currency", "currency", String),
            ("cancel_at_period_end", "cancel_at_period_end", Boolean),
            ("collection_method", "collection_method", String),
            ("items", "items", StringJson),
            ("current_period_start_at", "current_period_start", DateTime),
            ("current_period_end_at", "current_period_end", DateTime),
            ("start_date", "start_date", DateTime),
            ("ended_at", "ended_at", DateTime),
            ("canceled_at", "canceled_at", DateTime),
            ("trial_start_at", "trial_start", DateTime),
            ("trial_end_at", "trial_end", DateTime),
            ("created_at", "created", DateTime),
            ("metadata", "metadata", StringJson),
        ]),
    );

    ExternalTableOverrides { tables }
}
