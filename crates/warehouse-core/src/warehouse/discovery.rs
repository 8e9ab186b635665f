//! Remote schema discovery for warehouse tables.
//!
//! Columns and row counts are read by querying the analytical store through
//! a virtual table over the external files. Backend failures are always
//! handed to the [`ErrorReporter`] and then either returned raw or reduced to
//! a short message the user can act on.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

use crate::schema::normalize::SchemaError;
use crate::sql::render::{render_count_sql, render_describe_sql};
use crate::warehouse::errors::{translate_backend_error, GENERIC_DISCOVERY_MESSAGE};
use crate::warehouse::table::{TableError, WarehouseTable};

/// Named parameters bound server-side by the analytical store.
pub type QueryParams = IndexMap<String, String>;

pub type Rows = Vec<Vec<Value>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct QueryError {
    pub code: Option<u32>,
    pub message: String,
}

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

/// Typed call into the analytical query service.
#[async_trait]
pub trait AnalyticsClient: Send + Sync {
    async fn query(&self, sql: &str, params: &QueryParams) -> Result<Rows, QueryError>;
}

/// Error-tracking collaborator. Fire-and-forget.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, err: &QueryError);
}

/// Reports failures as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, err: &QueryError) {
        tracing::error!(code = err.code, error = %err.message, "warehouse schema discovery failed");
    }
}

/// How backend failures surface to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorExposure {
    /// Known failures become short messages, the rest a generic one.
    #[default]
    Safe,
    /// The backend error is returned untouched.
    Raw,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("{message}")]
    Translated {
        message: &'static str,
        #[source]
        source: QueryError,
    },

    #[error("Could not get columns")]
    Unrecognized {
        #[source]
        source: QueryError,
    },

    #[error(transparent)]
    Raw(QueryError),

    #[error("table '{0}' has no credential attached")]
    MissingCredential(String),

    #[error("unexpected {query} result: {detail}")]
    UnexpectedResult { query: &'static str, detail: String },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl DiscoveryError {
    /// The message to show a user, or the raw backend error when the caller
    /// asked for it untranslated.
    pub fn user_message(&self) -> Result<String, &QueryError> {
        match self {
            DiscoveryError::Translated { message, .. } => Ok(message.to_string()),
            DiscoveryError::Unrecognized { .. } => Ok(GENERIC_DISCOVERY_MESSAGE.to_string()),
            DiscoveryError::Raw(source) => Err(source),
            other => Ok(other.to_string()),
        }
    }
}

impl From<TableError> for DiscoveryError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::Schema(e) => DiscoveryError::Schema(e),
            TableError::MissingCredential(name) => DiscoveryError::MissingCredential(name),
        }
    }
}

/// Bound parameters for the virtual table over `table`'s files.
pub fn s3_params(table: &WarehouseTable) -> Result<QueryParams, DiscoveryError> {
    let credential = table.credential()?;
    let mut params = QueryParams::new();
    params.insert("url_pattern".to_string(), table.url_pattern.clone());
    params.insert("access_key".to_string(), credential.access_key.clone());
    params.insert("access_secret".to_string(), credential.access_secret.clone());
    params.insert("format".to_string(), table.format.as_str().to_string());
    Ok(params)
}

pub struct SchemaDiscovery {
    client: Arc<dyn AnalyticsClient>,
    reporter: Arc<dyn ErrorReporter>,
}

impl SchemaDiscovery {
    pub fn new(client: Arc<dyn AnalyticsClient>, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self { client, reporter }
    }

    /// Column name to backend type, in file order.
    pub async fn describe(
        &self,
        table: &WarehouseTable,
        exposure: ErrorExposure,
    ) -> Result<IndexMap<String, String>, DiscoveryError> {
        let params = s3_params(table)?;
        let rows = self.run(&render_describe_sql(), &params, exposure).await?;

        rows.iter()
            .map(|row| match (row.first(), row.get(1)) {
                (Some(Value::String(name)), Some(Value::String(ty))) => Ok((name.clone(), ty.clone())),
                _ => Err(DiscoveryError::UnexpectedResult {
                    query: "describe",
                    detail: format!("{:?}", row),
                }),
            })
            .collect()
    }

    pub async fn count(&self, table: &WarehouseTable, exposure: ErrorExposure) -> Result<u64, DiscoveryError> {
        let params = s3_params(table)?;
        let rows = self.run(&render_count_sql(), &params, exposure).await?;

        let cell = rows.first().and_then(|row| row.first());
        // 64-bit integers may arrive quoted.
        let count = match cell {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        };
        count.ok_or_else(|| DiscoveryError::UnexpectedResult {
            query: "count",
            detail: format!("{:?}", cell),
        })
    }

    /// Describes and counts `table`, storing columns in the structured
    /// encoding and the row count.
    pub async fn refresh_schema(
        &self,
        table: &mut WarehouseTable,
        exposure: ErrorExposure,
    ) -> Result<(), DiscoveryError> {
        let described = self.describe(table, exposure).await?;
        let count = self.count(table, exposure).await?;

        table.set_discovered_columns(&described)?;
        table.row_count = Some(i64::try_from(count).unwrap_or(i64::MAX));
        tracing::info!(
            table = %table.name,
            columns = table.columns.len(),
            row_count = count,
            "refreshed warehouse table schema"
        );
        Ok(())
    }

    async fn run(&self, sql: &str, params: &QueryParams, exposure: ErrorExposure) -> Result<Rows, DiscoveryError> {
        self.client
            .query(sql, params)
            .await
            .map_err(|err| self.expose(err, exposure))
    }

    fn expose(&self, err: QueryError, exposure: ErrorExposure) -> DiscoveryError {
        self.reporter.report(&err);
        match exposure {
            ErrorExposure::Raw => DiscoveryError::Raw(err),
            ErrorExposure::Safe => match translate_backend_error(&err.message) {
                Some(message) => DiscoveryError::Translated { message, source: err },
                None => DiscoveryError::Unrecognized { source: err },
            },
        }
    }
}
