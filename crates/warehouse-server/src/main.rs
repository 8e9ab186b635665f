use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use warehouse_core::clickhouse::ClickHouseHttpClient;
use warehouse_core::cohort::calculate::{self, CohortError};
use warehouse_core::cohort::pg::PgCohortStore;
use warehouse_core::cohort::store::CohortStore;
use warehouse_core::config::ServerSettings;
use warehouse_core::schema::overrides::ExternalTableOverrides;
use warehouse_core::store::{self, StoreError};
use warehouse_core::warehouse::discovery::{DiscoveryError, ErrorExposure, SchemaDiscovery, TracingErrorReporter};
use warehouse_core::warehouse::pg::PgWarehouseTables;
use warehouse_core::warehouse::table::{S3TableDefinition, WarehouseTable};

#[derive(Clone)]
struct AppState {
    tables: Arc<PgWarehouseTables>,
    cohorts: Arc<PgCohortStore>,
    discovery: Arc<SchemaDiscovery>,
    overrides: Arc<ExternalTableOverrides>,
}

struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn not_found(what: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            detail: format!("{what} not found"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!("store error: {err}");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: "internal error".to_string(),
        }
    }
}

impl From<DiscoveryError> for ApiError {
    fn from(err: DiscoveryError) -> Self {
        let detail = match err.user_message() {
            Ok(message) => message,
            Err(raw) => raw.message.clone(),
        };
        Self {
            status: StatusCode::BAD_REQUEST,
            detail,
        }
    }
}

impl From<CohortError> for ApiError {
    fn from(err: CohortError) -> Self {
        match err {
            CohortError::Store(e) => e.into(),
            other => Self {
                status: StatusCode::BAD_REQUEST,
                detail: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct TableResponse {
    #[serde(flatten)]
    table: WarehouseTable,
    definition: Option<S3TableDefinition>,
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_tables(
    State(state): State<AppState>,
    Path(team_id): Path<i64>,
) -> Result<Json<Vec<TableResponse>>, ApiError> {
    let tables = state.tables.active_tables(team_id).await?;
    let response = tables
        .into_iter()
        .map(|table| {
            // Tables without credentials or with unresolvable columns are
            // still listed, just without a definition.
            let definition = match table.hogql_definition(&state.overrides) {
                Ok(definition) => Some(definition),
                Err(e) => {
                    tracing::warn!(table = %table.name, "no definition for warehouse table: {e}");
                    None
                }
            };
            TableResponse { table, definition }
        })
        .collect();
    Ok(Json(response))
}

async fn refresh_schema(
    State(state): State<AppState>,
    Path((team_id, id)): Path<(i64, Uuid)>,
) -> Result<Json<WarehouseTable>, ApiError> {
    let mut table = state
        .tables
        .get(team_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("table"))?;

    state
        .discovery
        .refresh_schema(&mut table, ErrorExposure::Safe)
        .await?;
    state.tables.save_schema(&table).await?;
    Ok(Json(table))
}

async fn delete_table(
    State(state): State<AppState>,
    Path((team_id, id)): Path<(i64, Uuid)>,
) -> Result<StatusCode, ApiError> {
    if state.tables.soft_delete(team_id, id, Utc::now()).await? {
        tracing::info!(team_id, table_id = %id, "soft-deleted warehouse table");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("table"))
    }
}

#[derive(Debug, Deserialize)]
struct StaticMembersRequest {
    identifiers: Vec<String>,
}

async fn add_static_members(
    State(state): State<AppState>,
    Path((team_id, cohort_id)): Path<(i64, i64)>,
    Json(req): Json<StaticMembersRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut cohort = state
        .cohorts
        .cohort(team_id, cohort_id)
        .await?
        .ok_or_else(|| ApiError::not_found("cohort"))?;

    let added = calculate::insert_users_by_list(state.cohorts.as_ref(), &mut cohort, &req.identifiers).await?;
    Ok(Json(json!({ "added": added, "count": cohort.count })))
}

async fn recalculate(
    State(state): State<AppState>,
    Path((team_id, cohort_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    let mut cohort = state
        .cohorts
        .cohort(team_id, cohort_id)
        .await?
        .ok_or_else(|| ApiError::not_found("cohort"))?;

    let store = state.cohorts.clone();
    tokio::spawn(async move {
        if let Err(e) = calculate::recalculate_exclusive(store.as_ref(), &mut cohort, None).await {
            tracing::error!(cohort_id = cohort.id, "cohort recalculation failed: {e}");
        }
    });
    Ok(StatusCode::ACCEPTED)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = ServerSettings::from_env()?;

    let overrides = match &settings.external_tables_path {
        Some(path) => ExternalTableOverrides::load(path)?,
        None => ExternalTableOverrides::builtin().clone(),
    };
    let clickhouse = ClickHouseHttpClient::new(settings.clickhouse.clone())?;

    let state = AppState {
        tables: Arc::new(PgWarehouseTables::new(store::connect(&settings.database_url).await?)),
        cohorts: Arc::new(PgCohortStore::new(store::connect(&settings.database_url).await?)),
        discovery: Arc::new(SchemaDiscovery::new(
            Arc::new(clickhouse),
            Arc::new(TracingErrorReporter),
        )),
        overrides: Arc::new(overrides),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/teams/:team_id/warehouse_tables", get(list_tables))
        .route("/teams/:team_id/warehouse_tables/:id/refresh_schema", post(refresh_schema))
        .route("/teams/:team_id/warehouse_tables/:id", delete(delete_table))
        .route("/teams/:team_id/cohorts/:id/static_members", post(add_static_members))
        .route("/teams/:team_id/cohorts/:id/recalculate", post(recalculate))
        .with_state(state);

    let bind_addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server running on {}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
