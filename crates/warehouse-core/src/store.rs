use anyhow::Context;
use thiserror::Error;
use tokio_postgres::{Client, NoTls};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Missing cohort: {0}")]
    MissingCohort(i64),
    #[error("Invalid store data: {0}")]
    InvalidData(String),
}

/// Opens a row-store connection and drives it on a background task.
pub async fn connect(database_url: &str) -> anyhow::Result<Client> {
    let (client, connection) = tokio_postgres::connect(database_url, NoTls)
        .await
        .context("connect to Postgres")?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("db connection error: {e}");
        }
    });
    Ok(client)
}
