//! Process settings read from the environment (after `.env` is loaded by the
//! binaries). Unparseable numeric values fall back to their defaults.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub fn database_url() -> anyhow::Result<String> {
    std::env::var("DATABASE_URL").context("DATABASE_URL must be set")
}

#[derive(Debug, Clone)]
pub struct ClickHouseSettings {
    pub url: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub timeout_seconds: u64,
}

impl ClickHouseSettings {
    pub fn from_env() -> Self {
        Self {
            url: env_or("CLICKHOUSE_URL", "http://localhost:8123"),
            user: env_or("CLICKHOUSE_USER", "default"),
            password: env_or("CLICKHOUSE_PASSWORD", ""),
            database: env_or("CLICKHOUSE_DATABASE", "default"),
            timeout_seconds: env_parse("CLICKHOUSE_TIMEOUT_SECONDS", 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Extra canonical table definitions layered over the built-in ones.
    pub external_tables_path: Option<String>,
    pub clickhouse: ClickHouseSettings,
}

impl ServerSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env_or("SERVER_HOST", "0.0.0.0"),
            port: env_parse("SERVER_PORT", 8080),
            database_url: database_url()?,
            external_tables_path: std::env::var("EXTERNAL_TABLES_PATH").ok(),
            clickhouse: ClickHouseSettings::from_env(),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub database_url: String,
    pub refresh_interval: Duration,
    pub stale_after: Duration,
    pub max_errors: u32,
    pub batch_limit: i64,
}

impl WorkerSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: database_url()?,
            refresh_interval: Duration::from_secs(env_parse("COHORT_REFRESH_INTERVAL_SECONDS", 60)),
            stale_after: Duration::from_secs(env_parse("COHORT_STALE_AFTER_SECONDS", 3600)),
            max_errors: env_parse("COHORT_MAX_ERRORS", 20),
            batch_limit: env_parse("COHORT_BATCH_LIMIT", 100),
        })
    }
}
