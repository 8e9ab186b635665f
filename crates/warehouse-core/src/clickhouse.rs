use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::ClickHouseSettings;
use crate::warehouse::discovery::{AnalyticsClient, QueryError, QueryParams, Rows};

const USER_HEADER: &str = "X-ClickHouse-User";
const KEY_HEADER: &str = "X-ClickHouse-Key";

#[derive(Debug, Deserialize)]
struct CompactResponse {
    data: Rows,
}

/// Analytics client speaking the ClickHouse HTTP interface. Parameters are
/// sent as `param_<name>` and substituted server-side into `{name:Type}`
/// placeholders.
#[derive(Debug, Clone)]
pub struct ClickHouseHttpClient {
    http: Client,
    settings: ClickHouseSettings,
}

impl ClickHouseHttpClient {
    pub fn new(settings: ClickHouseSettings) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;
        Ok(Self { http, settings })
    }
}

/// Splits `Code: 636. DB::Exception: ...` into the numeric code and the text.
pub fn parse_exception(body: &str) -> QueryError {
    let body = body.trim();
    let code = body
        .strip_prefix("Code: ")
        .and_then(|rest| rest.split('.').next())
        .and_then(|digits| digits.trim().parse().ok());
    QueryError {
        code,
        message: body.to_string(),
    }
}

#[async_trait]
impl AnalyticsClient for ClickHouseHttpClient {
    async fn query(&self, sql: &str, params: &QueryParams) -> Result<Rows, QueryError> {
        let mut query: Vec<(String, String)> = vec![
            ("database".to_string(), self.settings.database.clone()),
            ("default_format".to_string(), "JSONCompact".to_string()),
        ];
        query.extend(params.iter().map(|(k, v)| (format!("param_{k}"), v.clone())));

        let response = self
            .http
            .post(&self.settings.url)
            .header(USER_HEADER, &self.settings.user)
            .header(KEY_HEADER, &self.settings.password)
            .query(&query)
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| QueryError::new(format!("request to analytics store failed: {e}")))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| QueryError::new(format!("reading analytics response failed: {e}")))?;

        if !status.is_success() {
            return Err(parse_exception(&String::from_utf8_lossy(&bytes)));
        }

        let parsed: CompactResponse = serde_json::from_slice(&bytes)
            .map_err(|e| QueryError::new(format!("unparseable analytics response: {e}")))?;
        tracing::debug!(rows = parsed.data.len(), "analytics query finished");
        Ok(parsed.data)
    }
}
