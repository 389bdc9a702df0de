//! Supabase client: PostgREST endpoints under `{SUPABASE_URL}/rest/v1`
//!
//! Every call is a fresh point-in-time request; nothing is cached between calls.

use crate::repository::{BotConfigRow, OperationWindow, SignalRow};
use crate::schema::{BOT_CONFIGURATIONS_TABLE, LATEST_SIGNALS_TABLE, SIGNALS_TABLE};
use crate::{StoreError, StoreResult, MAX_WINDOW};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Per-request timeout applied by the HTTP client
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Supabase REST client
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    log_table: String,
}

impl SupabaseClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        log_table: impl Into<String>,
    ) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| StoreError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            log_table: log_table.into(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }

    async fn send(&self, request: RequestBuilder) -> StoreResult<Response> {
        let resp = request
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }

    async fn fetch_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> StoreResult<T> {
        let resp = self.send(request).await?;
        resp.json::<T>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    /// GET the most recent results for a bot, newest first
    pub async fn fetch_recent_operations(
        &self,
        bot_id: &str,
        limit: u32,
    ) -> StoreResult<OperationWindow> {
        let limit = limit.min(MAX_WINDOW);
        debug!(table = %self.log_table, bot_id, limit, "Fetching operation window");

        let request = self.request(Method::GET, &self.log_table).query(&[
            (
                "select",
                "id,bot_id,timestamp,operation_result,profit_percentage,stake_value".to_string(),
            ),
            ("bot_id", format!("eq.{bot_id}")),
            ("operation_result", "not.is.null".to_string()),
            ("order", "timestamp.desc,id.desc".to_string()),
            ("limit", limit.to_string()),
        ]);

        let values: Vec<serde_json::Value> = self.fetch_json(request).await?;
        let window = OperationWindow::from_json_rows(values);
        debug!(
            count = window.rows.len(),
            undecodable = window.undecodable,
            "Operation window fetched"
        );
        Ok(window)
    }

    /// POST into the signal stream; a repeated cycle_id is ignored server-side
    pub async fn append_signal(&self, row: &SignalRow) -> StoreResult<()> {
        let request = self
            .request(Method::POST, SIGNALS_TABLE)
            .query(&[("on_conflict", "cycle_id")])
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&[row]);

        self.send(request).await?;
        Ok(())
    }

    /// POST into the latest-per-bot projection, merging on bot_name
    pub async fn upsert_latest_signal(&self, row: &SignalRow) -> StoreResult<()> {
        let request = self
            .request(Method::POST, LATEST_SIGNALS_TABLE)
            .query(&[("on_conflict", "bot_name")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row]);

        self.send(request).await?;
        Ok(())
    }

    pub async fn list_bots(&self) -> StoreResult<Vec<BotConfigRow>> {
        let request = self
            .request(Method::GET, BOT_CONFIGURATIONS_TABLE)
            .query(&[("select", "*"), ("order", "bot_name.asc")]);

        self.fetch_json(request).await
    }

    pub async fn get_bot(&self, id: &str) -> StoreResult<Option<BotConfigRow>> {
        let request = self.request(Method::GET, BOT_CONFIGURATIONS_TABLE).query(&[
            ("select", "*".to_string()),
            ("id", format!("eq.{id}")),
            ("limit", "1".to_string()),
        ]);

        let mut rows: Vec<BotConfigRow> = self.fetch_json(request).await?;
        Ok(rows.pop())
    }
}

/// Map a non-success HTTP status to a store error
fn classify_status(status: StatusCode, body: String) -> StoreError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Auth {
            status: status.as_u16(),
            body,
        },
        _ => StoreError::Status {
            status: status.as_u16(),
            body,
        },
    }
}
