//! Operation log repository: the outcome stream written by the bot runners

use crate::{StoreResult, MAX_WINDOW};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use tracing::warn;

/// A raw operation log row as stored; `operation_result` is the storage code
/// (`'V'` for a win) and is interpreted by the radar gateway, not here.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OperationLogRow {
    pub id: i64,
    #[serde(deserialize_with = "crate::opaque_id")]
    pub bot_id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "crate::scalar_text")]
    pub operation_result: Option<String>,
    #[serde(default, deserialize_with = "crate::lenient_f64")]
    pub profit_percentage: Option<f64>,
    #[serde(default, deserialize_with = "crate::lenient_f64")]
    pub stake_value: Option<f64>,
}

/// Rows of one window query plus the count of rows the backend returned
/// but that could not be decoded at all
#[derive(Debug, Clone, Default)]
pub struct OperationWindow {
    pub rows: Vec<OperationLogRow>,
    pub undecodable: usize,
}

impl OperationWindow {
    /// Decode a PostgREST array row by row; a bad row never sinks the window
    pub fn from_json_rows(values: Vec<serde_json::Value>) -> Self {
        let mut window = Self::default();
        for value in values {
            match serde_json::from_value::<OperationLogRow>(value) {
                Ok(row) => window.rows.push(row),
                Err(e) => {
                    window.undecodable += 1;
                    warn!(error = %e, "Undecodable operation log row");
                }
            }
        }
        window
    }
}

/// Repository for the operation log table
pub struct OperationLogRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> OperationLogRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Most recent rows with a non-null result, newest first. Ordered by
    /// instant, so `2024-05-01 10:00:00` and `2024-05-01T10:00:00Z` compare equal.
    pub async fn fetch_recent(&self, bot_id: &str, limit: u32) -> StoreResult<Vec<OperationLogRow>> {
        let records = sqlx::query_as::<_, OperationLogRow>(
            r#"SELECT id, bot_id, timestamp, operation_result, profit_percentage, stake_value
               FROM bot_operation_logs
               WHERE bot_id = ?1 AND operation_result IS NOT NULL
               ORDER BY julianday(timestamp) DESC, timestamp DESC, id DESC
               LIMIT ?2"#,
        )
        .bind(bot_id)
        .bind(limit.min(MAX_WINDOW) as i64)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Append a row (local runs and tests only; production rows come from the bot runners)
    pub async fn insert(
        &self,
        bot_id: &str,
        timestamp: &str,
        operation_result: Option<&str>,
        profit_percentage: Option<f64>,
        stake_value: Option<f64>,
    ) -> StoreResult<i64> {
        let result = sqlx::query(
            r#"INSERT INTO bot_operation_logs
                (bot_id, timestamp, operation_result, profit_percentage, stake_value)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
        )
        .bind(bot_id)
        .bind(timestamp)
        .bind(operation_result)
        .bind(profit_percentage)
        .bind(stake_value)
        .execute(self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }
}
