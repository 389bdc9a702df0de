//! Signal repository: append-only stream plus the latest-per-bot projection

use crate::StoreResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// One published radar decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct SignalRow {
    pub bot_name: String,
    pub is_safe_to_operate: bool,
    pub reason: String,
    pub matched_pattern: Option<String>,
    /// Decimal rendered as text
    #[serde(default, deserialize_with = "crate::scalar_text")]
    pub assertivity: Option<String>,
    /// RFC 3339 instant
    pub created_at: String,
    pub cycle_id: String,
}

/// Repository for radar signals
pub struct SignalRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SignalRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append to the stream (INSERT OR IGNORE on cycle_id).
    /// Returns false when the cycle was already recorded.
    pub async fn append(&self, row: &SignalRow) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO radar_de_apalancamiento_signals
                (bot_name, is_safe_to_operate, reason, matched_pattern, assertivity,
                 created_at, cycle_id)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
        )
        .bind(&row.bot_name)
        .bind(row.is_safe_to_operate)
        .bind(&row.reason)
        .bind(&row.matched_pattern)
        .bind(&row.assertivity)
        .bind(&row.created_at)
        .bind(&row.cycle_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Insert or replace the latest signal for this bot_name
    pub async fn upsert_latest(&self, row: &SignalRow) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO radar_de_apalancamiento_latest_signals
                (bot_name, is_safe_to_operate, reason, matched_pattern, assertivity,
                 created_at, cycle_id)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT(bot_name) DO UPDATE SET
                 is_safe_to_operate = excluded.is_safe_to_operate,
                 reason = excluded.reason,
                 matched_pattern = excluded.matched_pattern,
                 assertivity = excluded.assertivity,
                 created_at = excluded.created_at,
                 cycle_id = excluded.cycle_id
            "#,
        )
        .bind(&row.bot_name)
        .bind(row.is_safe_to_operate)
        .bind(&row.reason)
        .bind(&row.matched_pattern)
        .bind(&row.assertivity)
        .bind(&row.created_at)
        .bind(&row.cycle_id)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Latest projection row for a bot
    pub async fn latest(&self, bot_name: &str) -> StoreResult<Option<SignalRow>> {
        let record = sqlx::query_as::<_, SignalRow>(
            r#"SELECT bot_name, is_safe_to_operate, reason, matched_pattern, assertivity,
                      created_at, cycle_id
               FROM radar_de_apalancamiento_latest_signals
               WHERE bot_name = ?1"#,
        )
        .bind(bot_name)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// Stream rows for a bot in publication order
    pub async fn history(&self, bot_name: &str, limit: u32) -> StoreResult<Vec<SignalRow>> {
        let records = sqlx::query_as::<_, SignalRow>(
            r#"SELECT bot_name, is_safe_to_operate, reason, matched_pattern, assertivity,
                      created_at, cycle_id
               FROM radar_de_apalancamiento_signals
               WHERE bot_name = ?1
               ORDER BY id ASC
               LIMIT ?2"#,
        )
        .bind(bot_name)
        .bind(limit as i64)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }
}
