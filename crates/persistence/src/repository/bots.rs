//! Bot configuration repository

use crate::StoreResult;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A `bot_configurations` row. Columns not listed here are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, FromRow)]
pub struct BotConfigRow {
    #[serde(deserialize_with = "crate::opaque_id")]
    pub id: String,
    pub bot_name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub window_size: Option<i64>,
    #[serde(default)]
    pub cooldown_secs: Option<i64>,
    #[serde(default)]
    pub confirmation_secs: Option<i64>,
    #[serde(default)]
    pub poll_interval_secs: Option<i64>,
    #[serde(default)]
    pub min_history_required: Option<i64>,
    /// Comma-separated pattern ids
    #[serde(default)]
    pub enabled_patterns: Option<String>,
    #[serde(default)]
    pub publish_insufficient_history: Option<bool>,
}

impl BotConfigRow {
    /// `is_active` and `status = running`
    pub fn is_running(&self) -> bool {
        self.is_active.unwrap_or(false)
            && self
                .status
                .as_deref()
                .map(|s| s.eq_ignore_ascii_case("running"))
                .unwrap_or(false)
    }
}

/// Repository for bot profiles
pub struct BotConfigRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> BotConfigRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> StoreResult<Vec<BotConfigRow>> {
        let records = sqlx::query_as::<_, BotConfigRow>(
            "SELECT * FROM bot_configurations ORDER BY bot_name ASC",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<BotConfigRow>> {
        let record =
            sqlx::query_as::<_, BotConfigRow>("SELECT * FROM bot_configurations WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.pool)
                .await?;

        Ok(record)
    }

    /// Insert or update a profile (upsert by id)
    pub async fn save(&self, row: &BotConfigRow) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO bot_configurations
                (id, bot_name, status, is_active, window_size, cooldown_secs,
                 confirmation_secs, poll_interval_secs, min_history_required,
                 enabled_patterns, publish_insufficient_history)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
               ON CONFLICT(id) DO UPDATE SET
                 bot_name = excluded.bot_name,
                 status = excluded.status,
                 is_active = excluded.is_active,
                 window_size = excluded.window_size,
                 cooldown_secs = excluded.cooldown_secs,
                 confirmation_secs = excluded.confirmation_secs,
                 poll_interval_secs = excluded.poll_interval_secs,
                 min_history_required = excluded.min_history_required,
                 enabled_patterns = excluded.enabled_patterns,
                 publish_insufficient_history = excluded.publish_insufficient_history
            "#,
        )
        .bind(&row.id)
        .bind(&row.bot_name)
        .bind(&row.status)
        .bind(row.is_active)
        .bind(row.window_size)
        .bind(row.cooldown_secs)
        .bind(row.confirmation_secs)
        .bind(row.poll_interval_secs)
        .bind(row.min_history_required)
        .bind(&row.enabled_patterns)
        .bind(row.publish_insufficient_history)
        .execute(self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn test_save_and_get_round_trip_with_optional_columns() {
        let db = Database::in_memory().await.unwrap();
        let repo = BotConfigRepository::new(db.pool());

        let row = BotConfigRow {
            id: "7".into(),
            bot_name: "Tunder Bot".into(),
            status: Some("running".into()),
            is_active: Some(true),
            cooldown_secs: Some(120),
            enabled_patterns: Some("LLL_TRIGGER,MICRO_BURST".into()),
            ..Default::default()
        };
        repo.save(&row).await.unwrap();

        let loaded = repo.get("7").await.unwrap().unwrap();
        assert_eq!(loaded.bot_name, "Tunder Bot");
        assert_eq!(loaded.cooldown_secs, Some(120));
        assert_eq!(loaded.window_size, None);
        assert!(loaded.is_running());
        assert!(repo.get("8").await.unwrap().is_none());
    }

    #[test]
    fn test_is_running_requires_both_flags() {
        let mut row = BotConfigRow {
            id: "1".into(),
            bot_name: "b".into(),
            status: Some("stopped".into()),
            is_active: Some(true),
            ..Default::default()
        };
        assert!(!row.is_running());
        row.status = Some("Running".into());
        assert!(row.is_running());
        row.is_active = None;
        assert!(!row.is_running());
    }
}
