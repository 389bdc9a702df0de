//! Log store gateway: read-only view over the operation log
//!
//! Storage traits implemented by both persistence backends, and the gateway
//! that turns raw rows into [`OperationRecord`]s. This is the only place that
//! knows the storage code `'V'` means a win.

use crate::error::{RadarError, RadarResult};
use crate::types::{OperationRecord, Outcome};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use persistence::repository::{
    BotConfigRepository, BotConfigRow, OperationLogRepository, OperationLogRow, OperationWindow,
    SignalRepository, SignalRow,
};
use persistence::{Database, StoreResult, SupabaseClient, MAX_WINDOW};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Storage traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Newest-first rows with a non-null result
    async fn fetch_recent_rows(&self, bot_id: &str, limit: u32) -> StoreResult<OperationWindow>;
}

#[async_trait]
pub trait SignalSink: Send + Sync {
    /// Append to the signal stream; must be idempotent per cycle_id
    async fn append(&self, row: &SignalRow) -> StoreResult<()>;
    /// Replace the latest-per-bot projection row
    async fn upsert_latest(&self, row: &SignalRow) -> StoreResult<()>;
}

#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn list_profiles(&self) -> StoreResult<Vec<BotConfigRow>>;
    async fn get_profile(&self, id: &str) -> StoreResult<Option<BotConfigRow>>;
}

#[async_trait]
impl LogStore for SupabaseClient {
    async fn fetch_recent_rows(&self, bot_id: &str, limit: u32) -> StoreResult<OperationWindow> {
        self.fetch_recent_operations(bot_id, limit).await
    }
}

#[async_trait]
impl SignalSink for SupabaseClient {
    async fn append(&self, row: &SignalRow) -> StoreResult<()> {
        self.append_signal(row).await
    }

    async fn upsert_latest(&self, row: &SignalRow) -> StoreResult<()> {
        self.upsert_latest_signal(row).await
    }
}

#[async_trait]
impl ProfileSource for SupabaseClient {
    async fn list_profiles(&self) -> StoreResult<Vec<BotConfigRow>> {
        self.list_bots().await
    }

    async fn get_profile(&self, id: &str) -> StoreResult<Option<BotConfigRow>> {
        self.get_bot(id).await
    }
}

#[async_trait]
impl LogStore for Database {
    async fn fetch_recent_rows(&self, bot_id: &str, limit: u32) -> StoreResult<OperationWindow> {
        let rows = OperationLogRepository::new(self.pool())
            .fetch_recent(bot_id, limit)
            .await?;
        Ok(OperationWindow {
            rows,
            undecodable: 0,
        })
    }
}

#[async_trait]
impl SignalSink for Database {
    async fn append(&self, row: &SignalRow) -> StoreResult<()> {
        let inserted = SignalRepository::new(self.pool()).append(row).await?;
        if !inserted {
            debug!(cycle_id = %row.cycle_id, "Signal already recorded for this cycle");
        }
        Ok(())
    }

    async fn upsert_latest(&self, row: &SignalRow) -> StoreResult<()> {
        SignalRepository::new(self.pool()).upsert_latest(row).await
    }
}

#[async_trait]
impl ProfileSource for Database {
    async fn list_profiles(&self) -> StoreResult<Vec<BotConfigRow>> {
        BotConfigRepository::new(self.pool()).list().await
    }

    async fn get_profile(&self, id: &str) -> StoreResult<Option<BotConfigRow>> {
        BotConfigRepository::new(self.pool()).get(id).await
    }
}

// ---------------------------------------------------------------------------
// Normalisation
// ---------------------------------------------------------------------------

/// `'V'` (any case, surrounding blanks ignored) is a win, any other value a
/// loss, null is excluded.
pub fn normalize_result(raw: Option<&str>) -> Option<Outcome> {
    raw.map(|code| {
        if code.trim().eq_ignore_ascii_case("V") {
            Outcome::Win
        } else {
            Outcome::Loss
        }
    })
}

/// RFC 3339, or a naive `YYYY-MM-DD[T ]HH:MM:SS[.f]` read as UTC
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    // Postgres `timestamptz` text form: "2024-05-01 10:00:00+00"
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Ok(ts.with_timezone(&Utc));
    }
    Err(format!("unparseable timestamp {raw:?}"))
}

fn to_decimal(value: Option<f64>) -> Option<Decimal> {
    value.and_then(|v| Decimal::try_from(v).ok())
}

/// Ok(None) for a null result, Err for a row that cannot be interpreted
pub fn normalize_row(row: &OperationLogRow) -> RadarResult<Option<OperationRecord>> {
    let Some(result) = normalize_result(row.operation_result.as_deref()) else {
        return Ok(None);
    };
    let raw_ts = row.timestamp.as_deref().ok_or_else(|| RadarError::Data {
        row_id: row.id,
        message: "missing timestamp".into(),
    })?;
    let timestamp = parse_timestamp(raw_ts).map_err(|message| RadarError::Data {
        row_id: row.id,
        message,
    })?;

    Ok(Some(OperationRecord {
        id: row.id,
        bot_id: row.bot_id.clone(),
        timestamp,
        result,
        stake: to_decimal(row.stake_value),
        profit_percentage: to_decimal(row.profit_percentage),
    }))
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// A point-in-time window for one bot
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedWindow {
    /// Newest first
    pub records: Vec<OperationRecord>,
    pub insufficient_history: bool,
    /// Rows dropped as malformed
    pub skipped_rows: usize,
}

#[derive(Clone)]
pub struct LogStoreGateway {
    store: Arc<dyn LogStore>,
    call_timeout: Duration,
}

impl LogStoreGateway {
    pub fn new(store: Arc<dyn LogStore>, call_timeout: Duration) -> Self {
        Self {
            store,
            call_timeout,
        }
    }

    /// The `k` most recent operations of `bot_id` (k is capped at 100).
    /// An empty window is not an error.
    pub async fn fetch_recent(
        &self,
        bot_id: &str,
        k: u32,
        min_history_required: usize,
    ) -> RadarResult<FetchedWindow> {
        let limit = k.min(MAX_WINDOW);
        let fetched = tokio::time::timeout(self.call_timeout, self.store.fetch_recent_rows(bot_id, limit))
            .await
            .map_err(|_| {
                RadarError::Fetch(format!(
                    "operation log query timed out after {:?}",
                    self.call_timeout
                ))
            })?
            .map_err(|e| RadarError::Fetch(e.to_string()))?;

        let mut records = Vec::with_capacity(fetched.rows.len());
        let mut skipped_rows = fetched.undecodable;
        if fetched.undecodable > 0 {
            warn!(bot_id, count = fetched.undecodable, "Skipping undecodable operation rows");
        }
        for row in fetched.rows.iter().take(limit as usize) {
            match normalize_row(row) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    skipped_rows += 1;
                    warn!(bot_id, kind = e.kind(), error = %e, "Skipping malformed operation row");
                }
            }
        }
        // Backends already order; keep the contract even if one does not
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));

        Ok(FetchedWindow {
            insufficient_history: records.len() < min_history_required,
            records,
            skipped_rows,
        })
    }
}
