//! Domain types for the radar core

use chrono::{DateTime, SecondsFormat, Utc};
use persistence::repository::SignalRow;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum stored length of a signal reason
pub const MAX_REASON_CHARS: usize = 256;

/// Outcome of one contract as seen by the radar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Win,
    Loss,
}

impl Outcome {
    pub fn symbol(&self) -> char {
        match self {
            Outcome::Win => 'W',
            Outcome::Loss => 'L',
        }
    }
}

/// One operation from the bot runners' log, already normalised
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRecord {
    pub id: i64,
    pub bot_id: String,
    pub timestamp: DateTime<Utc>,
    pub result: Outcome,
    /// Informational only
    pub stake: Option<Decimal>,
    /// Informational only
    pub profit_percentage: Option<Decimal>,
}

/// Identity of the newest operation seen in a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpMarker {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
}

impl OpMarker {
    /// Strictly greater id or strictly later timestamp
    pub fn is_newer_than(&self, other: &OpMarker) -> bool {
        self.id > other.id || self.timestamp > other.timestamp
    }
}

impl From<&OperationRecord> for OpMarker {
    fn from(record: &OperationRecord) -> Self {
        Self {
            id: record.id,
            timestamp: record.timestamp,
        }
    }
}

/// Decision content before it is stamped with a cycle and a time
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDraft {
    pub is_safe_to_operate: bool,
    pub reason: String,
    pub matched_pattern: Option<String>,
    pub assertivity: Option<Decimal>,
}

impl SignalDraft {
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            is_safe_to_operate: false,
            reason: reason.into(),
            matched_pattern: None,
            assertivity: None,
        }
    }
}

/// A published radar decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalRecord {
    pub bot_name: String,
    pub is_safe_to_operate: bool,
    pub reason: String,
    pub matched_pattern: Option<String>,
    pub assertivity: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
    pub cycle_id: Uuid,
}

impl SignalRecord {
    pub fn new(draft: SignalDraft, bot_name: &str, timestamp: DateTime<Utc>, cycle_id: Uuid) -> Self {
        Self {
            bot_name: bot_name.to_string(),
            is_safe_to_operate: draft.is_safe_to_operate,
            reason: truncate_reason(&draft.reason),
            matched_pattern: draft.matched_pattern,
            assertivity: draft.assertivity,
            timestamp,
            cycle_id,
        }
    }

    pub fn to_row(&self) -> SignalRow {
        SignalRow {
            bot_name: self.bot_name.clone(),
            is_safe_to_operate: self.is_safe_to_operate,
            reason: self.reason.clone(),
            matched_pattern: self.matched_pattern.clone(),
            assertivity: self.assertivity.map(|a| a.to_string()),
            created_at: self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            cycle_id: self.cycle_id.to_string(),
        }
    }
}

fn truncate_reason(reason: &str) -> String {
    reason.chars().take(MAX_REASON_CHARS).collect()
}
