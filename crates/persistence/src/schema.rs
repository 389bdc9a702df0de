//! Database schema definitions
//!
//! Mirrors the Supabase tables the radar reads and writes so a local SQLite
//! file can stand in for the hosted backend.

/// SQL to create all tables
/// NOTE: assertivity is stored as TEXT to preserve rust_decimal::Decimal precision
pub const CREATE_TABLES: &str = r#"
-- Operation outcomes written by the bot runners (read-only for the radar)
CREATE TABLE IF NOT EXISTS bot_operation_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bot_id TEXT NOT NULL,
    timestamp TEXT,
    operation_result TEXT,
    profit_percentage REAL,
    stake_value REAL
);

-- Bot profiles, tunable columns are optional
CREATE TABLE IF NOT EXISTS bot_configurations (
    id TEXT PRIMARY KEY,
    bot_name TEXT NOT NULL,
    status TEXT,
    is_active INTEGER,
    window_size INTEGER,
    cooldown_secs INTEGER,
    confirmation_secs INTEGER,
    poll_interval_secs INTEGER,
    min_history_required INTEGER,
    enabled_patterns TEXT,
    publish_insufficient_history INTEGER
);

-- Append-only signal stream
CREATE TABLE IF NOT EXISTS radar_de_apalancamiento_signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    bot_name TEXT NOT NULL,
    is_safe_to_operate INTEGER NOT NULL,
    reason TEXT NOT NULL,
    matched_pattern TEXT,
    assertivity TEXT,
    created_at TEXT NOT NULL,
    cycle_id TEXT NOT NULL UNIQUE
);

-- Latest signal per bot (projection of the stream above)
CREATE TABLE IF NOT EXISTS radar_de_apalancamiento_latest_signals (
    bot_name TEXT PRIMARY KEY,
    is_safe_to_operate INTEGER NOT NULL,
    reason TEXT NOT NULL,
    matched_pattern TEXT,
    assertivity TEXT,
    created_at TEXT NOT NULL,
    cycle_id TEXT NOT NULL
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_operation_logs_bot_ts ON bot_operation_logs(bot_id, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_signals_bot ON radar_de_apalancamiento_signals(bot_name, created_at DESC)
"#;

pub const SIGNALS_TABLE: &str = "radar_de_apalancamiento_signals";
pub const LATEST_SIGNALS_TABLE: &str = "radar_de_apalancamiento_latest_signals";
pub const BOT_CONFIGURATIONS_TABLE: &str = "bot_configurations";
pub const DEFAULT_LOG_TABLE: &str = "bot_operation_logs";

/// Split a schema script into executable statements. Comment lines are
/// dropped before splitting so a `;` inside a comment never cuts a statement.
pub fn statements(script: &str) -> Vec<String> {
    let code = script
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    code.split(';')
        .map(str::trim)
        .filter(|sql| !sql.is_empty())
        .map(str::to_string)
        .collect()
}
