//! Bot profiles: per-bot tunables resolved from `bot_configurations`

use crate::config::ProfileDefaults;
use crate::error::{RadarError, RadarResult};
use crate::patterns::PatternRegistry;
use persistence::repository::BotConfigRow;
use persistence::MAX_WINDOW;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

/// Upper bound for the cooldown, confirmation and poll timers (one week)
pub const MAX_TIMER_SECS: u64 = 7 * 24 * 60 * 60;

/// Values given on the command line; they win over the profile row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileOverrides {
    pub poll_interval_secs: Option<u64>,
    pub window_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotProfile {
    pub bot_id: String,
    pub bot_name: String,
    /// K, the number of most recent operations fetched per cycle
    pub window_size: u32,
    /// D
    pub cooldown_secs: u64,
    /// C
    pub confirmation_secs: u64,
    /// T_poll
    pub poll_interval_secs: u64,
    pub enabled_patterns: Vec<String>,
    pub min_history_required: usize,
    /// Publish `false / insufficient_history` instead of staying silent
    pub publish_insufficient_history: bool,
}

impl BotProfile {
    pub fn from_row(
        row: &BotConfigRow,
        defaults: &ProfileDefaults,
        overrides: &ProfileOverrides,
        registry: &PatternRegistry,
    ) -> RadarResult<Self> {
        let bot = &row.bot_name;

        let window_size = match overrides.window_size {
            Some(k) => k,
            None => non_negative(bot, "window_size", row.window_size)?
                .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
                .unwrap_or(defaults.window_size),
        };
        if window_size == 0 || window_size > MAX_WINDOW {
            return Err(RadarError::Config(format!(
                "bot {bot}: window_size must be between 1 and {MAX_WINDOW}, got {window_size}"
            )));
        }

        let poll_interval_secs = match overrides.poll_interval_secs {
            Some(secs) => secs,
            None => non_negative(bot, "poll_interval_secs", row.poll_interval_secs)?
                .unwrap_or(defaults.poll_interval_secs),
        };
        if poll_interval_secs == 0 {
            return Err(RadarError::Config(format!(
                "bot {bot}: poll interval must be at least one second"
            )));
        }

        let cooldown_secs = non_negative(bot, "cooldown_secs", row.cooldown_secs)?
            .unwrap_or(defaults.cooldown_secs);
        let confirmation_secs = non_negative(bot, "confirmation_secs", row.confirmation_secs)?
            .unwrap_or(defaults.confirmation_secs);
        for (name, secs) in [
            ("cooldown_secs", cooldown_secs),
            ("confirmation_secs", confirmation_secs),
            ("poll_interval_secs", poll_interval_secs),
        ] {
            if secs > MAX_TIMER_SECS {
                return Err(RadarError::Config(format!(
                    "bot {bot}: {name} must be at most {MAX_TIMER_SECS}, got {secs}"
                )));
            }
        }

        let min_history_required =
            match non_negative(bot, "min_history_required", row.min_history_required)? {
                Some(v) => usize::try_from(v).unwrap_or(usize::MAX),
                None => defaults.min_history_required,
            };
        if min_history_required > window_size as usize {
            return Err(RadarError::Config(format!(
                "bot {bot}: min_history_required ({min_history_required}) exceeds window_size ({window_size})"
            )));
        }

        let enabled_patterns = parse_enabled_patterns(bot, row.enabled_patterns.as_deref(), registry)?;
        for id in &enabled_patterns {
            if let Some(matcher) = registry.get(id) {
                if matcher.min_history() > window_size as usize {
                    warn!(
                        bot = %bot,
                        pattern = %id,
                        needs = matcher.min_history(),
                        window_size,
                        "Pattern needs more history than the window holds and can never match"
                    );
                }
            }
        }

        Ok(Self {
            bot_id: row.id.clone(),
            bot_name: row.bot_name.clone(),
            window_size,
            cooldown_secs,
            confirmation_secs,
            poll_interval_secs,
            enabled_patterns,
            min_history_required,
            publish_insufficient_history: row
                .publish_insufficient_history
                .unwrap_or(defaults.publish_insufficient_history),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

fn non_negative(bot: &str, column: &str, value: Option<i64>) -> RadarResult<Option<u64>> {
    match value {
        Some(v) if v < 0 => Err(RadarError::Config(format!(
            "bot {bot}: {column} cannot be negative ({v})"
        ))),
        Some(v) => Ok(Some(v as u64)),
        None => Ok(None),
    }
}

/// Comma-separated ids; empty or missing enables every registered pattern
fn parse_enabled_patterns(
    bot: &str,
    raw: Option<&str>,
    registry: &PatternRegistry,
) -> RadarResult<Vec<String>> {
    let ids: Vec<String> = raw
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();

    if ids.is_empty() {
        return Ok(registry.ids());
    }
    if let Some(unknown) = ids.iter().find(|id| !registry.contains(id)) {
        return Err(RadarError::Config(format!(
            "bot {bot}: unknown pattern id {unknown}"
        )));
    }
    Ok(ids)
}
