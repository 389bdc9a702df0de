//! Radar configuration
//!
//! Credentials and defaults come from the environment (a `.env` file is loaded
//! by the binary before this runs). Per-bot tunables live in
//! `bot_configurations` and are resolved in [`crate::profile`].

use crate::error::{RadarError, RadarResult};
use persistence::schema::DEFAULT_LOG_TABLE;
use std::path::PathBuf;

pub const DEFAULT_WINDOW_SIZE: u32 = 20;
pub const DEFAULT_COOLDOWN_SECS: u64 = 600;
pub const DEFAULT_CONFIRMATION_SECS: u64 = 300;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MIN_HISTORY: usize = 3;

/// Where operation logs are read from and signals written to
#[derive(Debug, Clone, PartialEq)]
pub enum BackendConfig {
    Supabase {
        url: String,
        api_key: String,
        log_table: String,
    },
    Sqlite {
        path: PathBuf,
    },
}

/// Fallback tunables for bots whose profile leaves a column empty
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileDefaults {
    pub window_size: u32,
    pub cooldown_secs: u64,
    pub confirmation_secs: u64,
    pub poll_interval_secs: u64,
    pub min_history_required: usize,
    pub publish_insufficient_history: bool,
}

impl Default for ProfileDefaults {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            confirmation_secs: DEFAULT_CONFIRMATION_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            min_history_required: DEFAULT_MIN_HISTORY,
            publish_insufficient_history: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RadarConfig {
    pub backend: BackendConfig,
    pub defaults: ProfileDefaults,
}

impl RadarConfig {
    /// Read the process environment. `sqlite` (from the CLI) takes precedence
    /// over `RADAR_SQLITE_PATH`; either one selects the local backend.
    pub fn from_env(sqlite: Option<PathBuf>) -> RadarResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok(), sqlite)
    }

    pub fn from_lookup<F>(lookup: F, sqlite: Option<PathBuf>) -> RadarResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let sqlite = sqlite.or_else(|| non_empty("RADAR_SQLITE_PATH").map(PathBuf::from));
        let backend = match sqlite {
            Some(path) => BackendConfig::Sqlite { path },
            None => {
                let url = non_empty("SUPABASE_URL")
                    .ok_or_else(|| RadarError::Config("SUPABASE_URL is not set".into()))?;
                let api_key = non_empty("SUPABASE_KEY")
                    .or_else(|| non_empty("SUPABASE_ANON_KEY"))
                    .ok_or_else(|| {
                        RadarError::Config(
                            "neither SUPABASE_KEY nor SUPABASE_ANON_KEY is set".into(),
                        )
                    })?;
                let log_table =
                    non_empty("RADAR_LOG_TABLE").unwrap_or_else(|| DEFAULT_LOG_TABLE.to_string());
                BackendConfig::Supabase {
                    url,
                    api_key,
                    log_table,
                }
            }
        };

        let base = ProfileDefaults::default();
        let defaults = ProfileDefaults {
            window_size: parse_var(&non_empty, "RADAR_WINDOW_SIZE", base.window_size)?,
            cooldown_secs: parse_var(&non_empty, "RADAR_COOLDOWN_SECS", base.cooldown_secs)?,
            confirmation_secs: parse_var(
                &non_empty,
                "RADAR_CONFIRMATION_SECS",
                base.confirmation_secs,
            )?,
            poll_interval_secs: parse_var(
                &non_empty,
                "RADAR_POLL_INTERVAL_SECS",
                base.poll_interval_secs,
            )?,
            ..base
        };

        Ok(Self { backend, defaults })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> RadarResult<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| RadarError::Config(format!("{key} is not a valid number: {raw:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_supabase_requires_url_and_key() {
        let err = RadarConfig::from_lookup(lookup(&[("SUPABASE_KEY", "k")]), None).unwrap_err();
        assert!(matches!(err, RadarError::Config(_)));

        let err =
            RadarConfig::from_lookup(lookup(&[("SUPABASE_URL", "https://x.supabase.co")]), None)
                .unwrap_err();
        assert!(err.to_string().contains("SUPABASE_ANON_KEY"));
    }

    #[test]
    fn test_anon_key_is_accepted() {
        let config = RadarConfig::from_lookup(
            lookup(&[
                ("SUPABASE_URL", "https://x.supabase.co"),
                ("SUPABASE_ANON_KEY", "anon"),
                ("RADAR_LOG_TABLE", "tunder_bot_logs"),
            ]),
            None,
        )
        .unwrap();

        assert_eq!(
            config.backend,
            BackendConfig::Supabase {
                url: "https://x.supabase.co".into(),
                api_key: "anon".into(),
                log_table: "tunder_bot_logs".into(),
            }
        );
        assert_eq!(config.defaults, ProfileDefaults::default());
    }

    #[test]
    fn test_sqlite_backend_skips_credentials() {
        let config = RadarConfig::from_lookup(
            lookup(&[("RADAR_COOLDOWN_SECS", "30")]),
            Some(PathBuf::from("data/radar.db")),
        )
        .unwrap();

        assert_eq!(
            config.backend,
            BackendConfig::Sqlite {
                path: PathBuf::from("data/radar.db")
            }
        );
        assert_eq!(config.defaults.cooldown_secs, 30);
    }

    #[test]
    fn test_invalid_numbers_are_config_errors() {
        let err = RadarConfig::from_lookup(
            lookup(&[("RADAR_SQLITE_PATH", "radar.db"), ("RADAR_WINDOW_SIZE", "many")]),
            None,
        )
        .unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("RADAR_WINDOW_SIZE"));
    }
}
