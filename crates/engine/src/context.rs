//! Process-wide radar context
//!
//! Built once at startup and cloned into every bot task. It holds the backend
//! handles, the pattern registry and the shared cancel flag; nothing else is
//! global.

use crate::config::{BackendConfig, ProfileDefaults, RadarConfig};
use crate::error::{RadarError, RadarResult};
use crate::gateway::{LogStore, ProfileSource, SignalSink};
use crate::patterns::PatternRegistry;
use crate::poller::RadarProgress;
use crate::publisher::RetryPolicy;
use persistence::{Database, SupabaseClient};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct RadarContext {
    pub log_store: Arc<dyn LogStore>,
    pub signal_sink: Arc<dyn SignalSink>,
    pub profiles: Arc<dyn ProfileSource>,
    pub registry: Arc<PatternRegistry>,
    pub defaults: ProfileDefaults,
    pub retry: RetryPolicy,
    pub progress: Arc<RadarProgress>,
}

impl RadarContext {
    pub fn new(
        log_store: Arc<dyn LogStore>,
        signal_sink: Arc<dyn SignalSink>,
        profiles: Arc<dyn ProfileSource>,
        defaults: ProfileDefaults,
    ) -> Self {
        Self {
            log_store,
            signal_sink,
            profiles,
            registry: Arc::new(PatternRegistry::default()),
            defaults,
            retry: RetryPolicy::default(),
            progress: Arc::new(RadarProgress::new()),
        }
    }

    /// One backend serving logs, signals and profiles
    pub fn with_backend<B>(backend: Arc<B>, defaults: ProfileDefaults) -> Self
    where
        B: LogStore + SignalSink + ProfileSource + 'static,
    {
        Self::new(backend.clone(), backend.clone(), backend, defaults)
    }

    /// Open the backend named by `config`
    pub async fn connect(config: &RadarConfig) -> RadarResult<Self> {
        match &config.backend {
            BackendConfig::Supabase {
                url,
                api_key,
                log_table,
            } => {
                let client = SupabaseClient::new(url.as_str(), api_key.as_str(), log_table.as_str())
                    .map_err(|e| RadarError::Fetch(e.to_string()))?;
                info!(url = %url, log_table = %log_table, "Using Supabase backend");
                Ok(Self::with_backend(Arc::new(client), config.defaults.clone()))
            }
            BackendConfig::Sqlite { path } => {
                let db = Database::new(path).await.map_err(|e| {
                    RadarError::Fetch(format!("cannot open {}: {e}", path.display()))
                })?;
                info!(path = %path.display(), "Using SQLite backend");
                Ok(Self::with_backend(Arc::new(db), config.defaults.clone()))
            }
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Ask every poller to stop after its current cycle
    pub fn shutdown(&self) {
        self.progress.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.progress.is_cancelled()
    }
}
