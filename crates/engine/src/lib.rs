//! Deriv leverage radar engine
//!
//! Reads bot operation logs, recognises outcome patterns and publishes
//! "safe to operate" signals through a per-bot gating state machine.
//! Provides:
//! - Log store gateway over Supabase or SQLite
//! - Pattern registry (LLL trigger, micro burst, precision surge, quantum matrix)
//! - Gating state machine and signal publisher with retries
//! - Per-bot pollers and the `run_radar` orchestration

pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod gateway;
pub mod history;
pub mod patterns;
pub mod poller;
pub mod profile;
pub mod publisher;
pub mod types;

// Re-exports for convenience
pub use config::{BackendConfig, ProfileDefaults, RadarConfig};
pub use context::RadarContext;
pub use error::{RadarError, RadarResult};
pub use gate::{GateConfig, GateInput, GatePhase, GateState, Transition};
pub use gateway::{FetchedWindow, LogStore, LogStoreGateway, ProfileSource, SignalSink};
pub use history::TranslatedHistory;
pub use patterns::{
    default_definitions, PatternDefinition, PatternHit, PatternMatcher, PatternRegistry,
    PatternRule,
};
pub use poller::{
    load_profiles, run_radar, BotPoller, BotSelection, BotSnapshot, CycleReport, RadarProgress,
    RadarStatus, RadarSummary,
};
pub use profile::{BotProfile, ProfileOverrides};
pub use publisher::{PublishReport, RetryPolicy, SignalPublisher};
pub use types::*;
