//! Bot poller: drives one bot's cycle at a fixed cadence
//!
//! One cycle is fetch, translate, match, step the gate, publish if the gate
//! decided to. Each bot runs in its own task and owns its [`GateState`]; the
//! only thing tasks share is the [`RadarContext`].

use crate::context::RadarContext;
use crate::error::{RadarError, RadarResult};
use crate::gate::{GateConfig, GateInput, GatePhase, GateState};
use crate::gateway::LogStoreGateway;
use crate::history::TranslatedHistory;
use crate::profile::{BotProfile, ProfileOverrides};
use crate::publisher::{sleep_unless_cancelled, SignalPublisher};
use crate::types::{OpMarker, SignalRecord};
use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};
use persistence::repository::BotConfigRow;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Granularity of the cancel check while sleeping between cycles
const POLL_SLICE: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RadarStatus {
    Idle,
    Running,
    Stopped,
}

/// Last known state of one bot, for observation only
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotSnapshot {
    pub bot_id: String,
    pub bot_name: String,
    pub phase: GatePhase,
    pub cycles: u64,
    pub signals_published: u64,
    pub last_safe: Option<bool>,
    pub last_reason: Option<String>,
    pub last_error: Option<String>,
    /// The poller stopped on a fatal error
    pub failed: bool,
}

/// Shared progress and cancel flag (same shape as the watcher progress)
pub struct RadarProgress {
    pub status: RwLock<RadarStatus>,
    pub cancelled: AtomicBool,
    bots: RwLock<BTreeMap<String, BotSnapshot>>,
}

impl RadarProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(RadarStatus::Idle),
            cancelled: AtomicBool::new(false),
            bots: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> RadarStatus {
        *self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: RadarStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub fn snapshot(&self, bot_id: &str) -> Option<BotSnapshot> {
        self.bots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(bot_id)
            .cloned()
    }

    pub fn snapshots(&self) -> Vec<BotSnapshot> {
        self.bots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn register(&self, profile: &BotProfile) {
        self.bots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                profile.bot_id.clone(),
                BotSnapshot {
                    bot_id: profile.bot_id.clone(),
                    bot_name: profile.bot_name.clone(),
                    phase: GatePhase::Idle,
                    cycles: 0,
                    signals_published: 0,
                    last_safe: None,
                    last_reason: None,
                    last_error: None,
                    failed: false,
                },
            );
    }

    fn update(&self, bot_id: &str, f: impl FnOnce(&mut BotSnapshot)) {
        if let Some(snapshot) = self
            .bots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(bot_id)
        {
            f(snapshot);
        }
    }

    fn record_cycle(&self, bot_id: &str, report: &CycleReport) {
        self.update(bot_id, |s| {
            s.phase = report.phase_after;
            s.cycles += 1;
            s.last_error = None;
            if let Some(signal) = &report.published {
                s.signals_published += 1;
                s.last_safe = Some(signal.is_safe_to_operate);
                s.last_reason = Some(signal.reason.clone());
            }
        });
    }

    fn record_error(&self, bot_id: &str, err: &RadarError) {
        self.update(bot_id, |s| {
            s.cycles += 1;
            s.last_error = Some(err.to_string());
            s.failed = err.is_fatal();
        });
    }
}

impl Default for RadarProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Bot poller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub phase_before: GatePhase,
    pub phase_after: GatePhase,
    /// The signal written this cycle, if the gate decided to publish
    pub published: Option<SignalRecord>,
    pub latest_upserted: bool,
    pub window_len: usize,
    pub skipped_rows: usize,
}

pub struct BotPoller {
    profile: BotProfile,
    gate_config: GateConfig,
    gate: GateState,
    gateway: LogStoreGateway,
    publisher: SignalPublisher,
    ctx: RadarContext,
    last_signal_at: Option<DateTime<Utc>>,
}

impl BotPoller {
    /// A fresh poller always starts IDLE
    pub fn new(profile: BotProfile, ctx: &RadarContext) -> RadarResult<Self> {
        let gate_config = GateConfig::from_profile(&profile)?;
        ctx.progress.register(&profile);
        Ok(Self {
            gate_config,
            gate: GateState::idle(),
            gateway: LogStoreGateway::new(ctx.log_store.clone(), ctx.retry.call_timeout),
            publisher: SignalPublisher::new(ctx.signal_sink.clone(), ctx.retry.clone()),
            ctx: ctx.clone(),
            profile,
            last_signal_at: None,
        })
    }

    pub fn profile(&self) -> &BotProfile {
        &self.profile
    }

    pub fn gate(&self) -> &GateState {
        &self.gate
    }

    pub async fn run_cycle(&mut self) -> RadarResult<CycleReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle as of `now`. On error the gate is left untouched.
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) -> RadarResult<CycleReport> {
        let cycle_id = Uuid::new_v4();
        let phase_before = self.gate.phase();
        let bot = self.profile.bot_name.as_str();

        let window = self
            .gateway
            .fetch_recent(
                &self.profile.bot_id,
                self.profile.window_size,
                self.profile.min_history_required,
            )
            .await?;

        // Patterns only matter while IDLE
        let winner = if phase_before == GatePhase::Idle && !window.insufficient_history {
            let history = TranslatedHistory::from_records(&window.records);
            debug!(bot, head = %history.symbols(10), "Evaluating patterns");
            self.ctx
                .registry
                .select(&history, &self.profile.enabled_patterns)
        } else {
            None
        };

        let input = GateInput {
            newest: window.records.first().map(OpMarker::from),
            insufficient_history: window.insufficient_history,
            winner,
            now,
        };
        let transition = self.gate.step(&input, &self.gate_config)?;

        let mut published = None;
        let mut latest_upserted = false;
        if let Some(draft) = transition.decision {
            let timestamp = self.next_signal_time(now);
            let record = SignalRecord::new(draft, bot, timestamp, cycle_id);
            let report = self
                .publisher
                .publish(&record, &self.ctx.progress.cancelled)
                .await?;
            info!(
                bot,
                cycle_id = %cycle_id,
                safe = record.is_safe_to_operate,
                pattern = record.matched_pattern.as_deref().unwrap_or("-"),
                reason = %record.reason,
                "Signal published"
            );
            self.last_signal_at = Some(timestamp);
            latest_upserted = report.latest_upserted;
            published = Some(record);
        }

        // Commit only now that the decision (if any) is stored
        self.gate = transition.next;
        let phase_after = self.gate.phase();
        if phase_after != phase_before {
            info!(
                bot,
                from = phase_before.label(),
                to = phase_after.label(),
                "Gate transition"
            );
        }

        let report = CycleReport {
            cycle_id,
            phase_before,
            phase_after,
            published,
            latest_upserted,
            window_len: window.records.len(),
            skipped_rows: window.skipped_rows,
        };
        self.ctx.progress.record_cycle(&self.profile.bot_id, &report);
        Ok(report)
    }

    /// Signal timestamps for a bot are strictly increasing, even if the wall
    /// clock steps back
    fn next_signal_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let now = now.trunc_subsecs(6);
        match self.last_signal_at {
            Some(previous) if now <= previous => previous + ChronoDuration::microseconds(1),
            _ => now,
        }
    }

    /// Cycle every `T_poll` until cancelled. Transient errors are logged and
    /// retried next tick; a fatal error stops this bot only.
    pub async fn run(&mut self) -> RadarResult<()> {
        info!(
            bot = %self.profile.bot_name,
            bot_id = %self.profile.bot_id,
            poll_interval_secs = self.profile.poll_interval_secs,
            window_size = self.profile.window_size,
            "Bot poller starting"
        );

        loop {
            if self.ctx.progress.is_cancelled() {
                break;
            }

            let started = Instant::now();
            self.tick().await?;

            let wait = self.profile.poll_interval().saturating_sub(started.elapsed());
            if !sleep_unless_cancelled(wait, &self.ctx.progress.cancelled, POLL_SLICE).await {
                break;
            }
        }

        info!(bot = %self.profile.bot_name, "Bot poller stopped");
        Ok(())
    }

    /// A single cycle with the same error handling as [`BotPoller::run`]
    /// One cycle with no next tick to recover in, so any failure is returned
    pub async fn run_once(&mut self) -> RadarResult<()> {
        if let Err(e) = self.run_cycle().await {
            error!(
                bot = %self.profile.bot_name,
                kind = e.kind(),
                error = %e,
                "Single cycle failed"
            );
            self.ctx.progress.record_error(&self.profile.bot_id, &e);
            self.ctx.progress.update(&self.profile.bot_id, |s| s.failed = true);
            return Err(e);
        }
        Ok(())
    }

    async fn tick(&mut self) -> RadarResult<()> {
        match self.run_cycle().await {
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => {
                error!(
                    bot = %self.profile.bot_name,
                    kind = e.kind(),
                    error = %e,
                    "Bot poller stopping on fatal error"
                );
                self.ctx.progress.record_error(&self.profile.bot_id, &e);
                Err(e)
            }
            Err(e) => {
                warn!(
                    bot = %self.profile.bot_name,
                    kind = e.kind(),
                    error = %e,
                    "Cycle aborted, retrying next tick"
                );
                self.ctx.progress.record_error(&self.profile.bot_id, &e);
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum BotSelection {
    /// Every profile with `is_active` and `status = running`
    All,
    /// Explicit ids; each must exist
    Ids(Vec<String>),
}

#[derive(Debug, Default)]
pub struct RadarSummary {
    /// Bot ids that were polled
    pub bots: Vec<String>,
    /// Bots whose poller stopped on a fatal error
    pub failures: Vec<(String, RadarError)>,
}

impl RadarSummary {
    /// Every poller died; the process has nothing left to do
    pub fn all_failed(&self) -> bool {
        !self.bots.is_empty() && self.failures.len() == self.bots.len()
    }
}

/// Resolve the selection into validated profiles
pub async fn load_profiles(
    ctx: &RadarContext,
    selection: &BotSelection,
    overrides: &ProfileOverrides,
) -> RadarResult<Vec<BotProfile>> {
    let timeout = ctx.retry.call_timeout;
    let timed_out = |_: tokio::time::error::Elapsed| RadarError::Fetch(format!("profile query timed out after {timeout:?}"));

    let rows: Vec<BotConfigRow> = match selection {
        BotSelection::All => tokio::time::timeout(timeout, ctx.profiles.list_profiles())
            .await
            .map_err(timed_out)?
            .map_err(|e| RadarError::Fetch(e.to_string()))?
            .into_iter()
            .filter(BotConfigRow::is_running)
            .collect(),
        BotSelection::Ids(ids) => {
            let mut rows = Vec::with_capacity(ids.len());
            for id in ids {
                if rows.iter().any(|r: &BotConfigRow| &r.id == id) {
                    continue;
                }
                let row = tokio::time::timeout(timeout, ctx.profiles.get_profile(id))
                    .await
                    .map_err(timed_out)?
                    .map_err(|e| RadarError::Fetch(e.to_string()))?
                    .ok_or_else(|| RadarError::Config(format!("unknown bot id {id}")))?;
                if !row.is_running() {
                    warn!(bot_id = %id, bot = %row.bot_name, "Bot is not marked running, polling it anyway");
                }
                rows.push(row);
            }
            rows
        }
    };

    rows.iter()
        .map(|row| BotProfile::from_row(row, &ctx.defaults, overrides, &ctx.registry))
        .collect()
}

/// Load profiles, spawn one poller per bot and wait for all of them.
/// With `once` every bot runs a single cycle.
pub async fn run_radar(
    ctx: &RadarContext,
    selection: &BotSelection,
    overrides: &ProfileOverrides,
    once: bool,
) -> RadarResult<RadarSummary> {
    let profiles = load_profiles(ctx, selection, overrides).await?;
    if profiles.is_empty() {
        warn!("No bots selected, nothing to poll");
        return Ok(RadarSummary::default());
    }

    // Build every poller before spawning so a bad profile starts nothing
    let pollers = profiles
        .into_iter()
        .map(|profile| BotPoller::new(profile, ctx))
        .collect::<RadarResult<Vec<_>>>()?;

    info!(bots = pollers.len(), once, "Radar starting");
    ctx.progress.set_status(RadarStatus::Running);

    let mut handles = Vec::with_capacity(pollers.len());
    for mut poller in pollers {
        let bot_id = poller.profile().bot_id.clone();
        let handle = tokio::spawn(async move {
            if once {
                poller.run_once().await
            } else {
                poller.run().await
            }
        });
        handles.push((bot_id, handle));
    }

    let mut summary = RadarSummary::default();
    for (bot_id, handle) in handles {
        let outcome = match handle.await {
            Ok(result) => result,
            Err(e) => Err(RadarError::InternalAssertion(format!("poller task failed: {e}"))),
        };
        if let Err(e) = outcome {
            summary.failures.push((bot_id.clone(), e));
        }
        summary.bots.push(bot_id);
    }

    ctx.progress.set_status(RadarStatus::Stopped);
    info!(
        bots = summary.bots.len(),
        failed = summary.failures.len(),
        "Radar stopped"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProfileDefaults;
    use crate::gate::{REASON_CONFIRMATION_TIMEOUT, REASON_COOLDOWN};
    use crate::gateway::SignalSink;
    use crate::patterns::{LLL_TRIGGER, REASON_INSUFFICIENT_HISTORY};
    use crate::publisher::RetryPolicy;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use persistence::repository::{
        BotConfigRepository, OperationLogRepository, SignalRepository, SignalRow,
    };
    use persistence::{Database, StoreError, StoreResult};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    const BOT_ID: &str = "7";
    const BOT_NAME: &str = "Tunder Bot";

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + ChronoDuration::seconds(secs)
    }

    fn bot_row(id: &str, name: &str, status: &str) -> BotConfigRow {
        BotConfigRow {
            id: id.into(),
            bot_name: name.into(),
            status: Some(status.into()),
            is_active: Some(true),
            ..Default::default()
        }
    }

    async fn fixture() -> (Arc<Database>, RadarContext) {
        let db = Arc::new(Database::in_memory().await.unwrap());
        BotConfigRepository::new(db.pool())
            .save(&bot_row(BOT_ID, BOT_NAME, "running"))
            .await
            .unwrap();
        let ctx = RadarContext::with_backend(db.clone(), ProfileDefaults::default())
            .with_retry(RetryPolicy::immediate());
        (db, ctx)
    }

    /// Append results oldest first, one minute apart
    async fn push_ops(db: &Database, first_minute: u32, results: &str) {
        let repo = OperationLogRepository::new(db.pool());
        for (i, code) in results.chars().enumerate() {
            let ts = format!("2024-05-01T09:{:02}:00Z", first_minute + i as u32);
            let code = code.to_string();
            repo.insert(BOT_ID, &ts, Some(code.as_str()), Some(95.0), Some(0.35))
                .await
                .unwrap();
        }
    }

    async fn poller(ctx: &RadarContext) -> BotPoller {
        let profiles = load_profiles(
            ctx,
            &BotSelection::Ids(vec![BOT_ID.into()]),
            &ProfileOverrides::default(),
        )
        .await
        .unwrap();
        BotPoller::new(profiles.into_iter().next().unwrap(), ctx).unwrap()
    }

    async fn signals(db: &Database) -> Vec<SignalRow> {
        SignalRepository::new(db.pool())
            .history(BOT_NAME, 100)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_full_gate_cycle_through_storage() {
        let (db, ctx) = fixture().await;
        // Newest first this reads L L L W W
        push_ops(&db, 0, "VVDDD").await;
        let mut poller = poller(&ctx).await;

        let armed = poller.run_cycle_at(t(0)).await.unwrap();
        assert_eq!(armed.phase_after, GatePhase::Armed);
        let signal = armed.published.unwrap();
        assert!(signal.is_safe_to_operate);
        assert_eq!(signal.matched_pattern.as_deref(), Some(LLL_TRIGGER));
        assert!(signal.reason.contains("LLL"));

        let confirming = poller.run_cycle_at(t(5)).await.unwrap();
        assert_eq!(confirming.phase_after, GatePhase::InConfirmation);
        assert!(confirming.published.is_none());

        push_ops(&db, 5, "V").await;
        let cooling = poller.run_cycle_at(t(10)).await.unwrap();
        assert_eq!(cooling.phase_after, GatePhase::Cooldown);
        let signal = cooling.published.unwrap();
        assert!(!signal.is_safe_to_operate);
        assert_eq!(signal.reason, REASON_COOLDOWN);

        let still = poller.run_cycle_at(t(300)).await.unwrap();
        assert_eq!(still.phase_after, GatePhase::Cooldown);
        assert_eq!(still.published.unwrap().reason, REASON_COOLDOWN);

        push_ops(&db, 6, "DDD").await;
        let expired = poller.run_cycle_at(t(610)).await.unwrap();
        assert_eq!(expired.phase_after, GatePhase::Idle);
        assert!(expired.published.is_none());

        let rearmed = poller.run_cycle_at(t(615)).await.unwrap();
        assert_eq!(rearmed.phase_after, GatePhase::Armed);
        assert!(rearmed.published.unwrap().is_safe_to_operate);

        let stream = signals(&db).await;
        let flags: Vec<bool> = stream.iter().map(|s| s.is_safe_to_operate).collect();
        assert_eq!(flags, vec![true, false, false, true]);
        let created: Vec<&str> = stream.iter().map(|s| s.created_at.as_str()).collect();
        assert!(created.windows(2).all(|w| w[0] < w[1]));

        let latest = SignalRepository::new(db.pool())
            .latest(BOT_NAME)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest, *stream.last().unwrap());

        let snapshot = ctx.progress.snapshot(BOT_ID).unwrap();
        assert_eq!(snapshot.phase, GatePhase::Armed);
        assert_eq!(snapshot.signals_published, 4);
        assert_eq!(snapshot.cycles, 6);
    }

    #[tokio::test]
    async fn test_same_window_twice_only_advances_armed() {
        let (db, ctx) = fixture().await;
        push_ops(&db, 0, "VVDDD").await;
        let mut poller = poller(&ctx).await;

        poller.run_cycle_at(t(0)).await.unwrap();
        let second = poller.run_cycle_at(t(1)).await.unwrap();
        let third = poller.run_cycle_at(t(2)).await.unwrap();

        assert_eq!(second.phase_after, GatePhase::InConfirmation);
        assert_eq!(third.phase_after, GatePhase::InConfirmation);
        assert!(second.published.is_none() && third.published.is_none());
        assert_eq!(signals(&db).await.len(), 1);
    }

    #[tokio::test]
    async fn test_confirmation_timeout_enters_cooldown() {
        let (db, ctx) = fixture().await;
        push_ops(&db, 0, "VVDDD").await;
        let mut poller = poller(&ctx).await;

        poller.run_cycle_at(t(0)).await.unwrap();
        poller.run_cycle_at(t(5)).await.unwrap();
        let report = poller.run_cycle_at(t(300)).await.unwrap();

        assert_eq!(report.phase_after, GatePhase::Cooldown);
        assert_eq!(report.published.unwrap().reason, REASON_CONFIRMATION_TIMEOUT);
    }

    #[tokio::test]
    async fn test_insufficient_history_policy() {
        let (db, ctx) = fixture().await;
        push_ops(&db, 0, "DD").await;

        let mut silent = poller(&ctx).await;
        let report = silent.run_cycle_at(t(0)).await.unwrap();
        assert_eq!(report.phase_after, GatePhase::Idle);
        assert!(report.published.is_none());
        assert!(signals(&db).await.is_empty());

        let mut row = bot_row(BOT_ID, BOT_NAME, "running");
        row.publish_insufficient_history = Some(true);
        BotConfigRepository::new(db.pool()).save(&row).await.unwrap();

        let mut loud = poller(&ctx).await;
        let report = loud.run_cycle_at(t(5)).await.unwrap();
        let signal = report.published.unwrap();
        assert!(!signal.is_safe_to_operate);
        assert_eq!(signal.reason, REASON_INSUFFICIENT_HISTORY);
        assert_eq!(report.phase_after, GatePhase::Idle);
    }

    #[tokio::test]
    async fn test_malformed_rows_are_skipped() {
        let (db, ctx) = fixture().await;
        push_ops(&db, 0, "VVDD").await;
        OperationLogRepository::new(db.pool())
            .insert(BOT_ID, "not a timestamp", Some("D"), None, None)
            .await
            .unwrap();
        let mut poller = poller(&ctx).await;

        let report = poller.run_cycle_at(t(0)).await.unwrap();
        assert_eq!(report.skipped_rows, 1);
        assert_eq!(report.window_len, 4);
    }

    /// Fails the first `failures` appends, then delegates to the database
    struct FailingSink {
        failures: usize,
        calls: AtomicUsize,
        inner: Arc<Database>,
    }

    #[async_trait]
    impl SignalSink for FailingSink {
        async fn append(&self, row: &SignalRow) -> StoreResult<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(StoreError::Status {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            self.inner.append(row).await
        }

        async fn upsert_latest(&self, row: &SignalRow) -> StoreResult<()> {
            self.inner.upsert_latest(row).await
        }
    }

    #[tokio::test]
    async fn test_publish_failure_leaves_gate_unchanged() {
        let (db, base) = fixture().await;
        push_ops(&db, 0, "VVDDD").await;
        let sink = Arc::new(FailingSink {
            failures: 3,
            calls: AtomicUsize::new(0),
            inner: db.clone(),
        });
        let ctx = RadarContext::new(db.clone(), sink, db.clone(), ProfileDefaults::default())
            .with_retry(RetryPolicy::no_retry());
        let mut poller = BotPoller::new(poller(&base).await.profile().clone(), &ctx).unwrap();

        for secs in 0..3 {
            let err = poller.run_cycle_at(t(secs)).await.unwrap_err();
            assert!(matches!(err, RadarError::Publish(_)));
            assert_eq!(poller.gate().phase(), GatePhase::Idle);
        }

        let report = poller.run_cycle_at(t(3)).await.unwrap();
        assert_eq!(report.phase_after, GatePhase::Armed);

        let stream = signals(&db).await;
        assert_eq!(stream.len(), 1);
        assert!(stream[0].is_safe_to_operate);
        assert_eq!(stream[0].cycle_id, report.cycle_id.to_string());
    }

    #[tokio::test]
    async fn test_signal_time_is_strictly_increasing() {
        let (db, ctx) = fixture().await;
        push_ops(&db, 0, "VVDDD").await;
        let mut poller = poller(&ctx).await;

        poller.run_cycle_at(t(0)).await.unwrap();
        poller.run_cycle_at(t(1)).await.unwrap();
        push_ops(&db, 5, "V").await;
        // Clock stepped back a minute
        let report = poller.run_cycle_at(t(-60)).await.unwrap();

        let published = report.published.unwrap();
        assert_eq!(published.timestamp, t(0) + ChronoDuration::microseconds(1));
    }

    #[tokio::test]
    async fn test_unknown_bot_is_config_error() {
        let (_db, ctx) = fixture().await;
        let err = run_radar(
            &ctx,
            &BotSelection::Ids(vec!["404".into()]),
            &ProfileOverrides::default(),
            true,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RadarError::Config(_)));
        assert_eq!(err.kind(), "ConfigError");
    }

    #[tokio::test]
    async fn test_run_once_all_selects_running_bots() {
        let (db, ctx) = fixture().await;
        BotConfigRepository::new(db.pool())
            .save(&bot_row("8", "Parked Bot", "stopped"))
            .await
            .unwrap();
        push_ops(&db, 0, "VVDDD").await;

        let summary = run_radar(&ctx, &BotSelection::All, &ProfileOverrides::default(), true)
            .await
            .unwrap();

        assert_eq!(summary.bots, vec![BOT_ID.to_string()]);
        assert!(summary.failures.is_empty());
        assert!(!summary.all_failed());
        assert_eq!(signals(&db).await.len(), 1);
        assert_eq!(ctx.progress.status(), RadarStatus::Stopped);
    }

    #[tokio::test]
    async fn test_run_once_reports_transient_failure() {
        let (db, base) = fixture().await;
        push_ops(&db, 0, "VVDDD").await;
        let sink = Arc::new(FailingSink {
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
            inner: db.clone(),
        });
        let ctx = RadarContext::new(db.clone(), sink, db.clone(), base.defaults.clone())
            .with_retry(RetryPolicy::no_retry());

        let summary = run_radar(
            &ctx,
            &BotSelection::Ids(vec![BOT_ID.into()]),
            &ProfileOverrides::default(),
            true,
        )
        .await
        .unwrap();

        assert_eq!(summary.failures.len(), 1);
        assert!(matches!(summary.failures[0].1, RadarError::Publish(_)));
        assert!(summary.all_failed());
        let snapshot = ctx.progress.snapshot(BOT_ID).unwrap();
        assert!(snapshot.failed);
        assert!(signals(&db).await.is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (db, ctx) = fixture().await;
        push_ops(&db, 0, "VVDDD").await;

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.shutdown();
        });

        let overrides = ProfileOverrides {
            poll_interval_secs: Some(1),
            window_size: None,
        };
        let summary = run_radar(
            &ctx,
            &BotSelection::Ids(vec![BOT_ID.into()]),
            &overrides,
            false,
        )
        .await
        .unwrap();

        assert!(summary.failures.is_empty());
        let snapshot = ctx.progress.snapshot(BOT_ID).unwrap();
        assert!(snapshot.cycles >= 1);
        assert_eq!(snapshot.last_safe, Some(true));
    }
}
