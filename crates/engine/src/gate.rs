//! Gating state machine
//!
//! ```text
//!  IDLE --hit--> ARMED --next cycle--> IN_CONFIRMATION --new op / timeout--> COOLDOWN --D elapsed--> IDLE
//! ```
//!
//! `step` is pure: it computes the next state and the decision to publish but
//! does not commit anything. The poller commits a publishing transition only
//! after the publisher succeeded, so a failed write leaves the gate untouched.

use crate::error::{RadarError, RadarResult};
use crate::patterns::{PatternHit, REASON_INSUFFICIENT_HISTORY};
use crate::profile::BotProfile;
use crate::types::{OpMarker, SignalDraft};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub const REASON_COOLDOWN: &str = "cooldown";
pub const REASON_CONFIRMATION_TIMEOUT: &str = "cooldown: confirmation_timeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatePhase {
    Idle,
    Armed,
    InConfirmation,
    Cooldown,
}

impl GatePhase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Armed => "ARMED",
            Self::InConfirmation => "IN_CONFIRMATION",
            Self::Cooldown => "COOLDOWN",
        }
    }
}

/// Timing knobs of one bot's gate
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub cooldown: Duration,
    pub confirmation_window: Duration,
    pub publish_insufficient_history: bool,
}

impl GateConfig {
    pub fn from_profile(profile: &BotProfile) -> RadarResult<Self> {
        Ok(Self {
            cooldown: seconds(&profile.bot_name, "cooldown_secs", profile.cooldown_secs)?,
            confirmation_window: seconds(
                &profile.bot_name,
                "confirmation_secs",
                profile.confirmation_secs,
            )?,
            publish_insufficient_history: profile.publish_insufficient_history,
        })
    }
}

fn seconds(bot: &str, name: &str, secs: u64) -> RadarResult<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| RadarError::Config(format!("bot {bot}: {name} out of range ({secs})")))
}

/// What the gate sees in one cycle
#[derive(Debug, Clone)]
pub struct GateInput {
    /// Newest operation in the window, if any
    pub newest: Option<OpMarker>,
    pub insufficient_history: bool,
    /// Winning pattern of this cycle; only consulted while IDLE
    pub winner: Option<PatternHit>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: GateState,
    /// Signal to publish before `next` may be committed
    pub decision: Option<SignalDraft>,
}

/// Per-bot gate state, owned by exactly one poller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateState {
    phase: GatePhase,
    armed_pattern_id: Option<String>,
    /// Time of the latest arming; kept after the gate leaves ARMED
    armed_at: Option<DateTime<Utc>>,
    last_observed_op: Option<OpMarker>,
    cooldown_since: Option<DateTime<Utc>>,
}

impl Default for GateState {
    fn default() -> Self {
        Self::idle()
    }
}

impl GateState {
    /// Process start always resumes here
    pub fn idle() -> Self {
        Self {
            phase: GatePhase::Idle,
            armed_pattern_id: None,
            armed_at: None,
            last_observed_op: None,
            cooldown_since: None,
        }
    }

    pub fn phase(&self) -> GatePhase {
        self.phase
    }

    pub fn armed_pattern_id(&self) -> Option<&str> {
        self.armed_pattern_id.as_deref()
    }

    pub fn armed_at(&self) -> Option<DateTime<Utc>> {
        self.armed_at
    }

    pub fn last_observed_op(&self) -> Option<OpMarker> {
        self.last_observed_op
    }

    pub fn cooldown_since(&self) -> Option<DateTime<Utc>> {
        self.cooldown_since
    }

    /// Check the structural invariants of the current phase
    pub fn validate(&self) -> RadarResult<()> {
        let armed = matches!(self.phase, GatePhase::Armed | GatePhase::InConfirmation);
        if armed != self.armed_pattern_id.is_some() {
            return Err(RadarError::InternalAssertion(format!(
                "phase {} with armed_pattern_id {:?}",
                self.phase.label(),
                self.armed_pattern_id
            )));
        }
        if armed && self.armed_at.is_none() {
            return Err(RadarError::InternalAssertion(format!(
                "phase {} without armed_at",
                self.phase.label()
            )));
        }
        if self.phase == GatePhase::Cooldown && self.cooldown_since.is_none() {
            return Err(RadarError::InternalAssertion(
                "phase COOLDOWN without a start time".into(),
            ));
        }
        Ok(())
    }

    /// Compute the transition for one cycle
    pub fn step(&self, input: &GateInput, config: &GateConfig) -> RadarResult<Transition> {
        self.validate()?;

        match self.phase {
            GatePhase::Idle => Ok(self.step_idle(input, config)),
            GatePhase::Armed => Ok(Transition {
                next: Self {
                    phase: GatePhase::InConfirmation,
                    ..self.clone()
                },
                decision: None,
            }),
            GatePhase::InConfirmation => self.step_confirmation(input, config),
            GatePhase::Cooldown => self.step_cooldown(input, config),
        }
    }

    fn step_idle(&self, input: &GateInput, config: &GateConfig) -> Transition {
        if input.insufficient_history {
            return Transition {
                next: self.clone(),
                decision: config
                    .publish_insufficient_history
                    .then(|| SignalDraft::blocked(REASON_INSUFFICIENT_HISTORY)),
            };
        }

        let Some(hit) = &input.winner else {
            return Transition {
                next: self.clone(),
                decision: None,
            };
        };

        // armed_at must not move backwards even if the wall clock does
        let armed_at = match self.armed_at {
            Some(previous) if previous > input.now => previous,
            _ => input.now,
        };

        Transition {
            next: Self {
                phase: GatePhase::Armed,
                armed_pattern_id: Some(hit.id.clone()),
                armed_at: Some(armed_at),
                last_observed_op: input.newest,
                cooldown_since: None,
            },
            decision: Some(hit.to_draft()),
        }
    }

    fn step_confirmation(&self, input: &GateInput, config: &GateConfig) -> RadarResult<Transition> {
        let armed_at = self.armed_at.ok_or_else(|| {
            RadarError::InternalAssertion("IN_CONFIRMATION without armed_at".into())
        })?;

        let confirmed = match (input.newest, self.last_observed_op) {
            (Some(newest), Some(seen)) => newest.is_newer_than(&seen),
            (Some(_), None) => true,
            (None, _) => false,
        };

        let reason = if confirmed {
            REASON_COOLDOWN
        } else if input.now - armed_at >= config.confirmation_window {
            REASON_CONFIRMATION_TIMEOUT
        } else {
            return Ok(Transition {
                next: self.clone(),
                decision: None,
            });
        };

        Ok(Transition {
            next: Self {
                phase: GatePhase::Cooldown,
                armed_pattern_id: None,
                armed_at: self.armed_at,
                last_observed_op: input.newest.or(self.last_observed_op),
                cooldown_since: Some(input.now),
            },
            decision: Some(SignalDraft::blocked(reason)),
        })
    }

    fn step_cooldown(&self, input: &GateInput, config: &GateConfig) -> RadarResult<Transition> {
        let since = self.cooldown_since.ok_or_else(|| {
            RadarError::InternalAssertion("COOLDOWN without a start time".into())
        })?;

        if input.now - since >= config.cooldown {
            return Ok(Transition {
                next: Self {
                    phase: GatePhase::Idle,
                    armed_pattern_id: None,
                    armed_at: self.armed_at,
                    last_observed_op: input.newest.or(self.last_observed_op),
                    cooldown_since: None,
                },
                decision: None,
            });
        }

        Ok(Transition {
            next: self.clone(),
            decision: Some(SignalDraft::blocked(REASON_COOLDOWN)),
        })
    }
}
