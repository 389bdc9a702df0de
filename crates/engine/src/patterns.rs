//! Pattern matchers for the radar
//!
//! Each pattern is a value: an id, a published assertivity, a rule with its
//! parameters and a reason template. Registering a new pattern means adding a
//! `PatternDefinition`, not writing a new type.
//!
//! When several enabled patterns fire in the same cycle the one with the
//! highest assertivity wins; equal assertivity falls back to registration
//! order.

use crate::history::TranslatedHistory;
use crate::types::{Outcome, SignalDraft};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

pub const LLL_TRIGGER: &str = "LLL_TRIGGER";
pub const MICRO_BURST: &str = "MICRO_BURST";
pub const PRECISION_SURGE: &str = "PRECISION_SURGE";
pub const QUANTUM_MATRIX: &str = "QUANTUM_MATRIX";

pub const REASON_INSUFFICIENT_HISTORY: &str = "insufficient_history";

/// How many outcomes of the head are rendered into a reason
const SYMBOLS_IN_REASON: usize = 10;

// ============================================================================
// Core trait
// ============================================================================

/// Result of evaluating one pattern against a window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub hit: bool,
    pub reason: String,
}

impl MatchResult {
    fn miss(reason: impl Into<String>) -> Self {
        Self {
            hit: false,
            reason: reason.into(),
        }
    }

    fn insufficient() -> Self {
        Self::miss(REASON_INSUFFICIENT_HISTORY)
    }
}

/// Predicate capability shared by every pattern
pub trait PatternMatcher: Send + Sync {
    fn id(&self) -> &str;
    fn display_name(&self) -> &str;
    fn assertivity(&self) -> Decimal;
    /// Shortest window the pattern can judge
    fn min_history(&self) -> usize;
    fn evaluate(&self, history: &TranslatedHistory) -> MatchResult;
}

// ============================================================================
// Rules
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PatternRule {
    /// The `length` most recent outcomes are all LOSS
    LossRun { length: usize },
    /// At least `wins` WINs among the last `of_last`, most recent is WIN
    MicroBurst { wins: usize, of_last: usize },
    /// Head win streak >= `min_streak` and win rate over `lookback` >= `min_win_rate`
    PrecisionSurge {
        min_streak: usize,
        lookback: usize,
        min_win_rate: f64,
    },
    /// Alternating WIN/LOSS run of at least `min_length` from the head, head is WIN
    Alternating { min_length: usize },
}

enum RuleOutcome {
    Insufficient,
    Miss(String),
    /// Placeholder values for the reason template
    Hit(Vec<(&'static str, String)>),
}

impl PatternRule {
    pub fn min_history(&self) -> usize {
        match self {
            PatternRule::LossRun { length } => *length,
            PatternRule::MicroBurst { of_last, .. } => *of_last,
            PatternRule::PrecisionSurge {
                min_streak,
                lookback,
                ..
            } => (*lookback).max(*min_streak),
            PatternRule::Alternating { min_length } => *min_length,
        }
    }

    fn apply(&self, h: &TranslatedHistory) -> RuleOutcome {
        if h.len() < self.min_history() {
            return RuleOutcome::Insufficient;
        }
        let symbols = h.symbols(SYMBOLS_IN_REASON);

        match *self {
            PatternRule::LossRun { length } => {
                if h.current_loss_streak >= length {
                    RuleOutcome::Hit(vec![
                        ("length", length.to_string()),
                        ("symbols", symbols),
                    ])
                } else {
                    RuleOutcome::Miss(format!(
                        "loss streak {} < {}",
                        h.current_loss_streak, length
                    ))
                }
            }
            PatternRule::MicroBurst { wins, of_last } => {
                let got = h.wins_in_last(of_last);
                if h.latest() != Some(Outcome::Win) {
                    RuleOutcome::Miss("latest outcome is not WIN".into())
                } else if got < wins {
                    RuleOutcome::Miss(format!("{got} wins in last {of_last} < {wins}"))
                } else {
                    RuleOutcome::Hit(vec![
                        ("wins", got.to_string()),
                        ("of_last", of_last.to_string()),
                        ("symbols", symbols),
                    ])
                }
            }
            PatternRule::PrecisionSurge {
                min_streak,
                lookback,
                min_win_rate,
            } => {
                // min_history() guarantees the lookback is available
                let rate = h.win_rate_over(lookback).unwrap_or(0.0);
                if h.current_win_streak < min_streak {
                    RuleOutcome::Miss(format!(
                        "win streak {} < {}",
                        h.current_win_streak, min_streak
                    ))
                } else if rate < min_win_rate {
                    RuleOutcome::Miss(format!(
                        "win rate {:.2} over last {} < {:.2}",
                        rate, lookback, min_win_rate
                    ))
                } else {
                    RuleOutcome::Hit(vec![
                        ("streak", h.current_win_streak.to_string()),
                        ("win_rate", format!("{rate:.2}")),
                        ("lookback", lookback.to_string()),
                    ])
                }
            }
            PatternRule::Alternating { min_length } => {
                let run = h.alternating_run();
                if h.latest() != Some(Outcome::Win) {
                    RuleOutcome::Miss("latest outcome is not WIN".into())
                } else if run < min_length {
                    RuleOutcome::Miss(format!("alternating run {run} < {min_length}"))
                } else {
                    RuleOutcome::Hit(vec![("run", run.to_string()), ("symbols", symbols)])
                }
            }
        }
    }
}

// ============================================================================
// Definitions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternDefinition {
    pub id: String,
    pub display_name: String,
    /// Published confidence; only used to break ties
    pub assertivity: Decimal,
    pub rule: PatternRule,
    /// `{name}` placeholders are filled from the rule's hit values
    pub reason_template: String,
}

impl PatternDefinition {
    pub fn new(
        id: &str,
        display_name: &str,
        assertivity: Decimal,
        rule: PatternRule,
        reason_template: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            assertivity,
            rule,
            reason_template: reason_template.to_string(),
        }
    }

    fn render(&self, values: &[(&'static str, String)]) -> String {
        let body = values.iter().fold(self.reason_template.clone(), |acc, (key, value)| {
            acc.replace(&format!("{{{key}}}"), value)
        });
        format!("{}: {}", self.display_name, body)
    }
}

impl PatternMatcher for PatternDefinition {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn assertivity(&self) -> Decimal {
        self.assertivity
    }

    fn min_history(&self) -> usize {
        self.rule.min_history()
    }

    fn evaluate(&self, history: &TranslatedHistory) -> MatchResult {
        match self.rule.apply(history) {
            RuleOutcome::Insufficient => MatchResult::insufficient(),
            RuleOutcome::Miss(why) => MatchResult::miss(why),
            RuleOutcome::Hit(values) => MatchResult {
                hit: true,
                reason: self.render(&values),
            },
        }
    }
}

/// The four patterns every radar ships with, in registration order
pub fn default_definitions() -> Vec<PatternDefinition> {
    vec![
        PatternDefinition::new(
            LLL_TRIGGER,
            "LLL Trigger",
            dec!(0.915),
            PatternRule::LossRun { length: 3 },
            "LLL, {length} consecutive losses at the head ({symbols})",
        ),
        PatternDefinition::new(
            MICRO_BURST,
            "Micro Burst",
            dec!(0.955),
            PatternRule::MicroBurst {
                wins: 5,
                of_last: 6,
            },
            "{wins} wins in the last {of_last}, latest WIN ({symbols})",
        ),
        PatternDefinition::new(
            PRECISION_SURGE,
            "Precision Surge",
            dec!(0.935),
            PatternRule::PrecisionSurge {
                min_streak: 2,
                lookback: 20,
                min_win_rate: 0.80,
            },
            "win streak {streak}, win rate {win_rate} over the last {lookback}",
        ),
        PatternDefinition::new(
            QUANTUM_MATRIX,
            "Quantum Matrix",
            dec!(0.915),
            PatternRule::Alternating { min_length: 4 },
            "alternating run of {run} ending in WIN ({symbols})",
        ),
    ]
}

// ============================================================================
// Registry
// ============================================================================

/// The winning pattern of a cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternHit {
    pub id: String,
    pub display_name: String,
    pub assertivity: Decimal,
    pub reason: String,
}

impl PatternHit {
    pub fn to_draft(&self) -> SignalDraft {
        SignalDraft {
            is_safe_to_operate: true,
            reason: self.reason.clone(),
            matched_pattern: Some(self.id.clone()),
            assertivity: Some(self.assertivity),
        }
    }
}

/// Immutable set of matchers, shared read-only by every bot poller
pub struct PatternRegistry {
    matchers: Vec<Box<dyn PatternMatcher>>,
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::from_definitions(default_definitions())
    }
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self {
            matchers: Vec::new(),
        }
    }

    pub fn from_definitions(definitions: Vec<PatternDefinition>) -> Self {
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(Box::new(definition));
        }
        registry
    }

    /// Append a matcher; a duplicate id replaces nothing and is ignored
    pub fn register(&mut self, matcher: Box<dyn PatternMatcher>) -> bool {
        if self.contains(matcher.id()) {
            return false;
        }
        self.matchers.push(matcher);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.matchers.iter().any(|m| m.id() == id)
    }

    pub fn get(&self, id: &str) -> Option<&dyn PatternMatcher> {
        self.matchers.iter().find(|m| m.id() == id).map(|m| m.as_ref())
    }

    /// Ids in registration order
    pub fn ids(&self) -> Vec<String> {
        self.matchers.iter().map(|m| m.id().to_string()).collect()
    }

    pub fn matchers(&self) -> impl Iterator<Item = &dyn PatternMatcher> {
        self.matchers.iter().map(|m| m.as_ref())
    }

    /// Evaluate the enabled matchers in registration order
    pub fn evaluate_all(
        &self,
        history: &TranslatedHistory,
        enabled: &[String],
    ) -> Vec<(String, MatchResult)> {
        self.matchers
            .iter()
            .filter(|m| enabled.iter().any(|id| id == m.id()))
            .map(|m| (m.id().to_string(), m.evaluate(history)))
            .collect()
    }

    /// Pick at most one winner among the enabled matchers
    pub fn select(&self, history: &TranslatedHistory, enabled: &[String]) -> Option<PatternHit> {
        let mut best: Option<PatternHit> = None;

        for matcher in self
            .matchers
            .iter()
            .filter(|m| enabled.iter().any(|id| id == m.id()))
        {
            let result = matcher.evaluate(history);
            if !result.hit {
                continue;
            }
            // Strictly greater: earlier registration keeps equal scores
            let better = best
                .as_ref()
                .map_or(true, |b| matcher.assertivity() > b.assertivity);
            if better {
                best = Some(PatternHit {
                    id: matcher.id().to_string(),
                    display_name: matcher.display_name().to_string(),
                    assertivity: matcher.assertivity(),
                    reason: result.reason,
                });
            }
        }

        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outcome::{Loss as L, Win as W};

    fn history(outcomes: &[Outcome]) -> TranslatedHistory {
        TranslatedHistory::from_outcomes(outcomes.to_vec())
    }

    fn all_ids() -> Vec<String> {
        PatternRegistry::default().ids()
    }

    fn definition(id: &str) -> PatternDefinition {
        default_definitions()
            .into_iter()
            .find(|d| d.id == id)
            .unwrap()
    }

    /// WWW LLL WWWW followed by wins, 17 of 20 wins
    fn surge_window() -> Vec<Outcome> {
        let mut v = vec![W, W, W, L, L, L, W, W, W, W];
        v.extend(std::iter::repeat(W).take(10));
        v
    }

    #[test]
    fn test_lll_trigger() {
        let lll = definition(LLL_TRIGGER);
        let hit = lll.evaluate(&history(&[L, L, L, W, W]));
        assert!(hit.hit);
        assert!(hit.reason.contains("LLL"));

        assert!(!lll.evaluate(&history(&[L, L, W, L, L])).hit);
        assert_eq!(
            lll.evaluate(&history(&[L, L])).reason,
            REASON_INSUFFICIENT_HISTORY
        );
    }

    #[test]
    fn test_micro_burst() {
        let burst = definition(MICRO_BURST);
        assert!(burst.evaluate(&history(&[W, W, L, W, W, W, L])).hit);
        // five of six but latest is a loss
        assert!(!burst.evaluate(&history(&[L, W, W, W, W, W])).hit);
        assert!(!burst.evaluate(&history(&[W, W, L, L, W, W])).hit);
        assert!(!burst.evaluate(&history(&[W, W, W, W, W])).hit);
    }

    #[test]
    fn test_precision_surge() {
        let surge = definition(PRECISION_SURGE);
        assert!(surge.evaluate(&history(&surge_window())).hit);

        // streak of one
        let mut single = surge_window();
        single[1] = L;
        assert!(!surge.evaluate(&history(&single)).hit);

        // 15 of 20 wins
        let mut weak = surge_window();
        weak[10] = L;
        weak[11] = L;
        assert!(!surge.evaluate(&history(&weak)).hit);

        assert_eq!(
            surge.evaluate(&history(&[W; 19])).reason,
            REASON_INSUFFICIENT_HISTORY
        );
    }

    #[test]
    fn test_quantum_matrix() {
        let quantum = definition(QUANTUM_MATRIX);
        assert!(quantum.evaluate(&history(&[W, L, W, L])).hit);
        assert!(quantum.evaluate(&history(&[W, L, W, L, W, W])).hit);
        assert!(!quantum.evaluate(&history(&[L, W, L, W, L])).hit);
        assert!(!quantum.evaluate(&history(&[W, L, W, W])).hit);
        assert!(!quantum.evaluate(&history(&[W, L, W])).hit);
    }

    #[test]
    fn test_surge_window_selects_precision_surge() {
        let registry = PatternRegistry::default();
        let hit = registry.select(&history(&surge_window()), &all_ids()).unwrap();
        assert_eq!(hit.id, PRECISION_SURGE);
        assert_eq!(hit.assertivity, dec!(0.935));
    }

    #[test]
    fn test_higher_assertivity_wins_tie_break() {
        // Fires MICRO_BURST (0.955) and PRECISION_SURGE (0.935)
        let mut v = vec![W; 20];
        v[6] = L;
        v[12] = L;
        let registry = PatternRegistry::default();
        let results = registry.evaluate_all(&history(&v), &all_ids());
        let fired: Vec<&str> = results
            .iter()
            .filter(|(_, r)| r.hit)
            .map(|(id, _)| id.as_str())
            .collect();
        assert_eq!(fired, vec![MICRO_BURST, PRECISION_SURGE]);

        let hit = registry.select(&history(&v), &all_ids()).unwrap();
        assert_eq!(hit.id, MICRO_BURST);
    }

    #[test]
    fn test_equal_assertivity_uses_registration_order() {
        let registry = PatternRegistry::from_definitions(vec![
            PatternDefinition::new(
                "DOUBLE_LOSS",
                "Double Loss",
                dec!(0.9),
                PatternRule::LossRun { length: 2 },
                "{symbols}",
            ),
            PatternDefinition::new(
                "TRIPLE_LOSS",
                "Triple Loss",
                dec!(0.9),
                PatternRule::LossRun { length: 3 },
                "{symbols}",
            ),
        ]);
        let enabled = registry.ids();
        let h = history(&[L, L, L, W]);

        for _ in 0..3 {
            assert_eq!(registry.select(&h, &enabled).unwrap().id, "DOUBLE_LOSS");
        }
    }

    #[test]
    fn test_disabled_patterns_never_fire() {
        let registry = PatternRegistry::default();
        let enabled = vec![QUANTUM_MATRIX.to_string()];
        assert!(registry.select(&history(&[L, L, L, W, W]), &enabled).is_none());
    }

    #[test]
    fn test_hit_draft_carries_pattern() {
        let registry = PatternRegistry::default();
        let draft = registry
            .select(&history(&[L, L, L, W, W]), &all_ids())
            .unwrap()
            .to_draft();
        assert!(draft.is_safe_to_operate);
        assert_eq!(draft.matched_pattern.as_deref(), Some(LLL_TRIGGER));
        assert_eq!(
            draft.reason,
            "LLL Trigger: LLL, 3 consecutive losses at the head (LLLWW)"
        );
    }

    #[test]
    fn test_duplicate_registration_is_ignored() {
        let mut registry = PatternRegistry::default();
        assert!(!registry.register(Box::new(definition(LLL_TRIGGER))));
        assert_eq!(registry.ids().len(), 4);
        assert!(registry.get(MICRO_BURST).is_some());
    }
}
