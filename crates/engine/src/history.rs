//! History translator: operation window to symbolic outcomes and statistics
//!
//! Pure and deterministic: no I/O, no clock. Index 0 is always the most recent
//! outcome.

use crate::types::{OperationRecord, Outcome};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub wins: usize,
    pub losses: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslatedHistory {
    outcomes: Vec<Outcome>,
    pub counts: OutcomeCounts,
    /// Win rate over the whole window (0.0 for an empty window)
    pub rolling_win_rate: f64,
    /// Consecutive losses at the head
    pub current_loss_streak: usize,
    /// Consecutive wins at the head
    pub current_win_streak: usize,
}

impl TranslatedHistory {
    /// Translate a reverse-chronological window
    pub fn from_records(records: &[OperationRecord]) -> Self {
        Self::from_outcomes(records.iter().map(|r| r.result).collect())
    }

    pub fn from_outcomes(outcomes: Vec<Outcome>) -> Self {
        let wins = outcomes.iter().filter(|o| **o == Outcome::Win).count();
        let losses = outcomes.len() - wins;
        let rolling_win_rate = if outcomes.is_empty() {
            0.0
        } else {
            wins as f64 / outcomes.len() as f64
        };

        let head_run = |target: Outcome| outcomes.iter().take_while(|o| **o == target).count();
        let current_win_streak = head_run(Outcome::Win);
        let current_loss_streak = head_run(Outcome::Loss);

        Self {
            counts: OutcomeCounts { wins, losses },
            rolling_win_rate,
            current_loss_streak,
            current_win_streak,
            outcomes,
        }
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn latest(&self) -> Option<Outcome> {
        self.outcomes.first().copied()
    }

    /// The `n` most recent outcomes (fewer if the window is shorter)
    pub fn head(&self, n: usize) -> &[Outcome] {
        &self.outcomes[..n.min(self.outcomes.len())]
    }

    /// Wins among the `n` most recent outcomes
    pub fn wins_in_last(&self, n: usize) -> usize {
        self.head(n).iter().filter(|o| **o == Outcome::Win).count()
    }

    /// Win rate over exactly the last `n` outcomes; None if fewer exist
    pub fn win_rate_over(&self, n: usize) -> Option<f64> {
        if n == 0 || self.outcomes.len() < n {
            return None;
        }
        Some(self.wins_in_last(n) as f64 / n as f64)
    }

    /// Length of the strictly alternating run starting at the head
    pub fn alternating_run(&self) -> usize {
        if self.outcomes.is_empty() {
            return 0;
        }
        1 + self
            .outcomes
            .windows(2)
            .take_while(|pair| pair[0] != pair[1])
            .count()
    }

    /// Compact rendering of the head, e.g. "LLLWW"
    pub fn symbols(&self, n: usize) -> String {
        self.head(n).iter().map(Outcome::symbol).collect()
    }
}
