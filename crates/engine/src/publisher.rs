//! Signal publisher
//!
//! Appends one row per decision to the signal stream, then refreshes the
//! latest-per-bot projection. Every attempt for a cycle carries the same
//! `cycle_id`, so a retry after an ambiguous failure cannot duplicate a row.

use crate::error::{RadarError, RadarResult};
use crate::gateway::SignalSink;
use crate::types::SignalRecord;
use persistence::StoreResult;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

const CANCEL_CHECK_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Sleep before each retry; its length is the number of retries
    pub backoff: Vec<Duration>,
    /// Upper bound for a single backend call
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: vec![
                Duration::from_millis(100),
                Duration::from_millis(400),
                Duration::from_millis(1600),
            ],
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Same attempt count as the default, without the sleeps
    pub fn immediate() -> Self {
        Self {
            backoff: vec![Duration::ZERO; 3],
            call_timeout: Duration::from_secs(1),
        }
    }

    /// A single attempt, no retry
    pub fn no_retry() -> Self {
        Self {
            backoff: Vec::new(),
            call_timeout: Duration::from_secs(1),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.backoff.len() + 1
    }
}

/// Outcome of a successful publication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    /// Append attempts used, 1 when the first one succeeded
    pub attempts: usize,
    /// False when the projection could not be refreshed
    pub latest_upserted: bool,
}

#[derive(Clone)]
pub struct SignalPublisher {
    sink: Arc<dyn SignalSink>,
    policy: RetryPolicy,
}

impl SignalPublisher {
    pub fn new(sink: Arc<dyn SignalSink>, policy: RetryPolicy) -> Self {
        Self { sink, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Publish `record`. An error means nothing reached the stream as far as
    /// this process can tell and the caller must not advance its state.
    pub async fn publish(
        &self,
        record: &SignalRecord,
        cancelled: &AtomicBool,
    ) -> RadarResult<PublishReport> {
        let row = record.to_row();

        let attempts = self
            .with_retries("append", &row.cycle_id, cancelled, || self.sink.append(&row))
            .await
            .map_err(RadarError::Publish)?;

        let latest_upserted = match self
            .with_retries("upsert_latest", &row.cycle_id, cancelled, || {
                self.sink.upsert_latest(&row)
            })
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    bot = %row.bot_name,
                    cycle_id = %row.cycle_id,
                    error = %e,
                    "Signal appended but latest projection not refreshed"
                );
                false
            }
        };

        debug!(
            bot = %row.bot_name,
            cycle_id = %row.cycle_id,
            safe = row.is_safe_to_operate,
            attempts,
            "Signal published"
        );

        Ok(PublishReport {
            attempts,
            latest_upserted,
        })
    }

    /// Run `call` until it succeeds or the policy is exhausted; returns the
    /// number of attempts used
    async fn with_retries<F, Fut>(
        &self,
        operation: &str,
        cycle_id: &str,
        cancelled: &AtomicBool,
        mut call: F,
    ) -> Result<usize, String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<()>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match tokio::time::timeout(self.policy.call_timeout, call()).await {
                Ok(Ok(())) => return Ok(attempt),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("timed out after {:?}", self.policy.call_timeout)
                }
            }

            let Some(delay) = self.policy.backoff.get(attempt - 1).copied() else {
                break;
            };
            warn!(
                operation,
                cycle_id,
                attempt,
                max_attempts,
                error = %last_error,
                "Signal write failed, retrying"
            );
            if !sleep_unless_cancelled(delay, cancelled, CANCEL_CHECK_SLICE).await {
                return Err(format!(
                    "{operation} abandoned on shutdown after {attempt} attempt(s): {last_error}"
                ));
            }
        }

        Err(format!(
            "{operation} failed after {max_attempts} attempt(s): {last_error}"
        ))
    }
}

/// Sleep for `total` in `slice` steps; false if `cancelled` was raised
pub(crate) async fn sleep_unless_cancelled(
    total: Duration,
    cancelled: &AtomicBool,
    slice: Duration,
) -> bool {
    let mut remaining = total;
    loop {
        if cancelled.load(Ordering::Relaxed) {
            return false;
        }
        if remaining.is_zero() {
            return true;
        }
        let step = remaining.min(slice);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalDraft;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use persistence::repository::SignalRow;
    use persistence::StoreError;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Fails the first `append_failures` appends and every upsert when
    /// `upsert_fails` is set
    #[derive(Default)]
    struct FlakySink {
        append_failures: usize,
        upsert_fails: bool,
        append_calls: Mutex<Vec<String>>,
        stored: Mutex<Vec<SignalRow>>,
        latest: Mutex<Option<SignalRow>>,
    }

    #[async_trait]
    impl SignalSink for FlakySink {
        async fn append(&self, row: &SignalRow) -> StoreResult<()> {
            let mut calls = self.append_calls.lock().unwrap();
            calls.push(row.cycle_id.clone());
            if calls.len() <= self.append_failures {
                return Err(StoreError::Status {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            self.stored.lock().unwrap().push(row.clone());
            Ok(())
        }

        async fn upsert_latest(&self, row: &SignalRow) -> StoreResult<()> {
            if self.upsert_fails {
                return Err(StoreError::Transport("connection reset".into()));
            }
            *self.latest.lock().unwrap() = Some(row.clone());
            Ok(())
        }
    }

    fn record() -> SignalRecord {
        SignalRecord::new(
            SignalDraft::blocked("cooldown"),
            "Tunder Bot",
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            Uuid::new_v4(),
        )
    }

    #[tokio::test]
    async fn test_retries_reuse_cycle_id() {
        let sink = Arc::new(FlakySink {
            append_failures: 2,
            ..Default::default()
        });
        let publisher = SignalPublisher::new(sink.clone(), RetryPolicy::immediate());
        let record = record();

        let report = publisher
            .publish(&record, &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(report.attempts, 3);
        assert!(report.latest_upserted);
        let calls = sink.append_calls.lock().unwrap();
        assert!(calls.iter().all(|id| *id == record.cycle_id.to_string()));
        assert_eq!(sink.stored.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_is_publish_error() {
        let sink = Arc::new(FlakySink {
            append_failures: 10,
            ..Default::default()
        });
        let publisher = SignalPublisher::new(sink.clone(), RetryPolicy::immediate());

        let err = publisher
            .publish(&record(), &AtomicBool::new(false))
            .await
            .unwrap_err();

        assert!(matches!(err, RadarError::Publish(_)));
        assert!(!err.is_fatal());
        assert_eq!(sink.append_calls.lock().unwrap().len(), 4);
        assert!(sink.latest.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_upsert_is_partial_success() {
        let sink = Arc::new(FlakySink {
            upsert_fails: true,
            ..Default::default()
        });
        let publisher = SignalPublisher::new(sink.clone(), RetryPolicy::immediate());

        let report = publisher
            .publish(&record(), &AtomicBool::new(false))
            .await
            .unwrap();

        assert_eq!(report.attempts, 1);
        assert!(!report.latest_upserted);
        assert_eq!(sink.stored.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_abandons_retries() {
        let sink = Arc::new(FlakySink {
            append_failures: 10,
            ..Default::default()
        });
        let publisher = SignalPublisher::new(sink.clone(), RetryPolicy::default());

        let err = publisher
            .publish(&record(), &AtomicBool::new(true))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("shutdown"));
        assert_eq!(sink.append_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sleep_unless_cancelled() {
        let flag = AtomicBool::new(false);
        assert!(sleep_unless_cancelled(Duration::from_millis(5), &flag, CANCEL_CHECK_SLICE).await);
        flag.store(true, Ordering::Relaxed);
        assert!(!sleep_unless_cancelled(Duration::from_secs(60), &flag, CANCEL_CHECK_SLICE).await);
    }
}
