//! Per-batch retry supervision: failure classification and bounded backoff.

use std::error::Error as StdError;
use std::time::Duration;

use rand::Rng;

use crate::error::{LoaderError, LoaderResult};
use crate::load::encode::{BatchSink, EncodedBatch};
use crate::observability::BatchRetry;

/// Backoff policy for transient batch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries per batch; total attempts = `max_retries + 1`.
    pub max_retries: usize,
    /// Delay before the first retry; doubles on each further retry.
    pub base: Duration,
    /// Upper bound on the exponential delay (jitter is added on top).
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        }
    }
}

/// Whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection blip, serialization conflict, deadlock: retry.
    Transient,
    /// Constraint violation, encoding error, table-state mismatch: retrying
    /// cannot help.
    Fatal,
}

/// Classify a write failure as transient or fatal.
pub fn classify(error: &LoaderError) -> FailureKind {
    match error {
        LoaderError::Connection { .. } => FailureKind::Transient,
        LoaderError::Database(e) => classify_db(e),
        _ => FailureKind::Fatal,
    }
}

fn classify_db(error: &tokio_postgres::Error) -> FailureKind {
    if error.is_closed() || error_chain_contains_io(error) {
        return FailureKind::Transient;
    }
    if let Some(db) = error.as_db_error() {
        let code = db.code().code();
        // Class 08 = connection exceptions; 40001/40P01 = serialization
        // failure and deadlock.
        if code.starts_with("08") || code == "40001" || code == "40P01" {
            return FailureKind::Transient;
        }
    }
    FailureKind::Fatal
}

fn error_chain_contains_io(e: &(dyn StdError + 'static)) -> bool {
    let mut cur: Option<&(dyn StdError + 'static)> = Some(e);
    while let Some(err) = cur {
        if err.is::<std::io::Error>() {
            return true;
        }
        cur = err.source();
    }
    false
}

/// Delay before retry `n` (1-based): `min(base * 2^(n-1), cap)` plus jitter
/// uniform in `[0, delay/4]`.
pub(crate) fn backoff_delay(policy: &RetryPolicy, retry: usize) -> Duration {
    let exp = retry.saturating_sub(1).min(31) as u32;
    let delay = policy.base.saturating_mul(1u32 << exp).min(policy.cap);
    delay + jitter(delay)
}

fn jitter(delay: Duration) -> Duration {
    let max_ms = delay.as_millis() as u64 / 4;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// Write one batch through the sink, retrying transient failures.
///
/// Fatal failures return immediately. After `max_retries` consecutive
/// transient failures the batch is abandoned with
/// [`LoaderError::RetryExhausted`] carrying the batch index and last error.
pub async fn write_with_retry<S>(
    sink: &mut S,
    batch: &EncodedBatch,
    policy: &RetryPolicy,
    mut on_retry: impl FnMut(&BatchRetry, &LoaderError),
) -> LoaderResult<u64>
where
    S: BatchSink + ?Sized,
{
    let mut retries = 0usize;
    loop {
        match sink.write_batch(batch).await {
            Ok(rows) => return Ok(rows),
            Err(error) => match classify(&error) {
                FailureKind::Fatal => return Err(error),
                FailureKind::Transient if retries >= policy.max_retries => {
                    return Err(LoaderError::RetryExhausted {
                        batch_index: batch.index,
                        attempts: retries + 1,
                        source: Box::new(error),
                    });
                }
                FailureKind::Transient => {
                    retries += 1;
                    let delay = backoff_delay(policy, retries);
                    tracing::warn!(
                        batch_index = batch.index,
                        attempt = retries,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient batch failure, backing off"
                    );
                    on_retry(
                        &BatchRetry {
                            batch_index: batch.index,
                            attempt: retries,
                            delay,
                        },
                        &error,
                    );
                    tokio::time::sleep(delay).await;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection_error() -> LoaderError {
        LoaderError::Connection {
            message: "connection reset".to_string(),
        }
    }

    #[test]
    fn connection_loss_is_transient() {
        assert_eq!(classify(&connection_error()), FailureKind::Transient);
    }

    #[test]
    fn encoding_and_table_state_are_fatal() {
        let encoding = LoaderError::Encoding {
            line: 12,
            column: "id".to_string(),
            raw: "x".to_string(),
            message: "bad".to_string(),
        };
        let table_state = LoaderError::TableState {
            message: "table exists".to_string(),
        };
        assert_eq!(classify(&encoding), FailureKind::Fatal);
        assert_eq!(classify(&table_state), FailureKind::Fatal);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base: Duration::from_millis(100),
            cap: Duration::from_millis(450),
        };

        for (retry, floor) in [(1, 100u64), (2, 200), (3, 400), (4, 450), (5, 450)] {
            let delay = backoff_delay(&policy, retry);
            let floor = Duration::from_millis(floor);
            assert!(delay >= floor, "retry {retry}: {delay:?} < {floor:?}");
            // Jitter adds at most a quarter of the capped delay.
            assert!(delay <= floor + floor / 4, "retry {retry}: {delay:?} too large");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retry_bound_is_max_retries_plus_one() {
        struct AlwaysTransient {
            attempts: usize,
        }

        #[async_trait::async_trait]
        impl BatchSink for AlwaysTransient {
            async fn write_batch(&mut self, _batch: &EncodedBatch) -> LoaderResult<u64> {
                self.attempts += 1;
                Err(connection_error())
            }
        }

        let mut sink = AlwaysTransient { attempts: 0 };
        let batch = EncodedBatch {
            index: 7,
            rows: vec![],
        };
        let policy = RetryPolicy {
            max_retries: 3,
            base: Duration::from_millis(10),
            cap: Duration::from_millis(100),
        };

        let mut delays = Vec::new();
        let err = write_with_retry(&mut sink, &batch, &policy, |retry, _| {
            delays.push(retry.delay);
        })
        .await
        .unwrap_err();

        assert_eq!(sink.attempts, 4);
        assert_eq!(delays.len(), 3);
        for (i, delay) in delays.iter().enumerate() {
            let floor = Duration::from_millis(10) * (1u32 << i as u32);
            assert!(*delay >= floor, "retry {}: {delay:?} < {floor:?}", i + 1);
        }
        match err {
            LoaderError::RetryExhausted {
                batch_index,
                attempts,
                ..
            } => {
                assert_eq!(batch_index, 7);
                assert_eq!(attempts, 4);
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fatal_failure_is_not_retried() {
        struct FatalSink {
            attempts: usize,
        }

        #[async_trait::async_trait]
        impl BatchSink for FatalSink {
            async fn write_batch(&mut self, _batch: &EncodedBatch) -> LoaderResult<u64> {
                self.attempts += 1;
                Err(LoaderError::TableState {
                    message: "incompatible".to_string(),
                })
            }
        }

        let mut sink = FatalSink { attempts: 0 };
        let batch = EncodedBatch {
            index: 0,
            rows: vec![],
        };

        let err = write_with_retry(&mut sink, &batch, &RetryPolicy::default(), |_, _| {})
            .await
            .unwrap_err();

        assert_eq!(sink.attempts, 1);
        assert!(matches!(err, LoaderError::TableState { .. }));
    }
}
