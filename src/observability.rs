use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::LoaderError;
use crate::load::{LoadFailure, LoadReport};
use crate::schema::Schema;

/// Progress event emitted after every successful batch commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchCommit {
    /// 0-based index of the committed batch.
    pub batch_index: u64,
    /// Rows in this batch.
    pub rows_in_batch: u64,
    /// Cumulative rows committed by this and all prior batches.
    pub rows_committed: u64,
    /// Time since the job started.
    pub elapsed: Duration,
}

/// Event emitted before a transient batch failure is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchRetry {
    /// 0-based index of the failing batch.
    pub batch_index: u64,
    /// 1-based retry ordinal (first retry = 1).
    pub attempt: usize,
    /// Backoff delay applied before this retry.
    pub delay: Duration,
}

/// Observer interface for load-job outcomes.
///
/// Implementors can record metrics, render progress, or trigger alerts. All
/// callbacks default to no-ops.
pub trait LoadObserver: Send + Sync {
    /// Called once the schema has been inferred and finalized.
    fn on_schema(&self, _schema: &Schema) {}

    /// Called after every successful batch commit.
    fn on_batch_committed(&self, _commit: &BatchCommit) {}

    /// Called before each transient-failure retry.
    fn on_retry(&self, _retry: &BatchRetry, _error: &LoaderError) {}

    /// Called when the job finishes successfully (dry runs included).
    fn on_job_complete(&self, _report: &LoadReport) {}

    /// Called when the job fails.
    fn on_job_failed(&self, _failure: &LoadFailure) {}
}

/// An observer that fans out callbacks to a list of observers.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn LoadObserver>>,
}

impl CompositeObserver {
    /// Create a new composite observer from a list of observers.
    pub fn new(observers: Vec<Arc<dyn LoadObserver>>) -> Self {
        Self { observers }
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers_len", &self.observers.len())
            .finish()
    }
}

impl LoadObserver for CompositeObserver {
    fn on_schema(&self, schema: &Schema) {
        for o in &self.observers {
            o.on_schema(schema);
        }
    }

    fn on_batch_committed(&self, commit: &BatchCommit) {
        for o in &self.observers {
            o.on_batch_committed(commit);
        }
    }

    fn on_retry(&self, retry: &BatchRetry, error: &LoaderError) {
        for o in &self.observers {
            o.on_retry(retry, error);
        }
    }

    fn on_job_complete(&self, report: &LoadReport) {
        for o in &self.observers {
            o.on_job_complete(report);
        }
    }

    fn on_job_failed(&self, failure: &LoadFailure) {
        for o in &self.observers {
            o.on_job_failed(failure);
        }
    }
}

/// Logs load events to stderr.
#[derive(Debug, Default)]
pub struct StdErrObserver;

impl LoadObserver for StdErrObserver {
    fn on_schema(&self, schema: &Schema) {
        eprintln!(
            "[load][schema] table={} columns={}",
            schema.table_name,
            schema.columns.len()
        );
    }

    fn on_batch_committed(&self, commit: &BatchCommit) {
        eprintln!(
            "[load][commit] batch={} rows={} total={} elapsed={:?}",
            commit.batch_index, commit.rows_in_batch, commit.rows_committed, commit.elapsed
        );
    }

    fn on_retry(&self, retry: &BatchRetry, error: &LoaderError) {
        eprintln!(
            "[load][retry] batch={} attempt={} delay={:?} err={}",
            retry.batch_index, retry.attempt, retry.delay, error
        );
    }

    fn on_job_complete(&self, report: &LoadReport) {
        eprintln!(
            "[load][done] table={} rows={} batches={} dry_run={} elapsed={:?}",
            report.table_name,
            report.rows_committed,
            report.batches_committed,
            report.dry_run,
            report.duration
        );
    }

    fn on_job_failed(&self, failure: &LoadFailure) {
        eprintln!(
            "[load][failed] rows_committed={} failed_batch={:?} err={}",
            failure.rows_committed, failure.failed_batch_index, failure.error
        );
    }
}

/// Real-time counters for a load job.
///
/// Owned by the job and discarded with it; concurrent jobs in one process
/// never share metrics state. The pipeline updates the counters during the
/// run; callers can snapshot them at any time.
#[derive(Debug)]
pub struct JobMetrics {
    started_at: Mutex<Option<Instant>>,
    elapsed_ns: AtomicU64,
    rows_committed: AtomicU64,
    batches_committed: AtomicU64,
    retries: AtomicU64,
}

impl JobMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Mutex::new(None),
            elapsed_ns: AtomicU64::new(0),
            rows_committed: AtomicU64::new(0),
            batches_committed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    pub(crate) fn begin_run(&self) {
        *self.started_at.lock().expect("metrics mutex poisoned") = Some(Instant::now());
        self.elapsed_ns.store(0, Ordering::SeqCst);
        self.rows_committed.store(0, Ordering::SeqCst);
        self.batches_committed.store(0, Ordering::SeqCst);
        self.retries.store(0, Ordering::SeqCst);
    }

    pub(crate) fn end_run(&self, elapsed: Duration) {
        self.elapsed_ns
            .store(elapsed.as_nanos().min(u64::MAX as u128) as u64, Ordering::SeqCst);
    }

    pub(crate) fn on_batch_committed(&self, rows: u64) {
        let _ = self.rows_committed.fetch_add(rows, Ordering::SeqCst);
        let _ = self.batches_committed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn on_retry(&self) {
        let _ = self.retries.fetch_add(1, Ordering::SeqCst);
    }

    /// Cumulative rows committed so far.
    pub fn rows_committed(&self) -> u64 {
        self.rows_committed.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> JobMetricsSnapshot {
        let elapsed_ns = self.elapsed_ns.load(Ordering::SeqCst);
        let elapsed = if elapsed_ns > 0 {
            Some(Duration::from_nanos(elapsed_ns))
        } else {
            None
        };

        JobMetricsSnapshot {
            rows_committed: self.rows_committed.load(Ordering::SeqCst),
            batches_committed: self.batches_committed.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::SeqCst),
            elapsed,
        }
    }
}

impl Default for JobMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of [`JobMetrics`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobMetricsSnapshot {
    pub rows_committed: u64,
    pub batches_committed: u64,
    pub retries: u64,
    pub elapsed: Option<Duration>,
}

impl JobMetricsSnapshot {
    /// Commit throughput in rows per second, when elapsed time is known.
    pub fn rows_per_sec(&self) -> Option<f64> {
        let elapsed = self.elapsed?.as_secs_f64();
        if elapsed > 0.0 {
            Some(self.rows_committed as f64 / elapsed)
        } else {
            None
        }
    }
}

impl fmt::Display for JobMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows_committed={}, batches_committed={}, retries={}, elapsed={:?}",
            self.rows_committed, self.batches_committed, self.retries, self.elapsed
        )
    }
}
