//! The load job: configuration, pipeline orchestration, and terminal results.
//!
//! A [`LoadJob`] runs one ingestion end to end: row source → buffered
//! inference → batching → bulk write guarded by the retry controller.
//! Parsing and encoding of batch `N+1` proceed on a producer thread while
//! batch `N` is on the wire, connected by a hand-off of depth one: if the
//! write stage has not yet consumed a batch, production suspends instead of
//! buffering. Exactly one batch is ever in flight, so commit order equals
//! batch order.

pub mod encode;
pub mod pg;
pub mod retry;

pub use encode::{encode_batch, BatchSink, EncodedBatch, SqlValue};
pub use pg::PgLoader;
pub use retry::{classify, FailureKind, RetryPolicy};

use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::batch::Batches;
use crate::error::{LoaderError, LoaderResult};
use crate::observability::{BatchCommit, JobMetrics, LoadObserver};
use crate::schema::Schema;
use crate::source::{RowSource, SourceOptions};

/// Configuration for a [`LoadJob`].
///
/// Every recognized option is enumerated here and validated once at job
/// construction; nothing is looked up dynamically during the run.
#[derive(Clone)]
pub struct LoadOptions {
    /// Target table name.
    pub table_name: String,
    /// Field delimiter byte.
    pub delimiter: u8,
    /// Whether the first input row is a header.
    pub header_present: bool,
    /// Rows per batch (one transaction each).
    pub batch_size: usize,
    /// Rows buffered for schema inference.
    pub sample_size: usize,
    /// Backoff policy for transient batch failures.
    pub retry: RetryPolicy,
    /// Drop the target table before loading.
    pub drop_table: bool,
    /// Create the target table from the inferred schema if missing.
    pub create_table: bool,
    /// Infer and report the schema without touching the target store.
    pub dry_run: bool,
    /// Optional observer for progress events.
    pub observer: Option<Arc<dyn LoadObserver>>,
}

impl LoadOptions {
    /// Options for loading into `table_name`, with defaults for the rest:
    /// comma-delimited, header present, batches of 10,000, a sample of
    /// 1,000, and up to 3 retries per batch.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            delimiter: b',',
            header_present: true,
            batch_size: 10_000,
            sample_size: 1_000,
            retry: RetryPolicy::default(),
            drop_table: false,
            create_table: false,
            dry_run: false,
            observer: None,
        }
    }

    fn validate(&self) -> LoaderResult<()> {
        Schema::validate_table_name(&self.table_name)?;
        if self.batch_size == 0 {
            return Err(LoaderError::Config {
                message: "batch_size must be > 0".to_string(),
            });
        }
        if self.sample_size == 0 {
            return Err(LoaderError::Config {
                message: "sample_size must be > 0".to_string(),
            });
        }
        if matches!(self.delimiter, b'"' | b'\n' | b'\r') {
            return Err(LoaderError::Config {
                message: "delimiter cannot be a quote or line terminator".to_string(),
            });
        }
        Ok(())
    }

    fn source_options(&self) -> SourceOptions {
        SourceOptions {
            delimiter: self.delimiter,
            header_present: self.header_present,
        }
    }
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("table_name", &self.table_name)
            .field("delimiter", &self.delimiter)
            .field("header_present", &self.header_present)
            .field("batch_size", &self.batch_size)
            .field("sample_size", &self.sample_size)
            .field("retry", &self.retry)
            .field("drop_table", &self.drop_table)
            .field("create_table", &self.create_table)
            .field("dry_run", &self.dry_run)
            .field("observer_set", &self.observer.is_some())
            .finish()
    }
}

/// Terminal result of a completed (or dry-run) job.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    /// Target table name.
    pub table_name: String,
    /// The inferred schema the job ran under.
    pub schema: Schema,
    /// Generated `CREATE TABLE` statement.
    pub ddl: String,
    /// Total rows committed.
    pub rows_committed: u64,
    /// Number of committed batches.
    pub batches_committed: u64,
    /// Wall-clock duration of the job.
    pub duration: Duration,
    /// Whether this was a dry run (schema only, nothing written).
    pub dry_run: bool,
    /// Whether the job stopped early at a batch boundary after cancellation.
    pub cancelled: bool,
}

/// Terminal result of a failed job.
///
/// Partial progress is never hidden: the committed-row count covers all
/// batches that committed before the failure, and the failing batch index
/// (or the error's line number) identifies where to resume.
#[derive(Debug)]
pub struct LoadFailure {
    /// The error that stopped the job.
    pub error: LoaderError,
    /// Rows committed by prior successful batches.
    pub rows_committed: u64,
    /// Batches committed before the failure.
    pub batches_committed: u64,
    /// Index of the batch that failed, when the failure was batch-level.
    pub failed_batch_index: Option<u64>,
    /// Wall-clock duration until the failure.
    pub duration: Duration,
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failed_batch_index {
            Some(idx) => write!(
                f,
                "load failed at batch {idx} after committing {} rows ({} batches): {}",
                self.rows_committed, self.batches_committed, self.error
            ),
            None => write!(
                f,
                "load failed after committing {} rows ({} batches): {}",
                self.rows_committed, self.batches_committed, self.error
            ),
        }
    }
}

impl std::error::Error for LoadFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Handle for requesting cancellation of a running job.
///
/// Cancellation is observed only at batch boundaries: the in-flight batch
/// either fully commits or fully rolls back, then the job stops pulling rows.
#[derive(Clone, Debug)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

struct Prepared<R: Read> {
    source: RowSource<R>,
    schema: Schema,
    ddl: String,
}

/// One bulk-load invocation.
///
/// Owns the inferred schema, the batch stream, and the job-scoped
/// [`JobMetrics`]; all of it is discarded when the job ends, so concurrent
/// jobs in one process cannot interfere.
#[derive(Debug)]
pub struct LoadJob {
    options: LoadOptions,
    metrics: Arc<JobMetrics>,
    cancel: Arc<AtomicBool>,
}

impl LoadJob {
    /// Create a job from validated options.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::Config`] for an invalid table name, a zero
    /// batch or sample size, or an unusable delimiter.
    pub fn new(options: LoadOptions) -> LoaderResult<Self> {
        options.validate()?;
        Ok(Self {
            options,
            metrics: Arc::new(JobMetrics::new()),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Job-scoped metrics, live during the run.
    pub fn metrics(&self) -> Arc<JobMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Handle for cancelling the job at the next batch boundary.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    /// Run the job against PostgreSQL.
    ///
    /// In `dry_run` mode this stops after inference and never connects.
    pub async fn run<R>(self, input: R, conn_str: &str) -> Result<LoadReport, LoadFailure>
    where
        R: Read + Send + 'static,
    {
        let started = Instant::now();
        self.metrics.begin_run();

        let prepared = self
            .prepare(input)
            .map_err(|e| self.failure(e, None, started))?;
        if self.options.dry_run {
            return Ok(self.finish_dry_run(prepared, started));
        }

        let mut pg = PgLoader::connect(conn_str, &prepared.schema)
            .await
            .map_err(|e| self.failure(e, None, started))?;
        pg.prepare_table(
            &prepared.schema,
            self.options.drop_table,
            self.options.create_table,
        )
        .await
        .map_err(|e| self.failure(e, None, started))?;

        self.drive(prepared, &mut pg, started).await
    }

    /// Run the job against an arbitrary [`BatchSink`].
    ///
    /// Table admin is the sink owner's concern here; the pipeline semantics
    /// (ordering, hand-off depth, retries, cancellation) are identical to
    /// [`LoadJob::run`].
    pub async fn run_with_sink<R, S>(
        self,
        input: R,
        sink: &mut S,
    ) -> Result<LoadReport, LoadFailure>
    where
        R: Read + Send + 'static,
        S: BatchSink + ?Sized,
    {
        let started = Instant::now();
        self.metrics.begin_run();

        let prepared = self
            .prepare(input)
            .map_err(|e| self.failure(e, None, started))?;
        if self.options.dry_run {
            return Ok(self.finish_dry_run(prepared, started));
        }

        self.drive(prepared, sink, started).await
    }

    fn prepare<R: Read>(&self, input: R) -> LoaderResult<Prepared<R>> {
        let mut source = RowSource::new(input, &self.options.source_options());
        source.sample(self.options.sample_size)?;

        let column_names = source.column_names().to_vec();
        let schema = Schema::infer(
            &self.options.table_name,
            &column_names,
            source.sampled_rows(),
        )?;
        let ddl = schema.create_table_sql();

        tracing::debug!(
            table = %schema.table_name,
            columns = schema.columns.len(),
            sampled = source.sampled_rows().len(),
            "schema inferred"
        );
        if let Some(obs) = &self.options.observer {
            obs.on_schema(&schema);
        }

        Ok(Prepared { source, schema, ddl })
    }

    fn finish_dry_run<R: Read>(&self, prepared: Prepared<R>, started: Instant) -> LoadReport {
        self.metrics.end_run(started.elapsed());
        let report = LoadReport {
            table_name: self.options.table_name.clone(),
            schema: prepared.schema,
            ddl: prepared.ddl,
            rows_committed: 0,
            batches_committed: 0,
            duration: started.elapsed(),
            dry_run: true,
            cancelled: false,
        };
        if let Some(obs) = &self.options.observer {
            obs.on_job_complete(&report);
        }
        report
    }

    async fn drive<R, S>(
        &self,
        prepared: Prepared<R>,
        sink: &mut S,
        started: Instant,
    ) -> Result<LoadReport, LoadFailure>
    where
        R: Read + Send + 'static,
        S: BatchSink + ?Sized,
    {
        let Prepared { source, schema, ddl } = prepared;
        let schema = Arc::new(schema);
        let line_offset = u64::from(self.options.header_present);
        let batch_size = self.options.batch_size;

        // Depth-one hand-off: the producer parses and encodes the next batch
        // while the current one is on the wire, and suspends when the slot
        // is full.
        let (tx, mut rx) = tokio::sync::mpsc::channel::<LoaderResult<EncodedBatch>>(1);
        let producer_schema = Arc::clone(&schema);
        let producer_cancel = Arc::clone(&self.cancel);

        let producer = std::thread::spawn(move || {
            let rows = match source.rows() {
                Ok(rows) => rows,
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    return;
                }
            };
            for batch in Batches::new(rows, batch_size) {
                if producer_cancel.load(Ordering::Relaxed) {
                    return;
                }
                let encoded =
                    batch.and_then(|b| encode::encode_batch(&producer_schema, &b, line_offset));
                let stop = encoded.is_err();
                if tx.blocking_send(encoded).is_err() || stop {
                    return;
                }
            }
        });

        let mut cancelled = false;
        let mut failed: Option<(LoaderError, Option<u64>)> = None;

        while let Some(item) = rx.recv().await {
            match item {
                Err(e) => {
                    failed = Some((e, None));
                    break;
                }
                Ok(batch) => {
                    let index = batch.index;
                    let written = retry::write_with_retry(
                        sink,
                        &batch,
                        &self.options.retry,
                        |retry, error| {
                            self.metrics.on_retry();
                            if let Some(obs) = &self.options.observer {
                                obs.on_retry(retry, error);
                            }
                        },
                    )
                    .await;

                    match written {
                        Ok(rows) => {
                            self.metrics.on_batch_committed(rows);
                            let commit = BatchCommit {
                                batch_index: index,
                                rows_in_batch: rows,
                                rows_committed: self.metrics.rows_committed(),
                                elapsed: started.elapsed(),
                            };
                            if let Some(obs) = &self.options.observer {
                                obs.on_batch_committed(&commit);
                            }
                        }
                        Err(e) => {
                            failed = Some((e, Some(index)));
                            break;
                        }
                    }
                }
            }

            // Cancellation is observed only at batch boundaries.
            if self.cancel.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }
        }

        // Dropping the receiver unblocks a producer waiting on the hand-off
        // slot.
        drop(rx);
        let _ = producer.join();

        self.metrics.end_run(started.elapsed());
        let snapshot = self.metrics.snapshot();

        match failed {
            None => {
                let report = LoadReport {
                    table_name: self.options.table_name.clone(),
                    schema: schema.as_ref().clone(),
                    ddl,
                    rows_committed: snapshot.rows_committed,
                    batches_committed: snapshot.batches_committed,
                    duration: started.elapsed(),
                    dry_run: false,
                    cancelled,
                };
                if let Some(obs) = &self.options.observer {
                    obs.on_job_complete(&report);
                }
                Ok(report)
            }
            Some((error, failed_batch_index)) => {
                let failed_batch_index = failed_batch_index.or_else(|| error.batch_index());
                Err(self.failure(error, failed_batch_index, started))
            }
        }
    }

    fn failure(
        &self,
        error: LoaderError,
        failed_batch_index: Option<u64>,
        started: Instant,
    ) -> LoadFailure {
        self.metrics.end_run(started.elapsed());
        let snapshot = self.metrics.snapshot();
        let failure = LoadFailure {
            error,
            rows_committed: snapshot.rows_committed,
            batches_committed: snapshot.batches_committed,
            failed_batch_index,
            duration: started.elapsed(),
        };
        if let Some(obs) = &self.options.observer {
            obs.on_job_failed(&failure);
        }
        failure
    }
}
