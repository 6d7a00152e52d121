use std::sync::{Arc, Mutex};
use std::time::Duration;

use csv_stream_loader::load::{
    BatchSink, CancelHandle, EncodedBatch, LoadJob, LoadOptions, RetryPolicy,
};
use csv_stream_loader::observability::{BatchCommit, BatchRetry, LoadObserver};
use csv_stream_loader::types::SqlType;
use csv_stream_loader::{LoaderError, LoaderResult};

const PEOPLE: &str = "\
id,name,age,email,salary,created_at
1,Ada,36,ada@example.com,120000.5,2024-01-15 10:30:00
2,Grace,41,grace@example.com,135000.0,2024-01-16 09:00:00
3,Edsger,52,edsger@example.com,99000.25,2024-01-17 14:45:00
4,Barbara,48,barbara@example.com,142500.75,2024-01-18 08:15:00
5,Donald,55,donald@example.com,150000.0,2024-01-19 16:20:00
";

/// Records every written batch; all writes succeed.
#[derive(Default)]
struct MemorySink {
    batches: Vec<EncodedBatch>,
}

#[async_trait::async_trait]
impl BatchSink for MemorySink {
    async fn write_batch(&mut self, batch: &EncodedBatch) -> LoaderResult<u64> {
        self.batches.push(batch.clone());
        Ok(batch.len() as u64)
    }
}

/// Fails every attempt for one batch with a transient error.
struct FlakySink {
    inner: MemorySink,
    fail_batch: u64,
    attempts_on_failing_batch: usize,
}

#[async_trait::async_trait]
impl BatchSink for FlakySink {
    async fn write_batch(&mut self, batch: &EncodedBatch) -> LoaderResult<u64> {
        if batch.index == self.fail_batch {
            self.attempts_on_failing_batch += 1;
            return Err(LoaderError::Connection {
                message: "connection reset by peer".to_string(),
            });
        }
        self.inner.write_batch(batch).await
    }
}

#[derive(Default)]
struct RecordingObserver {
    commits: Mutex<Vec<BatchCommit>>,
    retries: Mutex<Vec<BatchRetry>>,
}

impl LoadObserver for RecordingObserver {
    fn on_batch_committed(&self, commit: &BatchCommit) {
        self.commits.lock().unwrap().push(*commit);
    }

    fn on_retry(&self, retry: &BatchRetry, _error: &LoaderError) {
        self.retries.lock().unwrap().push(*retry);
    }
}

fn people_options(batch_size: usize) -> LoadOptions {
    LoadOptions {
        batch_size,
        ..LoadOptions::new("people")
    }
}

#[tokio::test]
async fn five_rows_with_batch_size_two_commit_as_three_batches() {
    let mut sink = MemorySink::default();
    let job = LoadJob::new(people_options(2)).unwrap();

    let report = job
        .run_with_sink(PEOPLE.as_bytes(), &mut sink)
        .await
        .unwrap();

    assert_eq!(report.rows_committed, 5);
    assert_eq!(report.batches_committed, 3);
    assert!(!report.cancelled);

    let sizes: Vec<usize> = sink.batches.iter().map(EncodedBatch::len).collect();
    assert_eq!(sizes, [2, 2, 1]);
    let indices: Vec<u64> = sink.batches.iter().map(|b| b.index).collect();
    assert_eq!(indices, [0, 1, 2]);
}

#[tokio::test]
async fn progress_events_report_cumulative_rows_in_order() {
    let obs = Arc::new(RecordingObserver::default());
    let mut options = people_options(2);
    options.observer = Some(obs.clone());
    let mut sink = MemorySink::default();

    LoadJob::new(options)
        .unwrap()
        .run_with_sink(PEOPLE.as_bytes(), &mut sink)
        .await
        .unwrap();

    let commits = obs.commits.lock().unwrap();
    let cumulative: Vec<u64> = commits.iter().map(|c| c.rows_committed).collect();
    assert_eq!(cumulative, [2, 4, 5]);
    let indices: Vec<u64> = commits.iter().map(|c| c.batch_index).collect();
    assert_eq!(indices, [0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fail_the_job_but_keep_prior_progress() {
    let obs = Arc::new(RecordingObserver::default());
    let mut options = people_options(2);
    options.retry = RetryPolicy {
        max_retries: 2,
        base: Duration::from_millis(100),
        cap: Duration::from_secs(5),
    };
    options.observer = Some(obs.clone());

    let mut sink = FlakySink {
        inner: MemorySink::default(),
        fail_batch: 1,
        attempts_on_failing_batch: 0,
    };

    let failure = LoadJob::new(options)
        .unwrap()
        .run_with_sink(PEOPLE.as_bytes(), &mut sink)
        .await
        .unwrap_err();

    // max_retries + 1 total attempts for the failing batch.
    assert_eq!(sink.attempts_on_failing_batch, 3);
    // Batch 0 committed before batch 1 started failing.
    assert_eq!(failure.rows_committed, 2);
    assert_eq!(failure.batches_committed, 1);
    assert_eq!(failure.failed_batch_index, Some(1));
    match &failure.error {
        LoaderError::RetryExhausted {
            batch_index,
            attempts,
            ..
        } => {
            assert_eq!(*batch_index, 1);
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }

    // Backoff floor doubles per retry; jitter only adds on top.
    let retries = obs.retries.lock().unwrap();
    assert_eq!(retries.len(), 2);
    for retry in retries.iter() {
        let floor = Duration::from_millis(100) * (1u32 << (retry.attempt - 1) as u32);
        assert!(retry.delay >= floor);
    }
}

#[tokio::test]
async fn encoding_error_past_the_sample_is_fatal_with_context() {
    // The sample covers only the first two (integer) rows, so `oops` in the
    // last row violates the frozen SMALLINT schema at write time.
    let input = "id\n1\n2\n3\n4\noops\n";
    let mut options = people_options(2);
    options.sample_size = 2;

    let mut sink = MemorySink::default();
    let failure = LoadJob::new(options)
        .unwrap()
        .run_with_sink(input.as_bytes(), &mut sink)
        .await
        .unwrap_err();

    // Batches 0 and 1 committed; batch 2 never reached the sink.
    assert_eq!(failure.rows_committed, 4);
    assert_eq!(failure.batches_committed, 2);
    match &failure.error {
        LoaderError::Encoding { line, column, raw, .. } => {
            assert_eq!(*line, 6);
            assert_eq!(column, "id");
            assert_eq!(raw, "oops");
        }
        other => panic!("expected Encoding error, got {other:?}"),
    }
    assert_eq!(sink.batches.len(), 2);
}

#[tokio::test]
async fn rerun_on_unchanged_input_is_identical() {
    let mut first_sink = MemorySink::default();
    let first = LoadJob::new(people_options(2))
        .unwrap()
        .run_with_sink(PEOPLE.as_bytes(), &mut first_sink)
        .await
        .unwrap();

    let mut second_sink = MemorySink::default();
    let second = LoadJob::new(people_options(2))
        .unwrap()
        .run_with_sink(PEOPLE.as_bytes(), &mut second_sink)
        .await
        .unwrap();

    assert_eq!(first.schema, second.schema);
    assert_eq!(first.ddl, second.ddl);
    assert_eq!(first.rows_committed, second.rows_committed);
}

/// Cancels the job as soon as the first batch commits.
#[derive(Default)]
struct CancelOnFirstCommit {
    handle: Mutex<Option<CancelHandle>>,
}

impl LoadObserver for CancelOnFirstCommit {
    fn on_batch_committed(&self, _commit: &BatchCommit) {
        if let Some(handle) = &*self.handle.lock().unwrap() {
            handle.cancel();
        }
    }
}

#[tokio::test]
async fn cancellation_stops_at_the_next_batch_boundary() {
    let obs = Arc::new(CancelOnFirstCommit::default());
    let mut options = people_options(2);
    options.observer = Some(obs.clone());

    let job = LoadJob::new(options).unwrap();
    *obs.handle.lock().unwrap() = Some(job.cancel_handle());

    let mut sink = MemorySink::default();
    let report = job
        .run_with_sink(PEOPLE.as_bytes(), &mut sink)
        .await
        .unwrap();

    assert!(report.cancelled);
    // The in-flight batch committed in full; nothing after it was pulled.
    assert_eq!(report.rows_committed, 2);
    assert_eq!(sink.batches.len(), 1);
}

#[tokio::test]
async fn dry_run_never_touches_the_sink() {
    struct PanicSink;

    #[async_trait::async_trait]
    impl BatchSink for PanicSink {
        async fn write_batch(&mut self, _batch: &EncodedBatch) -> LoaderResult<u64> {
            panic!("dry run must not write");
        }
    }

    let mut options = people_options(2);
    options.dry_run = true;

    let mut sink = PanicSink;
    let report = LoadJob::new(options)
        .unwrap()
        .run_with_sink(PEOPLE.as_bytes(), &mut sink)
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.rows_committed, 0);
    assert_eq!(report.schema.columns[0].sql_type, SqlType::SmallInt);
    assert!(report.ddl.starts_with("CREATE TABLE people"));
}

#[tokio::test]
async fn connection_failure_aborts_before_any_write() {
    let mut options = people_options(2);
    options.create_table = true;

    // Nothing listens on port 1; the connect fails before any DDL or batch.
    let failure = LoadJob::new(options)
        .unwrap()
        .run(
            PEOPLE.as_bytes(),
            "host=127.0.0.1 port=1 user=postgres dbname=none connect_timeout=1",
        )
        .await
        .unwrap_err();

    assert!(matches!(failure.error, LoaderError::Connection { .. }));
    assert_eq!(failure.rows_committed, 0);
    assert_eq!(failure.failed_batch_index, None);
}

#[tokio::test]
async fn invalid_options_are_rejected_at_construction() {
    let mut options = people_options(0);
    assert!(matches!(
        LoadJob::new(options.clone()).unwrap_err(),
        LoaderError::Config { .. }
    ));

    options.batch_size = 100;
    options.sample_size = 0;
    assert!(matches!(
        LoadJob::new(options.clone()).unwrap_err(),
        LoaderError::Config { .. }
    ));

    options.sample_size = 100;
    options.table_name = "drop".to_string();
    assert!(matches!(
        LoadJob::new(options).unwrap_err(),
        LoaderError::Config { .. }
    ));
}
