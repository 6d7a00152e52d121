//! `csv-stream-loader` is a streaming bulk loader for delimited text files
//! into PostgreSQL, inferring the table structure from the data itself.
//!
//! The primary entrypoint is [`load::LoadJob`], which runs one ingestion end
//! to end: row source → schema inference over a bounded sample → fixed-size
//! batches → binary `COPY` with one transaction per batch, supervised by a
//! bounded-backoff retry controller.
//!
//! ## What the loader guarantees
//!
//! - **Bounded memory**: the input is read in a single pass; only the
//!   inference sample (default 1,000 rows) and at most two batches (one in
//!   flight, one being prepared) are ever held in memory, regardless of file
//!   size. Pipes and other non-seekable streams work.
//! - **Deterministic commit boundary**: each batch commits atomically in its
//!   own transaction, in file order. A failure affects at most one batch,
//!   and the terminal result always reports exactly how many rows committed.
//! - **One schema, decided once**: column types are inferred from the sample
//!   by walking a fixed widening lattice
//!   (`NULL < BOOLEAN < SMALLINT < INTEGER < BIGINT < REAL < DOUBLE PRECISION
//!   < TIMESTAMP < DATE < TEXT`) and frozen. A later value that does not fit
//!   is a hard error, never a silent re-widening.
//!
//! ## Quick example: dry run (schema only)
//!
//! ```no_run
//! use csv_stream_loader::load::{LoadJob, LoadOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = std::fs::File::open("users.csv")?;
//! let options = LoadOptions {
//!     dry_run: true,
//!     ..LoadOptions::new("users")
//! };
//!
//! let report = LoadJob::new(options)?.run(file, "").await?;
//! for col in &report.schema.columns {
//!     println!("{} {} ({:.0}% confidence)", col.name, col.sql_type, col.confidence * 100.0);
//! }
//! println!("{}", report.ddl);
//! # Ok(())
//! # }
//! ```
//!
//! ## Quick example: load
//!
//! ```no_run
//! use csv_stream_loader::load::{LoadJob, LoadOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = std::fs::File::open("users.csv")?;
//! let options = LoadOptions {
//!     drop_table: true,
//!     create_table: true,
//!     ..LoadOptions::new("users")
//! };
//!
//! let report = LoadJob::new(options)?
//!     .run(file, "postgresql://localhost/mydb")
//!     .await?;
//! println!("loaded {} rows in {} batches", report.rows_committed, report.batches_committed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`source`]: delimited-text row source with a replayable inference prefix
//! - [`schema`]: schema inference and DDL generation
//! - [`types`]: the SQL type lattice, fields, and rows
//! - [`batch`]: fixed-size, ordered batching
//! - [`load`]: job configuration, the pipeline, and the PostgreSQL sink
//! - [`observability`]: progress observers and job metrics
//! - [`error`]: error types used across the loader
//!
//! Command-line parsing, progress rendering, and log-subscriber setup are
//! deliberately left to callers; the crate emits progress through
//! [`observability::LoadObserver`] and diagnostics through `tracing`.

pub mod batch;
pub mod error;
pub mod load;
pub mod observability;
pub mod schema;
pub mod source;
pub mod types;

pub use error::{LoaderError, LoaderResult};
pub use load::{LoadFailure, LoadJob, LoadOptions, LoadReport};
