use thiserror::Error;

/// Convenience result type for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Error type returned by loader operations.
///
/// This is a single error enum shared across the row source, schema inference,
/// and the bulk-write path. Failures that happen after batches have already
/// committed are wrapped in [`crate::load::LoadFailure`], which additionally
/// carries the committed-row count.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The input stream could not be opened or read.
    #[error("file error: {0}")]
    File(#[from] std::io::Error),

    /// A row violated the expected shape (wrong field count, bad quoting).
    #[error("parse error at line {line}: {message}")]
    Parse {
        /// 1-based line number in the source file (the header counts as line 1).
        line: u64,
        message: String,
    },

    /// Schema inference could not settle a consistent schema.
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Initial connect failed, or the connection was lost mid-stream.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// The target table exists or is missing in a way the options do not
    /// cover, or its structure is incompatible with the inferred schema.
    #[error("table state error: {message}")]
    TableState { message: String },

    /// A value could not be represented under its column's inferred type.
    /// Fatal for the batch, never retried.
    #[error("encoding error at line {line} column '{column}': {message} (raw='{raw}')")]
    Encoding {
        line: u64,
        column: String,
        raw: String,
        message: String,
    },

    /// A batch kept failing transiently until its retry budget ran out.
    #[error("batch {batch_index} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        batch_index: u64,
        attempts: usize,
        #[source]
        source: Box<LoaderError>,
    },

    /// Invalid load configuration.
    #[error("config error: {message}")]
    Config { message: String },

    /// Raw driver error, before transient/fatal classification.
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),
}

impl LoaderError {
    /// The batch index carried by this error, when it has one.
    pub fn batch_index(&self) -> Option<u64> {
        match self {
            LoaderError::RetryExhausted { batch_index, .. } => Some(*batch_index),
            _ => None,
        }
    }

    /// The 1-based source line carried by this error, when it has one.
    pub fn line(&self) -> Option<u64> {
        match self {
            LoaderError::Parse { line, .. } | LoaderError::Encoding { line, .. } => Some(*line),
            _ => None,
        }
    }
}
