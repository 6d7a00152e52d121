//! Wire-value encoding under a finalized schema.
//!
//! Every row — sampled or not — is encoded according to its column's final
//! inferred type before it is handed to the write stage. A value that does
//! not fit is a fatal [`LoaderError::Encoding`]; the schema is never widened
//! after finalization, because widening after commit time would invalidate
//! already-written batches.

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{NaiveDate, NaiveDateTime};
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

use crate::batch::Batch;
use crate::error::{LoaderError, LoaderResult};
use crate::schema::{Column, Schema};
use crate::types::{parse_date, parse_timestamp, Field, SqlType};

/// A typed wire value ready for binary `COPY`.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Boolean(bool),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Text(String),
}

impl ToSql for SqlValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Boolean(v) => v.to_sql(ty, out),
            SqlValue::SmallInt(v) => v.to_sql(ty, out),
            SqlValue::Integer(v) => v.to_sql(ty, out),
            SqlValue::BigInt(v) => v.to_sql(ty, out),
            SqlValue::Real(v) => v.to_sql(ty, out),
            SqlValue::Double(v) => v.to_sql(ty, out),
            SqlValue::Timestamp(v) => v.to_sql(ty, out),
            SqlValue::Date(v) => v.to_sql(ty, out),
            SqlValue::Text(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        [
            Type::BOOL,
            Type::INT2,
            Type::INT4,
            Type::INT8,
            Type::FLOAT4,
            Type::FLOAT8,
            Type::TIMESTAMP,
            Type::DATE,
            Type::TEXT,
            Type::VARCHAR,
        ]
        .contains(ty)
    }

    to_sql_checked!();
}

/// The wire type used for a column of the given inferred type.
pub(crate) fn pg_type(sql_type: SqlType) -> Type {
    match sql_type {
        SqlType::Null | SqlType::Text => Type::TEXT,
        SqlType::Boolean => Type::BOOL,
        SqlType::SmallInt => Type::INT2,
        SqlType::Integer => Type::INT4,
        SqlType::BigInt => Type::INT8,
        SqlType::Real => Type::FLOAT4,
        SqlType::DoublePrecision => Type::FLOAT8,
        SqlType::Timestamp => Type::TIMESTAMP,
        SqlType::Date => Type::DATE,
    }
}

/// A batch with all values encoded, ready for the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedBatch {
    /// 0-based batch index, carried over from the [`Batch`].
    pub index: u64,
    /// Encoded rows, in source order.
    pub rows: Vec<Vec<SqlValue>>,
}

impl EncodedBatch {
    /// Number of rows in the batch.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Destination for encoded batches.
///
/// The write stage sits behind this trait so the pipeline can be exercised
/// without a server; [`crate::load::PgLoader`] is the PostgreSQL
/// implementation. One call writes one batch as one atomic unit.
#[async_trait]
pub trait BatchSink: Send {
    /// Write a batch atomically, returning the number of rows written.
    async fn write_batch(&mut self, batch: &EncodedBatch) -> LoaderResult<u64>;
}

/// Encode a full batch under the schema.
///
/// `line_offset` is 1 when the source had a header row, so encoding errors
/// report the true 1-based file line.
pub fn encode_batch(
    schema: &Schema,
    batch: &Batch,
    line_offset: u64,
) -> LoaderResult<EncodedBatch> {
    let rows = batch
        .rows()
        .iter()
        .map(|row| {
            let line = row.position() + line_offset;
            row.fields()
                .iter()
                .zip(schema.columns.iter())
                .map(|(field, column)| encode_field(column, field, line))
                .collect::<LoaderResult<Vec<SqlValue>>>()
        })
        .collect::<LoaderResult<Vec<_>>>()?;

    Ok(EncodedBatch {
        index: batch.index(),
        rows,
    })
}

fn encode_field(column: &Column, field: &Field, line: u64) -> LoaderResult<SqlValue> {
    if field.is_null() {
        if column.nullable {
            return Ok(SqlValue::Null);
        }
        return Err(encode_error(
            column,
            field,
            line,
            "null value in NOT NULL column".to_string(),
        ));
    }

    let raw = field.raw();
    match column.sql_type {
        SqlType::Null | SqlType::Text => Ok(SqlValue::Text(raw.to_owned())),
        SqlType::Boolean => raw
            .parse::<bool>()
            .map(SqlValue::Boolean)
            .map_err(|e| encode_error(column, field, line, e.to_string())),
        SqlType::SmallInt => raw
            .parse::<i16>()
            .map(SqlValue::SmallInt)
            .map_err(|e| encode_error(column, field, line, e.to_string())),
        SqlType::Integer => raw
            .parse::<i32>()
            .map(SqlValue::Integer)
            .map_err(|e| encode_error(column, field, line, e.to_string())),
        SqlType::BigInt => raw
            .parse::<i64>()
            .map(SqlValue::BigInt)
            .map_err(|e| encode_error(column, field, line, e.to_string())),
        SqlType::Real => match raw.parse::<f32>() {
            Ok(v) if v.is_finite() => Ok(SqlValue::Real(v)),
            _ => Err(encode_error(column, field, line, "not a finite REAL".to_string())),
        },
        SqlType::DoublePrecision => match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(SqlValue::Double(v)),
            _ => Err(encode_error(
                column,
                field,
                line,
                "not a finite DOUBLE PRECISION".to_string(),
            )),
        },
        SqlType::Timestamp => parse_timestamp(raw)
            .map(SqlValue::Timestamp)
            .ok_or_else(|| encode_error(column, field, line, "not a TIMESTAMP".to_string())),
        SqlType::Date => parse_date(raw)
            .map(SqlValue::Date)
            .ok_or_else(|| encode_error(column, field, line, "not a DATE".to_string())),
    }
}

fn encode_error(column: &Column, field: &Field, line: u64, message: String) -> LoaderError {
    LoaderError::Encoding {
        line,
        column: column.name.clone(),
        raw: field.raw().to_owned(),
        message,
    }
}
