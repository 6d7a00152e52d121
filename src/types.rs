//! Core data model types: the SQL type lattice, fields, and rows.
//!
//! The loader infers a PostgreSQL column type for every column from a bounded
//! sample of rows, walking a fixed widening lattice ([`SqlType`]). Parsed
//! input is represented as [`Row`]s of [`Field`]s until it is encoded for the
//! wire.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

/// Timestamp layouts accepted during inference and encoding.
pub(crate) const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
];

/// Date layouts accepted during inference and encoding.
pub(crate) const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%m/%d/%Y",
    "%d/%m/%Y",
];

/// PostgreSQL column types the loader can infer, narrowest first.
///
/// The declaration order is the widening lattice used by inference: a
/// column's candidate type only ever moves towards [`SqlType::Text`], never
/// back. [`SqlType::Null`] is the starting candidate for a column that has
/// not yet seen a non-null value; a finalized schema never contains it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum SqlType {
    Null,
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    DoublePrecision,
    Timestamp,
    Date,
    Text,
}

impl SqlType {
    /// The PostgreSQL type name used in generated DDL.
    pub fn to_sql(self) -> &'static str {
        match self {
            SqlType::Null => "TEXT",
            SqlType::Boolean => "BOOLEAN",
            SqlType::SmallInt => "SMALLINT",
            SqlType::Integer => "INTEGER",
            SqlType::BigInt => "BIGINT",
            SqlType::Real => "REAL",
            SqlType::DoublePrecision => "DOUBLE PRECISION",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Date => "DATE",
            SqlType::Text => "TEXT",
        }
    }

    /// The next wider lattice position, if any.
    pub(crate) fn next(self) -> Option<SqlType> {
        match self {
            SqlType::Null => Some(SqlType::Boolean),
            SqlType::Boolean => Some(SqlType::SmallInt),
            SqlType::SmallInt => Some(SqlType::Integer),
            SqlType::Integer => Some(SqlType::BigInt),
            SqlType::BigInt => Some(SqlType::Real),
            SqlType::Real => Some(SqlType::DoublePrecision),
            SqlType::DoublePrecision => Some(SqlType::Timestamp),
            SqlType::Timestamp => Some(SqlType::Date),
            SqlType::Date => Some(SqlType::Text),
            SqlType::Text => None,
        }
    }

    /// Whether a non-null text value parses under this type.
    ///
    /// [`SqlType::Null`] accepts nothing (null handling happens before type
    /// checks) and [`SqlType::Text`] accepts everything, so a widening walk
    /// always terminates.
    pub fn accepts(self, value: &str) -> bool {
        match self {
            SqlType::Null => false,
            SqlType::Boolean => value.parse::<bool>().is_ok(),
            SqlType::SmallInt => value.parse::<i16>().is_ok(),
            SqlType::Integer => value.parse::<i32>().is_ok(),
            SqlType::BigInt => value.parse::<i64>().is_ok(),
            SqlType::Real => matches!(value.parse::<f32>(), Ok(v) if v.is_finite()),
            SqlType::DoublePrecision => matches!(value.parse::<f64>(), Ok(v) if v.is_finite()),
            SqlType::Timestamp => parse_timestamp(value).is_some(),
            SqlType::Date => parse_date(value).is_some(),
            SqlType::Text => true,
        }
    }

    /// The smallest lattice position at or above `self` that accepts `value`.
    pub(crate) fn widened_to_accept(self, value: &str) -> SqlType {
        let mut candidate = self;
        loop {
            if candidate.accepts(value) {
                return candidate;
            }
            match candidate.next() {
                Some(wider) => candidate = wider,
                // Text accepts everything, so this is unreachable; stay safe anyway.
                None => return SqlType::Text,
            }
        }
    }
}

impl std::fmt::Display for SqlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sql())
    }
}

/// Parse a timestamp under any of the accepted layouts.
pub(crate) fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

/// Parse a date under any of the accepted layouts.
pub(crate) fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// Whether a raw text value is one of the recognized null markers.
pub(crate) fn is_null_marker(value: &str) -> bool {
    value.is_empty() || value.eq_ignore_ascii_case("null") || value == "\\N"
}

/// A single raw text value plus its null flag.
///
/// The null flag is decided once, at parse time: empty strings, `null` (any
/// case), and `\N` all count as null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    raw: String,
    null: bool,
}

impl Field {
    /// Create a field from raw text, computing the null flag.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let null = is_null_marker(&raw);
        Self { raw, null }
    }

    /// The raw text as it appeared in the source.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether this field is an empty/null marker.
    pub fn is_null(&self) -> bool {
        self.null
    }
}

/// An ordered sequence of fields tagged with its position in the source.
///
/// Positions are 1-based over *data* rows (a header row is not counted).
/// Rows are immutable once produced by the row source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    position: u64,
    fields: Vec<Field>,
}

impl Row {
    /// Create a row at the given 1-based data position.
    pub fn new(position: u64, fields: Vec<Field>) -> Self {
        Self { position, fields }
    }

    /// 1-based position among the data rows of the source.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// The row's fields, in source column order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of fields in the row.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the row has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
