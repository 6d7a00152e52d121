//! Schema inference over a bounded row sample, and DDL generation.
//!
//! Inference consumes the buffered sample produced by
//! [`crate::source::RowSource::sample`] and decides one [`SqlType`] per
//! column by walking the widening lattice. The resulting [`Schema`] is
//! immutable: it drives both the generated `CREATE TABLE` statement and the
//! wire encoding of every subsequent row, including rows that were never
//! sampled. A later value that does not fit its column's final type is a
//! hard [`crate::LoaderError::Encoding`] error, never a silent re-widening.

use serde::Serialize;

use crate::error::{LoaderError, LoaderResult};
use crate::types::{Row, SqlType};

/// A single inferred column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    /// Column name, from the header or synthesized as `column_N`.
    pub name: String,
    /// Final inferred type.
    pub sql_type: SqlType,
    /// Whether any sampled value was null/empty.
    pub nullable: bool,
    /// Fraction of non-null sampled values that match the final type.
    ///
    /// 1.0 when no conflicting value was ever seen. 0.0 for an `empty`
    /// column, which is a different situation than low confidence.
    pub confidence: f64,
    /// Number of sampled values for this column, nulls included.
    pub sample_count: usize,
    /// Number of null/empty sampled values.
    pub null_count: usize,
    /// True when every sampled value was null: the TEXT type is a default,
    /// not an inference.
    pub empty: bool,
}

/// An inferred table schema: target table name plus ordered columns.
///
/// Built once per job via [`Schema::infer`] and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schema {
    /// Target table name.
    pub table_name: String,
    /// Ordered columns, one per source column.
    pub columns: Vec<Column>,
}

impl Schema {
    /// Infer a schema from a sample of rows.
    ///
    /// Two passes over the sample: the first walks each column's candidate
    /// type up the lattice and counts nulls, the second counts how many
    /// non-null values match the *final* type (the confidence numerator).
    /// The sample is bounded, so the second pass is bounded too.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::Schema`] if the sample contains no rows.
    pub fn infer(
        table_name: impl Into<String>,
        column_names: &[String],
        sample: &[Row],
    ) -> LoaderResult<Schema> {
        if sample.is_empty() {
            return Err(LoaderError::Schema {
                message: "no rows to sample: input has no data rows".to_string(),
            });
        }

        let mut candidates = vec![SqlType::Null; column_names.len()];
        let mut null_counts = vec![0usize; column_names.len()];

        for row in sample {
            debug_assert_eq!(row.len(), column_names.len());
            for (idx, field) in row.fields().iter().enumerate() {
                if field.is_null() {
                    null_counts[idx] += 1;
                } else {
                    candidates[idx] = candidates[idx].widened_to_accept(field.raw());
                }
            }
        }

        let mut matches = vec![0usize; column_names.len()];
        for row in sample {
            for (idx, field) in row.fields().iter().enumerate() {
                if !field.is_null() && candidates[idx].accepts(field.raw()) {
                    matches[idx] += 1;
                }
            }
        }

        let columns = column_names
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let sample_count = sample.len();
                let null_count = null_counts[idx];
                let non_null = sample_count - null_count;
                let empty = non_null == 0;
                let (sql_type, nullable, confidence) = if empty {
                    (SqlType::Text, true, 0.0)
                } else {
                    (
                        candidates[idx],
                        null_count > 0,
                        matches[idx] as f64 / non_null as f64,
                    )
                };
                Column {
                    name: name.clone(),
                    sql_type,
                    nullable,
                    confidence,
                    sample_count,
                    null_count,
                    empty,
                }
            })
            .collect();

        Ok(Schema {
            table_name: table_name.into(),
            columns,
        })
    }

    /// Generate the `CREATE TABLE` statement for this schema.
    pub fn create_table_sql(&self) -> String {
        let mut sql = format!("CREATE TABLE {} (\n", self.table_name);
        let column_defs: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                let nullable = if col.nullable { "" } else { " NOT NULL" };
                format!("  {} {}{}", col.name, col.sql_type.to_sql(), nullable)
            })
            .collect();
        sql.push_str(&column_defs.join(",\n"));
        sql.push_str("\n);");
        sql
    }

    /// Column names as a comma-separated list, for `COPY` statements.
    pub fn column_list_sql(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Validate a table name (basic SQL injection prevention).
    pub fn validate_table_name(name: &str) -> LoaderResult<()> {
        if name.is_empty() {
            return Err(LoaderError::Config {
                message: "table name cannot be empty".to_string(),
            });
        }

        let first = name.chars().next().expect("non-empty");
        if !first.is_alphabetic() && first != '_' {
            return Err(LoaderError::Config {
                message: format!("table name must start with a letter or underscore: {name}"),
            });
        }

        if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(LoaderError::Config {
                message: format!("table name contains invalid characters: {name}"),
            });
        }

        const KEYWORDS: &[&str] = &[
            "SELECT", "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "EXEC",
        ];
        if KEYWORDS.iter().any(|k| name.eq_ignore_ascii_case(k)) {
            return Err(LoaderError::Config {
                message: format!("table name cannot be a SQL keyword: {name}"),
            });
        }

        Ok(())
    }
}
