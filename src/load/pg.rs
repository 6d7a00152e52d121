//! PostgreSQL connection, table admin, and the binary `COPY` sink.

use async_trait::async_trait;
use futures_util::pin_mut;
use tokio_postgres::binary_copy::BinaryCopyInWriter;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls};

use crate::error::{LoaderError, LoaderResult};
use crate::load::encode::{pg_type, BatchSink, EncodedBatch};
use crate::schema::Schema;
use crate::types::SqlType;

/// The single write connection for a load job.
///
/// Owned exclusively by the job for its duration; connection pooling or
/// reuse across jobs is a caller concern. Each batch is written as one
/// `COPY ... FROM STDIN BINARY` inside its own transaction, so a failure
/// affects at most one batch and already-committed batches survive.
pub struct PgLoader {
    client: Client,
    table_name: String,
    copy_statement: String,
    column_types: Vec<Type>,
}

impl PgLoader {
    /// Connect to PostgreSQL and bind the loader to a finalized schema.
    ///
    /// # Errors
    ///
    /// Returns [`LoaderError::Connection`] if the initial connect fails.
    pub async fn connect(conn_str: &str, schema: &Schema) -> LoaderResult<Self> {
        let (client, connection) =
            tokio_postgres::connect(conn_str, NoTls)
                .await
                .map_err(|e| LoaderError::Connection {
                    message: e.to_string(),
                })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "postgres connection task ended with error");
            }
        });

        let copy_statement = format!(
            "COPY {} ({}) FROM STDIN BINARY",
            schema.table_name,
            schema.column_list_sql()
        );
        let column_types = schema.columns.iter().map(|c| pg_type(c.sql_type)).collect();

        Ok(Self {
            client,
            table_name: schema.table_name.clone(),
            copy_statement,
            column_types,
        })
    }

    /// Bring the target table into a known-good state before the first batch.
    ///
    /// - `drop_table`: drop the table if present.
    /// - Missing table: create it from the schema's DDL when `create_table`
    ///   is set, otherwise fail with [`LoaderError::TableState`].
    /// - Existing table: verify name/order/type compatibility against
    ///   `information_schema` and append, or fail with
    ///   [`LoaderError::TableState`]. Inserting into an unvalidated table is
    ///   never attempted.
    pub async fn prepare_table(
        &self,
        schema: &Schema,
        drop_table: bool,
        create_table: bool,
    ) -> LoaderResult<()> {
        if drop_table {
            tracing::debug!(table = %self.table_name, "dropping table");
            self.client
                .execute(&format!("DROP TABLE IF EXISTS {}", self.table_name), &[])
                .await?;
        }

        if self.table_exists().await? {
            self.verify_compatible(schema).await
        } else if create_table {
            tracing::debug!(table = %self.table_name, "creating table");
            self.client.batch_execute(&schema.create_table_sql()).await?;
            Ok(())
        } else {
            Err(LoaderError::TableState {
                message: format!(
                    "table '{}' does not exist (enable create_table or create it first)",
                    self.table_name
                ),
            })
        }
    }

    async fn table_exists(&self) -> LoaderResult<bool> {
        let row = self
            .client
            .query_one(
                "SELECT EXISTS (
                    SELECT FROM information_schema.tables
                    WHERE table_schema = 'public'
                    AND table_name = $1
                )",
                &[&self.table_name],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn verify_compatible(&self, schema: &Schema) -> LoaderResult<()> {
        let rows = self
            .client
            .query(
                "SELECT column_name, data_type
                 FROM information_schema.columns
                 WHERE table_schema = 'public' AND table_name = $1
                 ORDER BY ordinal_position",
                &[&self.table_name],
            )
            .await?;

        if rows.len() != schema.columns.len() {
            return Err(LoaderError::TableState {
                message: format!(
                    "table '{}' has {} columns, inferred schema has {}",
                    self.table_name,
                    rows.len(),
                    schema.columns.len()
                ),
            });
        }

        for (row, column) in rows.iter().zip(&schema.columns) {
            let name: &str = row.get(0);
            let data_type: &str = row.get(1);
            if !name.eq_ignore_ascii_case(&column.name) {
                return Err(LoaderError::TableState {
                    message: format!(
                        "table '{}' column '{}' does not match inferred column '{}'",
                        self.table_name, name, column.name
                    ),
                });
            }
            let expected = information_schema_type(column.sql_type);
            if !data_type.eq_ignore_ascii_case(expected) {
                return Err(LoaderError::TableState {
                    message: format!(
                        "table '{}' column '{}' is {}, inferred type is {}",
                        self.table_name, name, data_type, expected
                    ),
                });
            }
        }
        Ok(())
    }
}

/// The `data_type` name `information_schema.columns` reports for an inferred
/// type.
fn information_schema_type(sql_type: SqlType) -> &'static str {
    match sql_type {
        SqlType::Null | SqlType::Text => "text",
        SqlType::Boolean => "boolean",
        SqlType::SmallInt => "smallint",
        SqlType::Integer => "integer",
        SqlType::BigInt => "bigint",
        SqlType::Real => "real",
        SqlType::DoublePrecision => "double precision",
        SqlType::Timestamp => "timestamp without time zone",
        SqlType::Date => "date",
    }
}

#[async_trait]
impl BatchSink for PgLoader {
    async fn write_batch(&mut self, batch: &EncodedBatch) -> LoaderResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        // One transaction per batch: commit or full rollback (on drop).
        let tx = self.client.transaction().await?;
        let sink = tx.copy_in(self.copy_statement.as_str()).await?;
        let writer = BinaryCopyInWriter::new(sink, &self.column_types);
        pin_mut!(writer);

        for row in &batch.rows {
            let values: Vec<&(dyn ToSql + Sync)> =
                row.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
            writer.as_mut().write(&values).await?;
        }

        let rows = writer.finish().await?;
        tx.commit().await?;
        tracing::debug!(batch_index = batch.index, rows, "batch committed");
        Ok(rows)
    }
}
