use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use plantwise_core::domain::tool::{ColumnSpec, Row, RowSet};
use plantwise_core::errors::ErrorKind;
use plantwise_core::sql::{classify, StatementKind};
use plantwise_core::stores::{RelationalStore, StoreError};
use serde_json::{Number, Value};
use sqlx::error::ErrorKind as DriverErrorKind;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

use crate::DbPool;

/// System of record backed by a SQLite pool.
#[derive(Clone)]
pub struct SqliteRelationalStore {
    pool: DbPool,
}

impl SqliteRelationalStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn run(&self, statement: &str) -> Result<RowSet, sqlx::Error> {
        if classify(statement) == StatementKind::Query {
            let rows = sqlx::query(statement).fetch_all(&self.pool).await?;
            let columns = rows
                .first()
                .map(|row| row.columns().iter().map(|column| column.name().to_string()).collect())
                .unwrap_or_default();
            let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
            Ok(RowSet { columns, rows, rows_affected: 0 })
        } else {
            let result = sqlx::query(statement).execute(&self.pool).await?;
            Ok(RowSet { columns: Vec::new(), rows: Vec::new(), rows_affected: result.rows_affected() })
        }
    }
}

#[async_trait]
impl RelationalStore for SqliteRelationalStore {
    async fn list_tables(&self) -> Result<BTreeSet<String>, StoreError> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') \
             AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| store_error(&error))?;
        Ok(names.into_iter().collect())
    }

    async fn describe_table(&self, table: &str) -> Result<Vec<ColumnSpec>, StoreError> {
        let columns = sqlx::query_as::<_, (String, String, i64, i64)>(
            "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| store_error(&error))?;

        Ok(columns
            .into_iter()
            .map(|(name, data_type, not_null, pk)| ColumnSpec {
                name,
                data_type: if data_type.is_empty() { "ANY".to_string() } else { data_type },
                nullable: not_null == 0 && pk == 0,
            })
            .collect())
    }

    async fn execute(&self, statement: &str, timeout: Duration) -> Result<RowSet, StoreError> {
        match tokio::time::timeout(timeout, self.run(statement)).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(error)) => Err(store_error(&error)),
            Err(_) => Err(StoreError::connectivity(format!(
                "statement did not complete within {}ms",
                timeout.as_millis()
            ))),
        }
    }
}

fn decode_row(row: &SqliteRow) -> Result<Row, sqlx::Error> {
    let mut decoded = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage = raw.type_info().name().to_ascii_uppercase();
            match storage.as_str() {
                "INTEGER" | "INT8" | "BIGINT" | "BOOLEAN" => {
                    Value::from(row.try_get_unchecked::<i64, _>(index)?)
                }
                "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => row
                    .try_get_unchecked::<f64, _>(index)
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                "BLOB" => {
                    let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
                    Value::String(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => Value::String(row.try_get_unchecked::<String, _>(index)?),
            }
        };
        decoded.insert(column.name().to_string(), value);
    }
    Ok(decoded)
}

/// Primary SQLite result codes for a database held by another connection.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Maps driver failures onto the tool failure taxonomy.
pub fn store_error(error: &sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Database(database) => {
            let message = database.message().to_string();
            let primary_code = database
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            if matches!(primary_code, Some(SQLITE_BUSY | SQLITE_LOCKED)) {
                return StoreError::connectivity(message);
            }
            if matches!(
                database.kind(),
                DriverErrorKind::UniqueViolation
                    | DriverErrorKind::ForeignKeyViolation
                    | DriverErrorKind::NotNullViolation
                    | DriverErrorKind::CheckViolation
            ) {
                return StoreError::new(ErrorKind::ConstraintViolation, message);
            }
            let lowered = message.to_ascii_lowercase();
            if lowered.contains("datatype mismatch") || lowered.contains("type mismatch") {
                StoreError::new(ErrorKind::TypeMismatchError, message)
            } else {
                StoreError::syntax(message)
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::new(ErrorKind::TypeMismatchError, error.to_string())
        }
        sqlx::Error::ColumnNotFound(_) | sqlx::Error::ColumnIndexOutOfBounds { .. } => {
            StoreError::syntax(error.to_string())
        }
        _ => StoreError::connectivity(error.to_string()),
    }
}
