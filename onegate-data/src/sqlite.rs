//! SQLite driver for the [`Db`](crate::db::Db) collaborator, backed by
//! sqlx. Enabled through the `sqlite` feature.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Column, Row, TypeInfo};

use onegate_core::Error;

use crate::db::{Db, DbTransaction, JsonRow};
use crate::select::Dialect;
use crate::value::SqlValue;

/// [`Db`] implementation over a sqlx SQLite pool.
#[derive(Clone)]
pub struct SqliteDb {
    pool: SqlitePool,
}

impl SqliteDb {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn bind_params<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    params: &'q [SqlValue],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Int(i) => query.bind(*i),
            SqlValue::Float(f) => query.bind(*f),
            SqlValue::Text(s) => query.bind(s.as_str()),
        };
    }
    query
}

fn row_to_json(row: &SqliteRow) -> Result<JsonRow, Error> {
    let mut out = JsonRow::new();
    for (index, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let type_name = column.type_info().name().to_uppercase();

        let value = match type_name.as_str() {
            "INTEGER" => row
                .try_get::<Option<i64>, _>(index)
                .map(|v| v.map(Value::from).unwrap_or(Value::Null)),
            "REAL" => row
                .try_get::<Option<f64>, _>(index)
                .map(|v| v.map(Value::from).unwrap_or(Value::Null)),
            "BOOLEAN" => row
                .try_get::<Option<bool>, _>(index)
                .map(|v| v.map(Value::from).unwrap_or(Value::Null)),
            _ => row
                .try_get::<Option<String>, _>(index)
                .map(|v| v.map(Value::from).unwrap_or(Value::Null)),
        };

        let value = value.map_err(|e| Error::internal("failed to decode column").with_cause(e))?;
        out.insert(name, value);
    }
    Ok(out)
}

fn db_error(err: sqlx::Error) -> Error {
    match &err {
        sqlx::Error::RowNotFound => Error::record_not_found("row"),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::conflict("unique constraint violated").with_cause(err)
        }
        _ => Error::internal("database error").with_cause(err),
    }
}

#[async_trait]
impl Db for SqliteDb {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<JsonRow>, Error> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter().map(row_to_json).collect()
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, Error> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn begin(&self) -> Result<Box<dyn DbTransaction>, Error> {
        let tx = self.pool.begin().await.map_err(db_error)?;
        Ok(Box::new(SqliteTx { tx }))
    }
}

struct SqliteTx {
    tx: sqlx::Transaction<'static, sqlx::Sqlite>,
}

#[async_trait]
impl DbTransaction for SqliteTx {
    async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<JsonRow>, Error> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        rows.iter().map(row_to_json).collect()
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, Error> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        self.tx.commit().await.map_err(db_error)
    }

    async fn rollback(self: Box<Self>) -> Result<(), Error> {
        self.tx.rollback().await.map_err(db_error)
    }
}
