use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use onegate_core::{Error, FromRpcContext, RpcContext};

use crate::select::Dialect;
use crate::value::SqlValue;

/// A decoded result row: column name → JSON value.
pub type JsonRow = serde_json::Map<String, Value>;

/// The database collaborator the framework executes through. Concrete SQL
/// generation stays in this crate's builders; drivers only run finished
/// statements.
#[async_trait]
pub trait Db: Send + Sync {
    fn dialect(&self) -> Dialect {
        Dialect::Generic
    }

    async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<JsonRow>, Error>;

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, Error>;

    async fn begin(&self) -> Result<Box<dyn DbTransaction>, Error>;
}

/// A live transaction. Mutation builders run their statements and post-hooks
/// against this; any error triggers [`rollback`](Self::rollback).
#[async_trait]
pub trait DbTransaction: Send {
    async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<JsonRow>, Error>;

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, Error>;

    async fn commit(self: Box<Self>) -> Result<(), Error>;

    async fn rollback(self: Box<Self>) -> Result<(), Error>;
}

/// Clonable handle to the configured [`Db`], extractable as a handler
/// parameter (resolved from the injector).
#[derive(Clone)]
pub struct Database(Arc<dyn Db>);

impl Database {
    pub fn new(db: impl Db + 'static) -> Self {
        Self(Arc::new(db))
    }

    pub fn from_arc(db: Arc<dyn Db>) -> Self {
        Self(db)
    }

    pub fn dialect(&self) -> Dialect {
        self.0.dialect()
    }

    pub async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<JsonRow>, Error> {
        self.0.fetch_all(sql, params).await
    }

    pub async fn fetch_one(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<JsonRow>, Error> {
        let mut rows = self.0.fetch_all(sql, params).await?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.remove(0)))
        }
    }

    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, Error> {
        self.0.execute(sql, params).await
    }

    pub async fn begin(&self) -> Result<Box<dyn DbTransaction>, Error> {
        self.0.begin().await
    }
}

impl FromRpcContext for Database {
    async fn from_context(ctx: &RpcContext) -> Result<Self, Error> {
        ctx.injector()
            .try_get::<Database>()
            .ok_or_else(|| Error::missing_context("Database"))
    }
}
