use async_trait::async_trait;

use onegate_core::{Error, RpcContext};

use crate::db::{DbTransaction, JsonRow};

/// Lifecycle hooks for the create builders.
///
/// Pre-hooks run before the transaction opens and may short-circuit with an
/// error; post-hooks run inside the transaction, and an error rolls back
/// everything written so far.
#[async_trait]
pub trait CreateHooks<M: Send + Sync, P: Send + Sync>: Send + Sync {
    async fn pre_create(&self, ctx: &RpcContext, model: &mut M, params: &P) -> Result<(), Error> {
        let _ = (ctx, model, params);
        Ok(())
    }

    async fn post_create(
        &self,
        ctx: &RpcContext,
        tx: &mut dyn DbTransaction,
        model: &M,
        params: &P,
    ) -> Result<(), Error> {
        let _ = (ctx, tx, model, params);
        Ok(())
    }
}

#[async_trait]
pub trait UpdateHooks<M: Send + Sync, P: Send + Sync>: Send + Sync {
    async fn pre_update(
        &self,
        ctx: &RpcContext,
        old: &M,
        new: &mut M,
        params: &P,
    ) -> Result<(), Error> {
        let _ = (ctx, old, new, params);
        Ok(())
    }

    async fn post_update(
        &self,
        ctx: &RpcContext,
        tx: &mut dyn DbTransaction,
        old: &M,
        new: &M,
        params: &P,
    ) -> Result<(), Error> {
        let _ = (ctx, tx, old, new, params);
        Ok(())
    }
}

#[async_trait]
pub trait DeleteHooks<M: Send + Sync>: Send + Sync {
    async fn pre_delete(&self, ctx: &RpcContext, model: &M) -> Result<(), Error> {
        let _ = (ctx, model);
        Ok(())
    }

    async fn post_delete(
        &self,
        ctx: &RpcContext,
        tx: &mut dyn DbTransaction,
        model: &M,
    ) -> Result<(), Error> {
        let _ = (ctx, tx, model);
        Ok(())
    }
}

/// Row-level hooks for the import builder. `pre_import` validates each
/// parsed row before the transaction; `post_import` runs once inside it.
#[async_trait]
pub trait ImportHooks<M: Send + Sync>: Send + Sync {
    async fn pre_import(&self, ctx: &RpcContext, index: usize, model: &mut M) -> Result<(), Error> {
        let _ = (ctx, index, model);
        Ok(())
    }

    async fn post_import(
        &self,
        ctx: &RpcContext,
        tx: &mut dyn DbTransaction,
        models: &[M],
    ) -> Result<(), Error> {
        let _ = (ctx, tx, models);
        Ok(())
    }
}

/// Pre-export hook: mutate or mask rows before encoding.
#[async_trait]
pub trait ExportHooks: Send + Sync {
    async fn pre_export(&self, ctx: &RpcContext, rows: &mut Vec<JsonRow>) -> Result<(), Error> {
        let _ = (ctx, rows);
        Ok(())
    }
}

/// The default no-op hook set.
pub struct NoHooks;

#[async_trait]
impl<M: Send + Sync, P: Send + Sync> CreateHooks<M, P> for NoHooks {}

#[async_trait]
impl<M: Send + Sync, P: Send + Sync> UpdateHooks<M, P> for NoHooks {}

#[async_trait]
impl<M: Send + Sync> DeleteHooks<M> for NoHooks {}

#[async_trait]
impl<M: Send + Sync> ImportHooks<M> for NoHooks {}

#[async_trait]
impl ExportHooks for NoHooks {}
