use std::marker::PhantomData;

use onegate_core::{Error, Json, RpcContext, Spec, SpecProvider};

use crate::db::Database;
use crate::entity::CrudModel;
use crate::page::{Page, Pageable};
use crate::query_config::QueryConfig;
use crate::search::SearchParams;

use super::{
    compile_plan, count_from_rows, decode_models, flat_query, make_processor, run_processor,
    scoped, search_conditions, BuilderMeta, Processor, FLAT_PARTS,
};

macro_rules! read_builder_common {
    () => {
        /// Override the default action name.
        pub fn action(mut self, action: impl Into<String>) -> Self {
            self.meta.action = Some(action.into());
            self
        }

        /// Override the default `<resource>:view` permission token.
        pub fn permission(mut self, token: impl Into<String>) -> Self {
            self.meta.permission = Some(token.into());
            self
        }

        /// Register without authentication.
        pub fn public_access(mut self) -> Self {
            self.meta.public = true;
            self
        }

        pub fn audited(mut self) -> Self {
            self.meta.audit = true;
            self
        }

        /// Shape the query: columns, relations, predicates, sorts, appliers.
        pub fn query(mut self, build: impl FnOnce(&mut QueryConfig)) -> Self {
            build(&mut self.config);
            self
        }

        /// Post-query processor over the decoded model rows.
        pub fn processor<F, Fut>(mut self, f: F) -> Self
        where
            F: Fn(RpcContext, Vec<M>) -> Fut + Send + Sync + 'static,
            Fut: std::future::Future<Output = Result<Vec<M>, Error>> + Send + 'static,
        {
            self.processor = Some(make_processor(f));
            self
        }
    };
}

pub(crate) use read_builder_common;

/// `find_one`: first row matching the search params; 1404 when none.
pub struct FindOne<M, P> {
    meta: BuilderMeta,
    config: QueryConfig,
    processor: Option<Processor<M>>,
    _marker: PhantomData<fn() -> (M, P)>,
}

impl<M: CrudModel, P: SearchParams> FindOne<M, P> {
    pub fn new() -> Self {
        Self {
            meta: BuilderMeta::default(),
            config: QueryConfig::new(),
            processor: None,
            _marker: PhantomData,
        }
    }

    read_builder_common!();
}

impl<M: CrudModel, P: SearchParams> Default for FindOne<M, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: CrudModel, P: SearchParams> SpecProvider for FindOne<M, P> {
    fn provide(self: Box<Self>, resource: &str) -> Result<Spec, Error> {
        let plan = compile_plan::<P>()?;
        let config = std::sync::Arc::new(self.config);
        let processor = self.processor;

        let handler = {
            let config = config.clone();
            move |ctx: RpcContext, db: Database| {
                let plan = plan.clone();
                let config = config.clone();
                let processor = processor.clone();
                async move {
                    let conditions = search_conditions(&plan, &config, FLAT_PARTS, &ctx);
                    let query = flat_query::<M>(&config, conditions, &db).limit(1);
                    let query = scoped(&ctx, M::table_name(), query).await?;
                    let (sql, params) = query.build_select();
                    let rows = db.fetch_all(&sql, &params).await?;
                    let models = decode_models::<M>(rows)?;
                    let mut models = run_processor(&processor, &ctx, models).await?;
                    if models.is_empty() {
                        return Err(Error::record_not_found(M::table_name()));
                    }
                    Ok(Json(models.remove(0)))
                }
            }
        };

        let action = self.meta.action("find_one").to_string();
        Ok(self
            .meta
            .spec("view", resource, Spec::handler(action, handler)))
    }
}

/// `find_all`: every row matching the search params, default sorts applied.
pub struct FindAll<M, P> {
    meta: BuilderMeta,
    config: QueryConfig,
    processor: Option<Processor<M>>,
    _marker: PhantomData<fn() -> (M, P)>,
}

impl<M: CrudModel, P: SearchParams> FindAll<M, P> {
    pub fn new() -> Self {
        Self {
            meta: BuilderMeta::default(),
            config: QueryConfig::new(),
            processor: None,
            _marker: PhantomData,
        }
    }

    read_builder_common!();
}

impl<M: CrudModel, P: SearchParams> Default for FindAll<M, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: CrudModel, P: SearchParams> SpecProvider for FindAll<M, P> {
    fn provide(self: Box<Self>, resource: &str) -> Result<Spec, Error> {
        let plan = compile_plan::<P>()?;
        let config = std::sync::Arc::new(self.config);
        let processor = self.processor;

        let handler = {
            let config = config.clone();
            move |ctx: RpcContext, db: Database| {
                let plan = plan.clone();
                let config = config.clone();
                let processor = processor.clone();
                async move {
                    let conditions = search_conditions(&plan, &config, FLAT_PARTS, &ctx);
                    let query = flat_query::<M>(&config, conditions, &db);
                    let query = scoped(&ctx, M::table_name(), query).await?;
                    let (sql, params) = query.build_select();
                    let rows = db.fetch_all(&sql, &params).await?;
                    let models = decode_models::<M>(rows)?;
                    let models = run_processor(&processor, &ctx, models).await?;
                    Ok(Json(models))
                }
            }
        };

        let action = self.meta.action("find_all").to_string();
        Ok(self
            .meta
            .spec("view", resource, Spec::handler(action, handler)))
    }
}

/// `find_page`: limit/offset page plus a parallel COUNT with identical
/// WHERE clauses.
pub struct FindPage<M, P> {
    meta: BuilderMeta,
    config: QueryConfig,
    processor: Option<Processor<M>>,
    _marker: PhantomData<fn() -> (M, P)>,
}

impl<M: CrudModel, P: SearchParams> FindPage<M, P> {
    pub fn new() -> Self {
        Self {
            meta: BuilderMeta::default(),
            config: QueryConfig::new(),
            processor: None,
            _marker: PhantomData,
        }
    }

    read_builder_common!();
}

impl<M: CrudModel, P: SearchParams> Default for FindPage<M, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: CrudModel, P: SearchParams> SpecProvider for FindPage<M, P> {
    fn provide(self: Box<Self>, resource: &str) -> Result<Spec, Error> {
        let plan = compile_plan::<P>()?;
        let config = std::sync::Arc::new(self.config);
        let processor = self.processor;

        let handler = {
            let config = config.clone();
            move |ctx: RpcContext, db: Database, pageable: Pageable| {
                let plan = plan.clone();
                let config = config.clone();
                let processor = processor.clone();
                async move {
                    let conditions = search_conditions(&plan, &config, FLAT_PARTS, &ctx);
                    let mut query = flat_query::<M>(&config, conditions, &db);
                    query = scoped(&ctx, M::table_name(), query).await?;
                    for sort in pageable.sorts() {
                        query = query.sort(sort);
                    }

                    let (count_sql, count_params) = query.build_count();
                    let (sql, params) = query
                        .limit(pageable.size)
                        .offset(pageable.offset())
                        .build_select();

                    let (rows, count_rows) = tokio::try_join!(
                        db.fetch_all(&sql, &params),
                        db.fetch_all(&count_sql, &count_params)
                    )?;

                    let total = count_from_rows(&count_rows);
                    let models = decode_models::<M>(rows)?;
                    let models = run_processor(&processor, &ctx, models).await?;
                    Ok(Json(Page::new(models, &pageable, total)))
                }
            }
        };

        let action = self.meta.action("find_page").to_string();
        Ok(self
            .meta
            .spec("view", resource, Spec::handler(action, handler)))
    }
}
