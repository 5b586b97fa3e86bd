use std::any::type_name;
use std::future::Future;
use std::ops::Deref;

use serde::de::DeserializeOwned;

use crate::context::{RequestLogger, RpcContext, Transformer, WithLogger};
use crate::envelope::FileBag;
use crate::error::Error;
use crate::principal::Principal;

/// Extraction of one handler parameter from the request scope.
///
/// This is the request-time half of the bind plan: each handler argument
/// type declares how it is produced from the [`RpcContext`]. Extractors run
/// sequentially, in the handler's declaration order.
pub trait FromRpcContext: Sized + Send {
    fn from_context(ctx: &RpcContext) -> impl Future<Output = Result<Self, Error>> + Send;
}

impl FromRpcContext for RpcContext {
    async fn from_context(ctx: &RpcContext) -> Result<Self, Error> {
        Ok(ctx.clone())
    }
}

/// A required principal. Absence (public action invoked anonymously) is a
/// `MISSING_CONTEXT` error at request time.
impl FromRpcContext for Principal {
    async fn from_context(ctx: &RpcContext) -> Result<Self, Error> {
        ctx.require_principal().cloned()
    }
}

impl FromRpcContext for Option<Principal> {
    async fn from_context(ctx: &RpcContext) -> Result<Self, Error> {
        Ok(ctx.principal().cloned())
    }
}

impl FromRpcContext for RequestLogger {
    async fn from_context(ctx: &RpcContext) -> Result<Self, Error> {
        Ok(ctx.logger())
    }
}

/// The multipart side channel. File and surplus text parts bind by form
/// field name through [`FileBag::file`] / [`FileBag::files`].
pub struct Files(pub FileBag);

impl Deref for Files {
    type Target = FileBag;
    fn deref(&self) -> &FileBag {
        &self.0
    }
}

impl FromRpcContext for Files {
    async fn from_context(ctx: &RpcContext) -> Result<Self, Error> {
        Ok(Files(ctx.files().clone()))
    }
}

impl FromRpcContext for Transformer {
    async fn from_context(ctx: &RpcContext) -> Result<Self, Error> {
        ctx.injector()
            .try_get::<Transformer>()
            .ok_or_else(|| Error::missing_context(type_name::<Transformer>()))
    }
}

/// A value resolved from the injector (registered resolvers: DB handle,
/// scheduler handles, plugin services). Missing registration at request time
/// is `MISSING_CONTEXT`; factories resolving at registration time go through
/// [`Injector::get`](crate::injector::Injector::get) instead and get
/// `UNRESOLVED_PARAMETER`.
pub struct Injected<T>(pub T);

impl<T> Deref for Injected<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Clone + Send + Sync + 'static> FromRpcContext for Injected<T> {
    async fn from_context(ctx: &RpcContext) -> Result<Self, Error> {
        ctx.injector()
            .try_get::<T>()
            .map(Injected)
            .ok_or_else(|| Error::missing_context(type_name::<T>()))
    }
}

/// An injector value re-scoped to the request: the stored instance's
/// [`WithLogger::with_logger`] produces a copy whose logging carries the
/// request id.
pub struct Scoped<T>(pub T);

impl<T> Deref for Scoped<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: WithLogger + Clone + Send + Sync + 'static> FromRpcContext for Scoped<T> {
    async fn from_context(ctx: &RpcContext) -> Result<Self, Error> {
        let value = ctx
            .injector()
            .try_get::<T>()
            .ok_or_else(|| Error::missing_context(type_name::<T>()))?;
        Ok(Scoped(value.with_logger(ctx.logger())))
    }
}

/// The envelope's `params` object decoded into a typed value.
///
/// Pipeline: JSON decode → mold transformation (when a plan is registered
/// for `T`) → struct decode → validation. Transformation therefore runs
/// before validation, and only authorized requests ever reach this point.
#[derive(Debug)]
pub struct Params<T>(pub T);

impl<T> Deref for Params<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> FromRpcContext for Params<T>
where
    T: DeserializeOwned + garde::Validate + Send + 'static,
    <T as garde::Validate>::Context: Default,
{
    async fn from_context(ctx: &RpcContext) -> Result<Self, Error> {
        let mut value = ctx.params_value();

        if let Some(transformer) = ctx.injector().try_get::<Transformer>() {
            transformer.apply::<T>(&mut value, ctx).await?;
        }

        let typed: T = serde_json::from_value(value)?;
        typed.validate().map_err(|report| {
            let details: Vec<String> = report
                .iter()
                .map(|(path, err)| format!("{path}: {err}"))
                .collect();
            Error::validation(details.join("; "))
        })?;
        Ok(Params(typed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::RpcRequest;
    use crate::injector::Injector;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Deserialize, garde::Validate)]
    struct CreateUser {
        #[garde(length(min = 1))]
        username: String,
        #[garde(skip)]
        #[serde(default)]
        nickname: Option<String>,
    }

    fn ctx_with_params(params: serde_json::Value) -> RpcContext {
        let mut request = RpcRequest::new("sys/user", "create");
        request.params = match params {
            serde_json::Value::Object(map) => map,
            _ => panic!("params must be an object"),
        };
        RpcContext::builder(request).build()
    }

    #[tokio::test]
    async fn params_decode_and_validate() {
        let ctx = ctx_with_params(serde_json::json!({"username": "alice"}));
        let Params(p) = Params::<CreateUser>::from_context(&ctx).await.unwrap();
        assert_eq!(p.username, "alice");
        assert!(p.nickname.is_none());
    }

    #[tokio::test]
    async fn params_validation_failure_is_1400() {
        let ctx = ctx_with_params(serde_json::json!({"username": ""}));
        let err = Params::<CreateUser>::from_context(&ctx).await.unwrap_err();
        assert_eq!(err.code(), crate::error::code::VALIDATION_FAILED);
    }

    #[tokio::test]
    async fn missing_principal_is_missing_context() {
        let ctx = RpcContext::builder(RpcRequest::new("sys/user", "find_one")).build();
        let err = Principal::from_context(&ctx).await.unwrap_err();
        assert_eq!(err.code(), crate::error::code::MISSING_CONTEXT);
    }

    #[derive(Clone)]
    struct Service {
        tag: &'static str,
    }

    #[tokio::test]
    async fn injected_resolves_from_injector() {
        let injector = Arc::new(Injector::builder().provide(Service { tag: "db" }).build());
        let ctx = RpcContext::builder(RpcRequest::new("sys/user", "find_one"))
            .injector(injector)
            .build();
        let Injected(svc) = Injected::<Service>::from_context(&ctx).await.unwrap();
        assert_eq!(svc.tag, "db");
    }

    #[derive(Clone)]
    struct LoggingService {
        request_id: Option<String>,
    }

    impl WithLogger for LoggingService {
        fn with_logger(&self, logger: RequestLogger) -> Self {
            Self {
                request_id: Some(logger.request_id().to_string()),
            }
        }
    }

    #[tokio::test]
    async fn scoped_rebinds_with_request_logger() {
        let injector = Arc::new(
            Injector::builder()
                .provide(LoggingService { request_id: None })
                .build(),
        );
        let ctx = RpcContext::builder(RpcRequest::new("sys/user", "find_one"))
            .injector(injector)
            .request_id("req-1")
            .build();
        let Scoped(svc) = Scoped::<LoggingService>::from_context(&ctx).await.unwrap();
        assert_eq!(svc.request_id.as_deref(), Some("req-1"));
    }
}
