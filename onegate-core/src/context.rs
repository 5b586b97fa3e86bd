use std::any::TypeId;
use std::net::IpAddr;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::envelope::{FileBag, RpcRequest};
use crate::error::Error;
use crate::injector::Injector;
use crate::principal::Principal;
use crate::registry::Identifier;

/// Snapshot of the matched definition's metadata, carried in the request
/// context so downstream components (CRUD builders, audit) can see which
/// operation is executing and under which permission token.
#[derive(Debug, Clone)]
pub struct DefinitionMeta {
    pub identifier: Identifier,
    pub public: bool,
    pub permission: Option<String>,
    pub audit: bool,
}

impl DefinitionMeta {
    /// Placeholder metadata for contexts built outside the dispatcher
    /// (tests, background work).
    pub fn detached() -> Self {
        Self {
            identifier: Identifier::new("", "", ""),
            public: true,
            permission: None,
            audit: false,
        }
    }
}

struct ContextInner {
    request: RpcRequest,
    files: FileBag,
    principal: Option<Principal>,
    injector: Arc<Injector>,
    definition: DefinitionMeta,
    request_id: String,
    remote_ip: Option<IpAddr>,
    cancel: CancellationToken,
}

/// The request-scoped value container threaded through authentication,
/// parameter resolution and handler execution. Cheap to clone.
#[derive(Clone)]
pub struct RpcContext {
    inner: Arc<ContextInner>,
}

impl RpcContext {
    pub fn builder(request: RpcRequest) -> RpcContextBuilder {
        RpcContextBuilder {
            request,
            files: FileBag::default(),
            principal: None,
            injector: None,
            definition: None,
            request_id: None,
            remote_ip: None,
            cancel: None,
        }
    }

    pub fn request(&self) -> &RpcRequest {
        &self.inner.request
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.inner.request.params
    }

    pub fn params_value(&self) -> Value {
        self.inner.request.params_value()
    }

    pub fn meta(&self) -> &Map<String, Value> {
        &self.inner.request.meta
    }

    pub fn files(&self) -> &FileBag {
        &self.inner.files
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.inner.principal.as_ref()
    }

    pub fn require_principal(&self) -> Result<&Principal, Error> {
        self.inner
            .principal
            .as_ref()
            .ok_or_else(|| Error::missing_context("Principal"))
    }

    pub fn injector(&self) -> &Injector {
        &self.inner.injector
    }

    pub fn definition(&self) -> &DefinitionMeta {
        &self.inner.definition
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    pub fn remote_ip(&self) -> Option<IpAddr> {
        self.inner.remote_ip
    }

    /// Cancellation of the inbound connection. Long-running handlers should
    /// select against this.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Request-scoped logger carrying the request id.
    pub fn logger(&self) -> RequestLogger {
        RequestLogger::new(self.inner.request_id.clone())
    }
}

pub struct RpcContextBuilder {
    request: RpcRequest,
    files: FileBag,
    principal: Option<Principal>,
    injector: Option<Arc<Injector>>,
    definition: Option<DefinitionMeta>,
    request_id: Option<String>,
    remote_ip: Option<IpAddr>,
    cancel: Option<CancellationToken>,
}

impl RpcContextBuilder {
    pub fn files(mut self, files: FileBag) -> Self {
        self.files = files;
        self
    }

    pub fn principal(mut self, principal: Option<Principal>) -> Self {
        self.principal = principal;
        self
    }

    pub fn injector(mut self, injector: Arc<Injector>) -> Self {
        self.injector = Some(injector);
        self
    }

    pub fn definition(mut self, definition: DefinitionMeta) -> Self {
        self.definition = Some(definition);
        self
    }

    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn remote_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.remote_ip = ip;
        self
    }

    pub fn cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> RpcContext {
        RpcContext {
            inner: Arc::new(ContextInner {
                request: self.request,
                files: self.files,
                principal: self.principal,
                injector: self
                    .injector
                    .unwrap_or_else(|| Arc::new(Injector::empty())),
                definition: self.definition.unwrap_or_else(DefinitionMeta::detached),
                request_id: self
                    .request_id
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                remote_ip: self.remote_ip,
                cancel: self.cancel.unwrap_or_default(),
            }),
        }
    }
}

// ── Request-scoped logging ──────────────────────────────────────────────────

/// A logger whose span carries the request id, handed to handlers and to
/// values implementing [`WithLogger`].
#[derive(Clone)]
pub struct RequestLogger {
    request_id: String,
    span: Span,
}

impl RequestLogger {
    pub fn new(request_id: String) -> Self {
        let span = tracing::info_span!("rpc", request_id = %request_id);
        Self { request_id, span }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn info(&self, message: &str) {
        let _guard = self.span.enter();
        tracing::info!("{message}");
    }

    pub fn warn(&self, message: &str) {
        let _guard = self.span.enter();
        tracing::warn!("{message}");
    }

    pub fn debug(&self, message: &str) {
        let _guard = self.span.enter();
        tracing::debug!("{message}");
    }
}

/// Implemented by injectable services that want a request-scoped copy whose
/// logging carries the request id. The `Scoped<T>` extractor calls this and
/// hands the returned copy to the handler.
pub trait WithLogger {
    fn with_logger(&self, logger: RequestLogger) -> Self;
}

// ── Params transformation hook ──────────────────────────────────────────────

/// Object-safe hook the mold subsystem implements. Runs on the decoded
/// `params` JSON value before struct decode and validation.
pub trait ValueTransform: Send + Sync {
    fn transform<'a>(
        &'a self,
        type_id: TypeId,
        value: &'a mut Value,
        ctx: &'a RpcContext,
    ) -> futures_util::future::BoxFuture<'a, Result<(), Error>>;

    /// Whether a field plan is registered for the given type. Lets the
    /// `Params<T>` extractor skip the async hop entirely.
    fn has_plan(&self, type_id: TypeId) -> bool;
}

/// Clonable handle to the registered [`ValueTransform`], extractable as a
/// handler parameter.
#[derive(Clone)]
pub struct Transformer(pub Arc<dyn ValueTransform>);

impl Transformer {
    pub async fn apply<T: 'static>(&self, value: &mut Value, ctx: &RpcContext) -> Result<(), Error> {
        let type_id = TypeId::of::<T>();
        if !self.0.has_plan(type_id) {
            return Ok(());
        }
        self.0.transform(type_id, value, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let ctx = RpcContext::builder(RpcRequest::new("sys/user", "find_one")).build();
        assert!(ctx.principal().is_none());
        assert!(!ctx.request_id().is_empty());
        assert!(ctx.definition().public);
    }

    #[test]
    fn require_principal_maps_to_missing_context() {
        let ctx = RpcContext::builder(RpcRequest::new("sys/user", "find_one")).build();
        let err = ctx.require_principal().unwrap_err();
        assert_eq!(err.code(), crate::error::code::MISSING_CONTEXT);
    }
}
