use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::context::RpcContext;
use crate::envelope::{FileBag, RpcRequest, RpcResponse};
use crate::error::{Error, ErrorKind};
use crate::handler::{BoxFuture, FilePayload, Reply};
use crate::injector::Injector;
use crate::principal::Principal;
use crate::registry::{ApiRegistry, Definition, Identifier, RateLimitSpec};

/// Which envelope endpoint a call arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressKind {
    /// `POST /api` — bearer-token (or `?__accessToken=`) authentication.
    Api,
    /// `POST /openapi` — HMAC signature authentication, never query-based.
    OpenApi,
}

/// Credentials extracted from transport headers before dispatch.
#[derive(Debug, Clone)]
pub enum IngressCredentials {
    None,
    Token(String),
    Signature {
        app_id: String,
        timestamp: i64,
        nonce: String,
        signature: String,
    },
}

impl IngressCredentials {
    pub fn is_none(&self) -> bool {
        matches!(self, IngressCredentials::None)
    }
}

/// Strategy hook mapping transport credentials onto a [`Principal`].
/// Implemented by the security crate's auth manager. The client IP feeds
/// per-app whitelists in signature authentication.
pub trait RequestAuthenticator: Send + Sync {
    fn authenticate<'a>(
        &'a self,
        credentials: &'a IngressCredentials,
        remote_ip: Option<IpAddr>,
    ) -> BoxFuture<'a, Result<Principal, Error>>;
}

/// Permission-token check, run when a definition declares one.
pub trait PermissionGate: Send + Sync {
    fn check<'a>(
        &'a self,
        principal: &'a Principal,
        token: &'a str,
    ) -> BoxFuture<'a, Result<bool, Error>>;
}

/// Token-bucket admission check keyed by caller and identifier.
pub trait RateGate: Send + Sync {
    fn try_acquire(&self, key: &str, max: u64, window: Duration) -> bool;
}

/// One audited invocation.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub request_id: String,
    pub identifier: Identifier,
    pub principal_id: Option<String>,
    pub code: i32,
    pub duration: Duration,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Default sink: structured log line per audited call.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        tracing::info!(
            target: "onegate::audit",
            request_id = %event.request_id,
            identifier = %event.identifier,
            principal = event.principal_id.as_deref().unwrap_or("-"),
            code = event.code,
            duration_ms = event.duration.as_millis() as u64,
            "audit"
        );
    }
}

/// Framework-level dispatch defaults.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub default_timeout: Duration,
    /// Bucket applied when a definition declares no rate limit. `None`
    /// disables the default limiter.
    pub default_rate: Option<RateLimitSpec>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            default_rate: None,
        }
    }
}

/// A fully decoded inbound call, ready for dispatch.
pub struct IncomingCall {
    pub ingress: IngressKind,
    pub request: RpcRequest,
    pub files: FileBag,
    pub credentials: IngressCredentials,
    pub remote_ip: Option<IpAddr>,
    pub cancel: CancellationToken,
}

impl IncomingCall {
    pub fn new(ingress: IngressKind, request: RpcRequest) -> Self {
        Self {
            ingress,
            request,
            files: FileBag::default(),
            credentials: IngressCredentials::None,
            remote_ip: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn credentials(mut self, credentials: IngressCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn files(mut self, files: FileBag) -> Self {
        self.files = files;
        self
    }

    pub fn remote_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.remote_ip = ip;
        self
    }
}

/// What goes back over HTTP: a status plus either the JSON result envelope
/// or a binary file payload.
#[derive(Debug)]
pub struct HttpReply {
    pub status: u16,
    pub body: ReplyBody,
}

#[derive(Debug)]
pub enum ReplyBody {
    Envelope(RpcResponse),
    File(FilePayload),
}

impl HttpReply {
    fn ok_envelope(response: RpcResponse) -> Self {
        Self {
            status: 200,
            body: ReplyBody::Envelope(response),
        }
    }

    fn error(status: u16, err: &Error) -> Self {
        Self {
            status,
            body: ReplyBody::Envelope(RpcResponse::from_error(err)),
        }
    }

    pub fn envelope(&self) -> Option<&RpcResponse> {
        match &self.body {
            ReplyBody::Envelope(resp) => Some(resp),
            ReplyBody::File(_) => None,
        }
    }
}

/// The invocation engine: drives decode → authenticate → authorize →
/// resolve → invoke → encode for every inbound call.
pub struct Dispatcher {
    registry: Arc<ApiRegistry>,
    injector: Arc<Injector>,
    authenticator: Option<Arc<dyn RequestAuthenticator>>,
    permissions: Option<Arc<dyn PermissionGate>>,
    rate_gate: Option<Arc<dyn RateGate>>,
    audit: Arc<dyn AuditSink>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn builder(registry: Arc<ApiRegistry>, injector: Arc<Injector>) -> DispatcherBuilder {
        DispatcherBuilder {
            registry,
            injector,
            authenticator: None,
            permissions: None,
            rate_gate: None,
            audit: None,
            config: DispatchConfig::default(),
        }
    }

    pub async fn dispatch(&self, call: IncomingCall) -> HttpReply {
        let request_id = uuid::Uuid::new_v4().to_string();
        let identifier = Identifier::new(
            call.request.resource.clone(),
            call.request.action.clone(),
            call.request.version.clone(),
        );

        let Some(definition) = self.registry.lookup(&identifier) else {
            return HttpReply::error(404, &Error::identifier_not_found(&identifier));
        };

        // Authentication. Non-public actions demand a verified principal;
        // public actions on /api still verify a token when one is present.
        let principal = match self.authenticate(definition, &call).await {
            Ok(principal) => principal,
            Err(err) => return HttpReply::error(401, &err),
        };

        // Authorization precedes parameter decode: the bind plan (and with
        // it any transformation side effects) runs only for allowed callers.
        if let Some(token) = &definition.permission {
            match self.authorize(principal.as_ref(), token).await {
                Ok(true) => {}
                Ok(false) => {
                    return HttpReply::ok_envelope(RpcResponse::from_error(&Error::forbidden(
                        format!("missing permission '{token}'"),
                    )))
                }
                Err(err) => return HttpReply::ok_envelope(RpcResponse::from_error(&err)),
            }
        }

        if !self.admit(definition, principal.as_ref(), call.remote_ip, &identifier) {
            return HttpReply::ok_envelope(RpcResponse::from_error(&Error::rate_limited()));
        }

        let ctx = RpcContext::builder(call.request)
            .files(call.files)
            .principal(principal.clone())
            .injector(self.injector.clone())
            .definition(definition.meta())
            .request_id(request_id.clone())
            .remote_ip(call.remote_ip)
            .cancellation(call.cancel)
            .build();

        let started = Instant::now();
        let timeout = definition.timeout.unwrap_or(self.config.default_timeout);
        let outcome = self.invoke(definition, ctx, timeout).await;

        let (reply, code) = match outcome {
            Invocation::Reply(Reply::Json(data)) => {
                (HttpReply::ok_envelope(RpcResponse::ok(data)), 0)
            }
            Invocation::Reply(Reply::File(payload)) => (
                HttpReply {
                    status: 200,
                    body: ReplyBody::File(payload),
                },
                0,
            ),
            Invocation::Failed(err) => {
                let code = err.code();
                (HttpReply::ok_envelope(RpcResponse::from_error(&err)), code)
            }
            Invocation::Panicked(err) => {
                let code = err.code();
                (HttpReply::error(500, &err), code)
            }
        };

        if definition.audit {
            self.audit.record(&AuditEvent {
                request_id,
                identifier,
                principal_id: principal.map(|p| p.id),
                code,
                duration: started.elapsed(),
            });
        }

        reply
    }

    async fn authenticate(
        &self,
        definition: &Definition,
        call: &IncomingCall,
    ) -> Result<Option<Principal>, Error> {
        if definition.public && call.credentials.is_none() {
            return Ok(None);
        }

        if call.credentials.is_none() {
            return Err(Error::unauthenticated("missing credentials"));
        }

        let Some(authenticator) = &self.authenticator else {
            if definition.public {
                return Ok(None);
            }
            return Err(Error::unauthenticated("no authenticator configured"));
        };

        match authenticator.authenticate(&call.credentials, call.remote_ip).await {
            Ok(principal) => Ok(Some(principal)),
            Err(err) => {
                warn!(code = err.code(), "authentication failed");
                Err(err)
            }
        }
    }

    async fn authorize(&self, principal: Option<&Principal>, token: &str) -> Result<bool, Error> {
        let Some(principal) = principal else {
            return Ok(false);
        };
        let Some(gate) = &self.permissions else {
            return Ok(false);
        };
        gate.check(principal, token).await
    }

    fn admit(
        &self,
        definition: &Definition,
        principal: Option<&Principal>,
        remote_ip: Option<IpAddr>,
        identifier: &Identifier,
    ) -> bool {
        let Some(limit) = definition.rate_limit.or(self.config.default_rate) else {
            return true;
        };
        let Some(gate) = &self.rate_gate else {
            return true;
        };

        let caller = principal
            .map(|p| p.id.clone())
            .or_else(|| remote_ip.map(|ip| ip.to_string()))
            .unwrap_or_else(|| "anonymous".to_string());
        let key = format!("{caller}:{identifier}");
        gate.try_acquire(&key, limit.max, limit.window)
    }

    async fn invoke(&self, definition: &Definition, ctx: RpcContext, timeout: Duration) -> Invocation {
        let fut = definition.handler().invoke(ctx);
        let guarded = std::panic::AssertUnwindSafe(fut).catch_unwind();

        match tokio::time::timeout(timeout, guarded).await {
            Err(_elapsed) => Invocation::Failed(Error::timeout()),
            Ok(Err(panic)) => {
                let detail = panic_message(&panic);
                error!(panic = %detail, "handler panicked");
                Invocation::Panicked(Error::internal("internal server error"))
            }
            Ok(Ok(Ok(reply))) => Invocation::Reply(reply),
            Ok(Ok(Err(err))) => {
                if err.kind() == ErrorKind::Server {
                    error!(code = err.code(), error = %err, "handler failed");
                }
                Invocation::Failed(err)
            }
        }
    }
}

enum Invocation {
    Reply(Reply),
    Failed(Error),
    Panicked(Error),
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct DispatcherBuilder {
    registry: Arc<ApiRegistry>,
    injector: Arc<Injector>,
    authenticator: Option<Arc<dyn RequestAuthenticator>>,
    permissions: Option<Arc<dyn PermissionGate>>,
    rate_gate: Option<Arc<dyn RateGate>>,
    audit: Option<Arc<dyn AuditSink>>,
    config: DispatchConfig,
}

impl DispatcherBuilder {
    pub fn authenticator(mut self, authenticator: Arc<dyn RequestAuthenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn permissions(mut self, gate: Arc<dyn PermissionGate>) -> Self {
        self.permissions = Some(gate);
        self
    }

    pub fn rate_gate(mut self, gate: Arc<dyn RateGate>) -> Self {
        self.rate_gate = Some(gate);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            registry: self.registry,
            injector: self.injector,
            authenticator: self.authenticator,
            permissions: self.permissions,
            rate_gate: self.rate_gate,
            audit: self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink)),
            config: self.config,
        }
    }
}
