//! Core runtime of the onegate framework.
//!
//! Business logic is exposed as `(resource, action, version)` handlers
//! behind two envelope endpoints. This crate owns the envelope codec, the
//! handler registry, the extractor-based parameter binding, the dispatch
//! pipeline and the error taxonomy.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod extract;
pub mod handler;
pub mod id;
pub mod ingress;
pub mod injector;
pub mod logging;
pub mod principal;
pub mod registry;

pub use config::{ConfigError, ConfigValue, FromConfigValue, OnegateConfig};
pub use context::{DefinitionMeta, RequestLogger, RpcContext, Transformer, ValueTransform, WithLogger};
pub use dispatch::{
    AuditEvent, AuditSink, DispatchConfig, Dispatcher, HttpReply, IncomingCall,
    IngressCredentials, IngressKind, PermissionGate, RateGate, ReplyBody, RequestAuthenticator,
    TracingAuditSink,
};
pub use envelope::{FileBag, RpcRequest, RpcResponse, UploadedFile, DEFAULT_VERSION};
pub use error::{code, Error, ErrorKind};
pub use extract::{Files, FromRpcContext, Injected, Params, Scoped};
pub use handler::{BoxFuture, BoxedHandler, FilePayload, Handler, IntoReply, Json, Reply};
pub use id::IdGenerator;
pub use ingress::{router, router_with, CorsSettings};
pub use injector::{Injector, InjectorBuilder};
pub use logging::init_tracing;
pub use principal::{mask_identifier, Principal, PrincipalKind};
pub use registry::{
    ApiRegistry, Definition, DefinitionInfo, Identifier, RateLimitSpec, RegistryBuilder, Resource,
    Spec, SpecProvider,
};
