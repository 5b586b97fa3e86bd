//! onegate — an opinionated single-endpoint RPC application framework.
//!
//! Business logic registers as `(resource, action, version)` handlers and
//! is served through two envelope endpoints: `POST /api` (token auth) and
//! `POST /openapi` (HMAC signature auth). This facade crate re-exports the
//! sub-crates behind feature flags; import the lot with:
//!
//! ```ignore
//! use onegate::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature      | Default | Crate                     |
//! |--------------|---------|---------------------------|
//! | `security`   | **yes** | `onegate-security`        |
//! | `data`       | **yes** | `onegate-data`            |
//! | `mold`       | **yes** | `onegate-mold`            |
//! | `rate-limit` | **yes** | `onegate-rate-limit`      |
//! | `sqlite`     | no      | `onegate-data/sqlite`     |
//! | `storage`    | no      | `onegate-storage`         |
//! | `executor`   | no      | `onegate-executor`        |
//! | `full`       | no      | All of the above          |

pub extern crate onegate_core;

// Everything from the core is available at the top level.
pub use onegate_core::*;

#[cfg(feature = "security")]
pub use onegate_security;

#[cfg(feature = "data")]
pub use onegate_data;

#[cfg(feature = "mold")]
pub use onegate_mold;

#[cfg(feature = "storage")]
pub use onegate_storage;

#[cfg(feature = "executor")]
pub use onegate_executor;

#[cfg(feature = "rate-limit")]
pub use onegate_rate_limit;

/// Unified prelude — `use onegate::prelude::*`.
pub mod prelude {
    pub use onegate_core::{
        code, ApiRegistry, Dispatcher, Error, ErrorKind, Files, Injected, Injector, Json,
        OnegateConfig, Params, Principal, Reply, Resource, RpcContext, RpcRequest, RpcResponse,
        Scoped, Spec, SpecProvider,
    };

    #[cfg(feature = "security")]
    pub use onegate_security::{
        AuthManager, AuthResource, Authentication, Authenticator, DataPermissionResolver,
        PasswordAuthenticator, PermissionChecker, RefreshAuthenticator, SignatureAuthenticator,
        TokenAuthenticator, TokenConfig, TokenIssuer,
    };

    #[cfg(feature = "data")]
    pub use onegate_data::{
        search_params, Create, Database, DataScope, Delete, Entity, Export, FindAll, FindOne,
        FindOptions, FindPage, FindTree, FindTreeOptions, Import, Page, Pageable, ScopeHandle,
        SearchParams, Update,
    };

    #[cfg(feature = "mold")]
    pub use onegate_mold::MoldRegistry;

    #[cfg(feature = "executor")]
    pub use onegate_executor::{Executor, ExecutorConfig, Priority, TaskOptions};

    #[cfg(feature = "rate-limit")]
    pub use onegate_rate_limit::InMemoryRateLimiter;

    #[cfg(feature = "storage")]
    pub use onegate_storage::{MemoryStorageProvider, StorageProvider, StorageResource};
}
