//! Security module of the onegate framework.
//!
//! The auth pipeline (token, refresh, password and HMAC-signature
//! authenticators behind one strategy registry), the HS256 token issuer,
//! role-based permission checks and data-scope resolution, plus the
//! built-in `security/auth` resource.

pub mod authentication;
pub mod authenticators;
pub mod loaders;
pub mod manager;
pub mod rbac;
pub mod resource;
pub mod token;

pub use authentication::{AuthKind, Authentication, Authenticator};
pub use authenticators::{
    compute_signature, PasswordAuthenticator, RefreshAuthenticator, SignatureAuthenticator,
    TokenAuthenticator,
};
pub use loaders::{
    ExternalApp, ExternalAppLoader, MemoryNonceStore, NonceStore, RolePermissionsLoader,
    UserInfoLoader, UserLoader,
};
pub use manager::{AuthManager, AuthManagerBuilder};
pub use rbac::{DataPermissionResolver, PermissionChecker};
pub use resource::{AuthResource, LoginParams, RefreshParams};
pub use token::{
    normalize_audience, TokenConfig, TokenIssuer, TokenKind, TokenPair, VerifiedToken,
};
