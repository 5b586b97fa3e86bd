use std::net::IpAddr;

use async_trait::async_trait;

use onegate_core::{Error, Principal};

/// The authentication strategies the manager can dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Token,
    Refresh,
    Password,
    Signature,
}

impl AuthKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "token" => Some(AuthKind::Token),
            "refresh" => Some(AuthKind::Refresh),
            "password" => Some(AuthKind::Password),
            "signature" => Some(AuthKind::Signature),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthKind::Token => "token",
            AuthKind::Refresh => "refresh",
            AuthKind::Password => "password",
            AuthKind::Signature => "signature",
        }
    }
}

/// One authentication attempt's credentials.
#[derive(Debug, Clone)]
pub enum Authentication {
    Token {
        token: String,
    },
    Refresh {
        token: String,
    },
    Password {
        username: String,
        password: String,
    },
    Signature {
        app_id: String,
        timestamp: i64,
        nonce: String,
        signature: String,
        remote_ip: Option<IpAddr>,
    },
}

impl Authentication {
    pub fn kind(&self) -> AuthKind {
        match self {
            Authentication::Token { .. } => AuthKind::Token,
            Authentication::Refresh { .. } => AuthKind::Refresh,
            Authentication::Password { .. } => AuthKind::Password,
            Authentication::Signature { .. } => AuthKind::Signature,
        }
    }

    /// Identifier worth masking in failure logs, when one exists.
    pub fn principal_hint(&self) -> Option<&str> {
        match self {
            Authentication::Password { username, .. } => Some(username),
            Authentication::Signature { app_id, .. } => Some(app_id),
            _ => None,
        }
    }
}

/// One authentication strategy. The manager walks its registered
/// authenticators and delegates to the first whose `supports` matches.
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn supports(&self, kind: AuthKind) -> bool;

    async fn authenticate(&self, authentication: &Authentication) -> Result<Principal, Error>;
}
