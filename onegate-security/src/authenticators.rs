use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use onegate_core::{code, Error, Principal};

use crate::authentication::{AuthKind, Authentication, Authenticator};
use crate::loaders::{ExternalAppLoader, NonceStore, UserLoader};
use crate::token::{TokenIssuer, TokenKind};

type HmacSha256 = Hmac<Sha256>;

// ── Token ───────────────────────────────────────────────────────────────────

/// Access-token authentication: verify the signed token and rebuild the
/// principal from its claims. No store lookup.
pub struct TokenAuthenticator {
    issuer: Arc<TokenIssuer>,
}

impl TokenAuthenticator {
    pub fn new(issuer: Arc<TokenIssuer>) -> Self {
        Self { issuer }
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    fn supports(&self, kind: AuthKind) -> bool {
        kind == AuthKind::Token
    }

    async fn authenticate(&self, authentication: &Authentication) -> Result<Principal, Error> {
        let Authentication::Token { token } = authentication else {
            return Err(Error::unsupported_authentication("expected token credentials"));
        };
        let verified = self.issuer.verify(token, TokenKind::Access)?;
        Ok(verified.principal())
    }
}

// ── Refresh ─────────────────────────────────────────────────────────────────

/// Refresh-token authentication: verify the refresh token, then reload the
/// principal from the user store so rotated tokens never carry stale roles.
///
/// Unlike password login, a vanished account surfaces as
/// `RECORD_NOT_FOUND` here; the holder of a valid refresh token has already
/// proven who they are, so there is nothing to enumerate.
pub struct RefreshAuthenticator {
    issuer: Arc<TokenIssuer>,
    users: Option<Arc<dyn UserLoader>>,
}

impl RefreshAuthenticator {
    pub fn new(issuer: Arc<TokenIssuer>, users: Option<Arc<dyn UserLoader>>) -> Self {
        Self { issuer, users }
    }
}

#[async_trait]
impl Authenticator for RefreshAuthenticator {
    fn supports(&self, kind: AuthKind) -> bool {
        kind == AuthKind::Refresh
    }

    async fn authenticate(&self, authentication: &Authentication) -> Result<Principal, Error> {
        let Authentication::Refresh { token } = authentication else {
            return Err(Error::unsupported_authentication("expected refresh credentials"));
        };
        let verified = self.issuer.verify(token, TokenKind::Refresh)?;

        let users = self
            .users
            .as_ref()
            .ok_or_else(|| Error::not_implemented("refresh requires a user loader"))?;
        users.load_by_id(&verified.principal_id).await
    }
}

// ── Password ────────────────────────────────────────────────────────────────

/// Username/password authentication against the user store's PHC hash.
pub struct PasswordAuthenticator {
    users: Arc<dyn UserLoader>,
}

impl PasswordAuthenticator {
    pub fn new(users: Arc<dyn UserLoader>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl Authenticator for PasswordAuthenticator {
    fn supports(&self, kind: AuthKind) -> bool {
        kind == AuthKind::Password
    }

    async fn authenticate(&self, authentication: &Authentication) -> Result<Principal, Error> {
        let Authentication::Password { username, password } = authentication else {
            return Err(Error::unsupported_authentication("expected password credentials"));
        };

        if username.is_empty() {
            return Err(Error::principal_invalid());
        }
        if password.is_empty() {
            return Err(Error::credentials_invalid());
        }

        // A missing account and a wrong password are indistinguishable to
        // the caller; the distinction stays in the logs.
        let (principal, hash) = match self.users.load_by_username(username).await {
            Ok(loaded) => loaded,
            Err(err) if err.code() == code::RECORD_NOT_FOUND => {
                tracing::debug!(
                    principal = %onegate_core::mask_identifier(username),
                    "login for unknown account"
                );
                return Err(Error::credentials_invalid());
            }
            Err(err) => return Err(err),
        };

        let parsed = PasswordHash::new(&hash)
            .map_err(|_| Error::internal("stored password hash is malformed"))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| Error::credentials_invalid())?;

        Ok(principal)
    }
}

// ── Signature ───────────────────────────────────────────────────────────────

/// Canonical signing input: `app_id + "\n" + timestamp + "\n" + nonce`.
pub fn canonical_message(app_id: &str, timestamp: i64, nonce: &str) -> String {
    format!("{app_id}\n{timestamp}\n{nonce}")
}

/// Hex HMAC-SHA256 over the canonical message, keyed by the decoded
/// secret. Client SDKs and tests share this with the verifier.
pub fn compute_signature(
    secret_hex: &str,
    app_id: &str,
    timestamp: i64,
    nonce: &str,
) -> Result<String, Error> {
    let secret = hex::decode(secret_hex)
        .map_err(|_| Error::internal("external app secret is not valid hex"))?;
    let mut mac = HmacSha256::new_from_slice(&secret)
        .map_err(|_| Error::internal("external app secret is unusable"))?;
    mac.update(canonical_message(app_id, timestamp, nonce).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Extra slack added to the nonce TTL past the timestamp tolerance.
const NONCE_TTL_SLACK: Duration = Duration::from_secs(30);

/// HMAC signature authentication for external applications.
///
/// Order of checks: app lookup → enabled flag → IP whitelist → timestamp
/// tolerance (both directions) → nonce replay → constant-time signature
/// comparison.
pub struct SignatureAuthenticator {
    apps: Arc<dyn ExternalAppLoader>,
    nonces: Option<Arc<dyn NonceStore>>,
    tolerance: Duration,
    clock: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl SignatureAuthenticator {
    pub fn new(apps: Arc<dyn ExternalAppLoader>, nonces: Option<Arc<dyn NonceStore>>) -> Self {
        Self {
            apps,
            nonces,
            tolerance: Duration::from_secs(300),
            clock: Arc::new(|| chrono::Utc::now().timestamp()),
        }
    }

    pub fn tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Fixed clock for deterministic tests.
    pub fn with_clock(mut self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }
}

#[async_trait]
impl Authenticator for SignatureAuthenticator {
    fn supports(&self, kind: AuthKind) -> bool {
        kind == AuthKind::Signature
    }

    async fn authenticate(&self, authentication: &Authentication) -> Result<Principal, Error> {
        let Authentication::Signature {
            app_id,
            timestamp,
            nonce,
            signature,
            remote_ip,
        } = authentication
        else {
            return Err(Error::unsupported_authentication("expected signature credentials"));
        };

        let app = self.apps.load_by_id(app_id).await?;
        if !app.enabled {
            return Err(Error::forbidden("external app is disabled"));
        }
        if !ip_allowed(&app.ip_whitelist, *remote_ip) {
            return Err(Error::forbidden("caller address not whitelisted"));
        }

        let now = (self.clock)();
        if (now - timestamp).unsigned_abs() > self.tolerance.as_secs() {
            return Err(Error::signature_expired());
        }

        if let Some(nonces) = &self.nonces {
            if nonces.exists(app_id, nonce).await? {
                return Err(Error::nonce_already_used());
            }
            nonces
                .store(app_id, nonce, self.tolerance + NONCE_TTL_SLACK)
                .await?;
        }

        let secret = hex::decode(&app.secret_hex)
            .map_err(|_| Error::internal("external app secret is not valid hex"))?;
        let mut mac = HmacSha256::new_from_slice(&secret)
            .map_err(|_| Error::internal("external app secret is unusable"))?;
        mac.update(canonical_message(app_id, *timestamp, nonce).as_bytes());

        let provided = hex::decode(signature).map_err(|_| Error::signature_invalid())?;
        mac.verify_slice(&provided)
            .map_err(|_| Error::signature_invalid())?;

        Ok(app.principal)
    }
}

/// Exact-match or v4-CIDR whitelist check. An empty list allows everyone;
/// a populated list with no caller address fails closed.
fn ip_allowed(whitelist: &[String], remote_ip: Option<IpAddr>) -> bool {
    if whitelist.is_empty() {
        return true;
    }
    let Some(ip) = remote_ip else {
        return false;
    };
    whitelist.iter().any(|entry| entry_matches(entry, ip))
}

fn entry_matches(entry: &str, ip: IpAddr) -> bool {
    if let Some((network, prefix)) = entry.split_once('/') {
        let (Ok(network), Ok(prefix)) = (network.parse::<std::net::Ipv4Addr>(), prefix.parse::<u32>())
        else {
            return false;
        };
        let IpAddr::V4(ip) = ip else {
            return false;
        };
        if prefix > 32 {
            return false;
        }
        let mask = if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix)
        };
        (u32::from(ip) & mask) == (u32::from(network) & mask)
    } else {
        entry.parse::<IpAddr>().map(|e| e == ip).unwrap_or(false)
    }
}
