use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use onegate_core::{Error, Principal};
use onegate_data::DataScope;

/// Loads user principals for password login and refresh rotation.
///
/// `load_by_username` returns the principal together with its stored
/// password hash (PHC string). A missing account must surface as a
/// `RECORD_NOT_FOUND` error; the password authenticator collapses that into
/// `CREDENTIALS_INVALID` so callers cannot probe for accounts.
#[async_trait]
pub trait UserLoader: Send + Sync {
    async fn load_by_username(&self, username: &str) -> Result<(Principal, String), Error>;

    async fn load_by_id(&self, id: &str) -> Result<Principal, Error>;
}

/// Loads extended user information for `security/auth.get_user_info`.
#[async_trait]
pub trait UserInfoLoader: Send + Sync {
    async fn load_user_info(&self, principal: &Principal, params: &Value) -> Result<Value, Error>;
}

/// A registered external application for signature authentication.
#[derive(Debug, Clone)]
pub struct ExternalApp {
    pub principal: Principal,
    /// Hex-encoded shared secret.
    pub secret_hex: String,
    pub enabled: bool,
    /// Exact IPs or v4 CIDR blocks. Empty means unrestricted.
    pub ip_whitelist: Vec<String>,
}

#[async_trait]
pub trait ExternalAppLoader: Send + Sync {
    async fn load_by_id(&self, app_id: &str) -> Result<ExternalApp, Error>;
}

/// Replay protection for signature authentication. `store` must be
/// atomic: inserting an already-present nonce fails with
/// `NONCE_ALREADY_USED` even under concurrent duplicate requests.
#[async_trait]
pub trait NonceStore: Send + Sync {
    async fn exists(&self, app_id: &str, nonce: &str) -> Result<bool, Error>;

    async fn store(&self, app_id: &str, nonce: &str, ttl: Duration) -> Result<(), Error>;
}

/// In-process CAS-capable nonce store.
pub struct MemoryNonceStore {
    entries: DashMap<String, Instant>,
}

impl MemoryNonceStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
        })
    }

    fn key(app_id: &str, nonce: &str) -> String {
        format!("{app_id}:{nonce}")
    }

    /// Drop every expired entry. Called opportunistically by `store`.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, expiry| *expiry > now);
    }
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn exists(&self, app_id: &str, nonce: &str) -> Result<bool, Error> {
        let key = Self::key(app_id, nonce);
        match self.entries.get(&key) {
            Some(expiry) if *expiry > Instant::now() => Ok(true),
            _ => Ok(false),
        }
    }

    async fn store(&self, app_id: &str, nonce: &str, ttl: Duration) -> Result<(), Error> {
        self.purge_expired();
        let key = Self::key(app_id, nonce);
        let now = Instant::now();

        // Entry API holds the shard lock, making insert-if-absent atomic.
        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if *occupied.get() > now {
                    return Err(Error::nonce_already_used());
                }
                occupied.insert(now + ttl);
                Ok(())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(now + ttl);
                Ok(())
            }
        }
    }
}

/// Per-role permission map: token → data scope. Loaded on demand, one role
/// at a time; hierarchy recursion (if any) is the loader's business.
#[async_trait]
pub trait RolePermissionsLoader: Send + Sync {
    async fn load_permissions(
        &self,
        role: &str,
    ) -> Result<HashMap<String, Arc<dyn DataScope>>, Error>;
}
