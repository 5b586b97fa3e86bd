use std::sync::Arc;
use std::time::Duration;

use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
use argon2::Argon2;
use async_trait::async_trait;

use onegate_core::{code, Error, Principal};
use onegate_security::{
    compute_signature, AuthManager, Authentication, ExternalApp, ExternalAppLoader,
    MemoryNonceStore, PasswordAuthenticator, RefreshAuthenticator, SignatureAuthenticator,
    TokenAuthenticator, TokenConfig, TokenIssuer, TokenKind, UserLoader,
};

fn hash_password(password: &str) -> String {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .unwrap()
        .to_string()
}

struct FixedUsers {
    hash: String,
    deleted: bool,
}

#[async_trait]
impl UserLoader for FixedUsers {
    async fn load_by_username(&self, username: &str) -> Result<(Principal, String), Error> {
        if username != "alice" {
            return Err(Error::record_not_found("user"));
        }
        Ok((
            Principal::user("u1", "Alice").with_roles(["admin"]),
            self.hash.clone(),
        ))
    }

    async fn load_by_id(&self, id: &str) -> Result<Principal, Error> {
        if self.deleted || id != "u1" {
            return Err(Error::record_not_found("user"));
        }
        // Roles come back fresh from the store, not from the old token.
        Ok(Principal::user("u1", "Alice").with_roles(["admin", "auditor"]))
    }
}

fn users(deleted: bool) -> Arc<dyn UserLoader> {
    Arc::new(FixedUsers {
        hash: hash_password("p@ss"),
        deleted,
    })
}

fn issuer() -> Arc<TokenIssuer> {
    TokenIssuer::new(TokenConfig::new("secret", "demo"))
}

// ── Password (S1 / S2) ──────────────────────────────────────────────────────

#[tokio::test]
async fn password_login_succeeds() {
    let manager = AuthManager::builder()
        .with(PasswordAuthenticator::new(users(false)))
        .build();

    let principal = manager
        .authenticate(&Authentication::Password {
            username: "alice".to_string(),
            password: "p@ss".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(principal.subject(), "u1@Alice");
    assert_eq!(principal.roles, vec!["admin"]);
}

#[tokio::test]
async fn wrong_password_and_unknown_user_are_indistinguishable() {
    let manager = AuthManager::builder()
        .with(PasswordAuthenticator::new(users(false)))
        .build();

    let wrong_password = manager
        .authenticate(&Authentication::Password {
            username: "alice".to_string(),
            password: "nope".to_string(),
        })
        .await
        .unwrap_err();
    let unknown_user = manager
        .authenticate(&Authentication::Password {
            username: "mallory".to_string(),
            password: "p@ss".to_string(),
        })
        .await
        .unwrap_err();

    assert_eq!(wrong_password.code(), code::CREDENTIALS_INVALID);
    assert_eq!(unknown_user.code(), code::CREDENTIALS_INVALID);
    assert_eq!(wrong_password.message(), unknown_user.message());
}

#[tokio::test]
async fn empty_credentials_fail_fast() {
    let manager = AuthManager::builder()
        .with(PasswordAuthenticator::new(users(false)))
        .build();

    let empty_user = manager
        .authenticate(&Authentication::Password {
            username: String::new(),
            password: "p@ss".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(empty_user.code(), code::PRINCIPAL_INVALID);

    let empty_password = manager
        .authenticate(&Authentication::Password {
            username: "alice".to_string(),
            password: String::new(),
        })
        .await
        .unwrap_err();
    assert_eq!(empty_password.code(), code::CREDENTIALS_INVALID);
}

#[tokio::test]
async fn unsupported_kind_is_reported() {
    let manager = AuthManager::builder()
        .with(PasswordAuthenticator::new(users(false)))
        .build();

    let err = manager
        .authenticate(&Authentication::Token {
            token: "whatever".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), code::UNSUPPORTED_AUTHENTICATION_TYPE);
}

// ── Token & refresh (S3) ────────────────────────────────────────────────────

#[tokio::test]
async fn access_token_rebuilds_principal_without_store() {
    let issuer = issuer();
    let manager = AuthManager::builder()
        .with(TokenAuthenticator::new(issuer.clone()))
        .build();

    let pair = issuer
        .generate(&Principal::user("u1", "Alice").with_roles(["admin"]))
        .unwrap();

    let principal = manager
        .authenticate(&Authentication::Token {
            token: pair.access_token,
        })
        .await
        .unwrap();
    assert_eq!(principal.id, "u1");
    assert_eq!(principal.roles, vec!["admin"]);
}

#[tokio::test]
async fn refresh_rotates_and_reloads_roles() {
    let issuer = issuer();
    let manager = AuthManager::builder()
        .with(RefreshAuthenticator::new(issuer.clone(), Some(users(false))))
        .build();

    let original = issuer
        .generate(&Principal::user("u1", "Alice").with_roles(["admin"]))
        .unwrap();

    let principal = manager
        .authenticate(&Authentication::Refresh {
            token: original.refresh_token.clone(),
        })
        .await
        .unwrap();
    // Stale-role avoidance: the store's roles win over the token's.
    assert_eq!(principal.roles, vec!["admin", "auditor"]);

    let rotated = issuer.generate(&principal).unwrap();
    assert_ne!(rotated.access_token, original.access_token);
    assert_ne!(rotated.refresh_token, original.refresh_token);
}

#[tokio::test]
async fn refresh_for_deleted_user_surfaces_record_not_found() {
    let issuer = issuer();
    let manager = AuthManager::builder()
        .with(RefreshAuthenticator::new(issuer.clone(), Some(users(true))))
        .build();

    let pair = issuer.generate(&Principal::user("u1", "Alice")).unwrap();
    let err = manager
        .authenticate(&Authentication::Refresh {
            token: pair.refresh_token,
        })
        .await
        .unwrap_err();
    // Unlike login, refresh does not hide the cause.
    assert_eq!(err.code(), code::RECORD_NOT_FOUND);
}

#[tokio::test]
async fn refresh_without_loader_is_not_implemented() {
    let issuer = issuer();
    let manager = AuthManager::builder()
        .with(RefreshAuthenticator::new(issuer.clone(), None))
        .build();

    let pair = issuer.generate(&Principal::user("u1", "Alice")).unwrap();
    let err = manager
        .authenticate(&Authentication::Refresh {
            token: pair.refresh_token,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), code::NOT_IMPLEMENTED);
}

#[tokio::test]
async fn access_token_cannot_refresh() {
    let issuer = issuer();
    let pair = issuer.generate(&Principal::user("u1", "Alice")).unwrap();
    let err = issuer
        .verify(&pair.access_token, TokenKind::Refresh)
        .unwrap_err();
    assert_eq!(err.code(), code::TOKEN_INVALID);
}

// ── Signature (properties 4 & 5) ────────────────────────────────────────────

const SECRET_HEX: &str = "aabbccddeeff00112233445566778899";
const NOW: i64 = 1_700_000_000;

struct FixedApps {
    enabled: bool,
    whitelist: Vec<String>,
}

#[async_trait]
impl ExternalAppLoader for FixedApps {
    async fn load_by_id(&self, app_id: &str) -> Result<ExternalApp, Error> {
        if app_id != "app1" {
            return Err(Error::record_not_found("external app"));
        }
        Ok(ExternalApp {
            principal: Principal::external_app("app1", "Partner"),
            secret_hex: SECRET_HEX.to_string(),
            enabled: self.enabled,
            ip_whitelist: self.whitelist.clone(),
        })
    }
}

fn signature_auth(
    nonces: Option<Arc<MemoryNonceStore>>,
    enabled: bool,
    whitelist: Vec<String>,
) -> SignatureAuthenticator {
    SignatureAuthenticator::new(
        Arc::new(FixedApps { enabled, whitelist }),
        nonces.map(|n| n as Arc<dyn onegate_security::NonceStore>),
    )
    .with_clock(|| NOW)
}

fn signed(timestamp: i64, nonce: &str) -> Authentication {
    Authentication::Signature {
        app_id: "app1".to_string(),
        timestamp,
        nonce: nonce.to_string(),
        signature: compute_signature(SECRET_HEX, "app1", timestamp, nonce).unwrap(),
        remote_ip: None,
    }
}

#[tokio::test]
async fn valid_signature_authenticates_app() {
    let auth = signature_auth(Some(MemoryNonceStore::new()), true, Vec::new());
    let manager = AuthManager::builder().with(auth).build();

    let principal = manager.authenticate(&signed(NOW - 10, "n1")).await.unwrap();
    assert_eq!(principal.id, "app1");
    assert_eq!(principal.kind, onegate_core::PrincipalKind::ExternalApp);
}

#[tokio::test]
async fn replay_within_ttl_is_rejected() {
    let auth = signature_auth(Some(MemoryNonceStore::new()), true, Vec::new());
    let manager = AuthManager::builder().with(auth).build();

    let attempt = signed(NOW, "n-replay");
    manager.authenticate(&attempt).await.unwrap();
    let err = manager.authenticate(&attempt).await.unwrap_err();
    assert_eq!(err.code(), code::NONCE_ALREADY_USED);
}

#[tokio::test]
async fn stale_timestamp_is_expired_even_with_valid_signature() {
    let auth = signature_auth(Some(MemoryNonceStore::new()), true, Vec::new());
    let manager = AuthManager::builder().with(auth).build();

    for timestamp in [NOW - 301, NOW + 301] {
        let err = manager.authenticate(&signed(timestamp, "n2")).await.unwrap_err();
        assert_eq!(err.code(), code::SIGNATURE_EXPIRED);
    }
}

#[tokio::test]
async fn tampered_signature_is_rejected() {
    let auth = signature_auth(None, true, Vec::new());
    let manager = AuthManager::builder().with(auth).build();

    let err = manager
        .authenticate(&Authentication::Signature {
            app_id: "app1".to_string(),
            timestamp: NOW,
            nonce: "n3".to_string(),
            signature: compute_signature(SECRET_HEX, "app1", NOW, "other-nonce").unwrap(),
            remote_ip: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), code::SIGNATURE_INVALID);
}

#[tokio::test]
async fn disabled_app_is_forbidden_before_signature_check() {
    let auth = signature_auth(None, false, Vec::new());
    let manager = AuthManager::builder().with(auth).build();

    let err = manager.authenticate(&signed(NOW, "n4")).await.unwrap_err();
    assert_eq!(err.code(), code::FORBIDDEN);
}

#[tokio::test]
async fn whitelist_gates_caller_address() {
    let auth = signature_auth(None, true, vec!["10.0.0.0/8".to_string()]);
    let manager = AuthManager::builder().with(auth).build();

    let mut allowed = signed(NOW, "n5");
    if let Authentication::Signature { remote_ip, .. } = &mut allowed {
        *remote_ip = Some("10.1.2.3".parse().unwrap());
    }
    manager.authenticate(&allowed).await.unwrap();

    let auth = signature_auth(None, true, vec!["10.0.0.0/8".to_string()]);
    let manager = AuthManager::builder().with(auth).build();
    let mut denied = signed(NOW, "n6");
    if let Authentication::Signature { remote_ip, .. } = &mut denied {
        *remote_ip = Some("192.168.0.9".parse().unwrap());
    }
    let err = manager.authenticate(&denied).await.unwrap_err();
    assert_eq!(err.code(), code::FORBIDDEN);
}
