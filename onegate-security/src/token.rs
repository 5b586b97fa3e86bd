use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use onegate_core::{Error, Principal};

/// Discriminates access from refresh tokens through a custom claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Token issuance settings.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Shared HMAC secret for HS256 signing.
    pub secret: String,
    /// Token audience; normalized from the application name.
    pub audience: String,
    /// Access-token lifetime.
    pub access_ttl: Duration,
    /// Refresh-token lifetime (`security.token_expires`).
    pub refresh_ttl: Duration,
    /// In production, a refresh token only becomes valid halfway through
    /// the access lifetime, so a fresh pair cannot be rotated immediately.
    pub production: bool,
}

impl TokenConfig {
    pub fn new(secret: impl Into<String>, app_name: &str) -> Self {
        Self {
            secret: secret.into(),
            audience: normalize_audience(app_name),
            access_ttl: Duration::from_secs(30 * 60),
            refresh_ttl: Duration::from_secs(7 * 24 * 3600),
            production: false,
        }
    }

    pub fn refresh_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    pub fn production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }
}

/// Lowercased, dash-joined application name.
pub fn normalize_audience(app_name: &str) -> String {
    app_name
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

/// The access/refresh pair returned by login and refresh.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    aud: String,
    exp: i64,
    nbf: i64,
    jti: String,
    kind: String,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    details: Value,
}

/// Verified token contents, ready for principal reconstruction.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub principal_id: String,
    pub principal_name: String,
    pub roles: Vec<String>,
    pub details: Value,
    pub jti: String,
}

impl VerifiedToken {
    /// Rebuild the principal carried by an access token. No store lookup.
    pub fn principal(&self) -> Principal {
        Principal::user(self.principal_id.clone(), self.principal_name.clone())
            .with_roles(self.roles.clone())
            .with_details(self.details.clone())
    }
}

/// HS256 token generator and verifier, shared by the token and refresh
/// authenticators and the login resource.
pub struct TokenIssuer {
    config: TokenConfig,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenIssuer {
    pub fn new(config: TokenConfig) -> Arc<Self> {
        let encoding = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding = DecodingKey::from_secret(config.secret.as_bytes());
        Arc::new(Self {
            config,
            encoding,
            decoding,
        })
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Issue an access/refresh pair sharing one freshly generated jti.
    ///
    /// Subject format is `<id>@<name>`. The access token starts valid
    /// immediately (`nbf = 0`); in production the refresh token's `nbf`
    /// sits at half the access lifetime.
    pub fn generate(&self, principal: &Principal) -> Result<TokenPair, Error> {
        let now = chrono::Utc::now().timestamp();
        let jti = uuid::Uuid::new_v4().to_string();

        let access = Claims {
            sub: principal.subject(),
            aud: self.config.audience.clone(),
            exp: now + self.config.access_ttl.as_secs() as i64,
            nbf: 0,
            jti: jti.clone(),
            kind: TokenKind::Access.as_str().to_string(),
            roles: principal.roles.clone(),
            details: principal.details.clone(),
        };

        let refresh_nbf = if self.config.production {
            now + (self.config.access_ttl.as_secs() / 2) as i64
        } else {
            0
        };
        let refresh = Claims {
            sub: principal.subject(),
            aud: self.config.audience.clone(),
            exp: now + self.config.refresh_ttl.as_secs() as i64,
            nbf: refresh_nbf,
            jti,
            kind: TokenKind::Refresh.as_str().to_string(),
            roles: Vec::new(),
            details: Value::Null,
        };

        Ok(TokenPair {
            access_token: self.sign(&access)?,
            refresh_token: self.sign(&refresh)?,
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String, Error> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| Error::internal("failed to sign token").with_cause(e))
    }

    /// Verify signature, audience, expiry and kind; return the claims.
    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<VerifiedToken, Error> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[&self.config.audience]);
        validation.validate_nbf = true;

        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::token_expired(),
                jsonwebtoken::errors::ErrorKind::ImmatureSignature => {
                    Error::token_invalid("token not yet valid")
                }
                _ => Error::token_invalid("token verification failed"),
            }
        })?;

        let claims = data.claims;
        if claims.kind != expected.as_str() {
            return Err(Error::token_invalid(format!(
                "expected a {} token",
                expected.as_str()
            )));
        }

        let (id, name) = claims
            .sub
            .split_once('@')
            .ok_or_else(|| Error::token_invalid("malformed token subject"))?;

        Ok(VerifiedToken {
            principal_id: id.to_string(),
            principal_name: name.to_string(),
            roles: claims.roles,
            details: claims.details,
            jti: claims.jti,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> Arc<TokenIssuer> {
        TokenIssuer::new(TokenConfig::new("test-secret", "My App"))
    }

    #[test]
    fn audience_is_normalized() {
        assert_eq!(normalize_audience("  My Cool App "), "my-cool-app");
    }

    #[test]
    fn generated_pair_round_trips() {
        let issuer = issuer();
        let principal = Principal::user("u1", "Alice").with_roles(["admin"]);
        let pair = issuer.generate(&principal).unwrap();

        let access = issuer.verify(&pair.access_token, TokenKind::Access).unwrap();
        assert_eq!(access.principal_id, "u1");
        assert_eq!(access.principal_name, "Alice");
        assert_eq!(access.roles, vec!["admin"]);
        assert_eq!(access.principal().subject(), "u1@Alice");

        let refresh = issuer
            .verify(&pair.refresh_token, TokenKind::Refresh)
            .unwrap();
        assert_eq!(refresh.jti, access.jti, "pair shares one jti");
        assert!(refresh.roles.is_empty(), "refresh carries no roles");
    }

    #[test]
    fn kind_mismatch_rejected() {
        let issuer = issuer();
        let pair = issuer.generate(&Principal::user("u1", "Alice")).unwrap();
        let err = issuer
            .verify(&pair.refresh_token, TokenKind::Access)
            .unwrap_err();
        assert_eq!(err.code(), onegate_core::code::TOKEN_INVALID);
    }

    #[test]
    fn wrong_secret_rejected() {
        let issuer_a = issuer();
        let issuer_b = TokenIssuer::new(TokenConfig::new("other-secret", "My App"));
        let pair = issuer_a.generate(&Principal::user("u1", "Alice")).unwrap();
        let err = issuer_b
            .verify(&pair.access_token, TokenKind::Access)
            .unwrap_err();
        assert_eq!(err.code(), onegate_core::code::TOKEN_INVALID);
    }

    #[test]
    fn wrong_audience_rejected() {
        let issuer_a = issuer();
        let issuer_b = TokenIssuer::new(TokenConfig::new("test-secret", "Other App"));
        let pair = issuer_a.generate(&Principal::user("u1", "Alice")).unwrap();
        assert!(issuer_b.verify(&pair.access_token, TokenKind::Access).is_err());
    }
}
