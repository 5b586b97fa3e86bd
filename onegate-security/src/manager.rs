use std::net::IpAddr;
use std::sync::Arc;

use onegate_core::{
    mask_identifier, BoxFuture, Error, IngressCredentials, Principal, RequestAuthenticator,
};

use crate::authentication::{Authentication, Authenticator};

/// The strategy registry: walks registered authenticators, delegates to the
/// first that supports the credential kind.
pub struct AuthManager {
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl AuthManager {
    pub fn builder() -> AuthManagerBuilder {
        AuthManagerBuilder {
            authenticators: Vec::new(),
        }
    }

    pub async fn authenticate(&self, authentication: &Authentication) -> Result<Principal, Error> {
        let kind = authentication.kind();
        let Some(authenticator) = self.authenticators.iter().find(|a| a.supports(kind)) else {
            return Err(Error::unsupported_authentication(kind.as_str()));
        };

        match authenticator.authenticate(authentication).await {
            Ok(principal) => Ok(principal),
            Err(err) => {
                // Only a masked identifier ever reaches the logs.
                let hint = authentication
                    .principal_hint()
                    .map(mask_identifier)
                    .unwrap_or_else(|| "-".to_string());
                tracing::warn!(
                    kind = kind.as_str(),
                    principal = %hint,
                    code = err.code(),
                    "authentication failed"
                );
                Err(err)
            }
        }
    }
}

pub struct AuthManagerBuilder {
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl AuthManagerBuilder {
    pub fn with(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticators.push(Arc::new(authenticator));
        self
    }

    pub fn build(self) -> Arc<AuthManager> {
        Arc::new(AuthManager {
            authenticators: self.authenticators,
        })
    }
}

/// Bridge from the dispatcher's transport credentials onto the strategy
/// registry.
impl RequestAuthenticator for AuthManager {
    fn authenticate<'a>(
        &'a self,
        credentials: &'a IngressCredentials,
        remote_ip: Option<IpAddr>,
    ) -> BoxFuture<'a, Result<Principal, Error>> {
        Box::pin(async move {
            let authentication = match credentials {
                IngressCredentials::None => {
                    return Err(Error::unauthenticated("missing credentials"))
                }
                IngressCredentials::Token(token) => Authentication::Token {
                    token: token.clone(),
                },
                IngressCredentials::Signature {
                    app_id,
                    timestamp,
                    nonce,
                    signature,
                } => Authentication::Signature {
                    app_id: app_id.clone(),
                    timestamp: *timestamp,
                    nonce: nonce.clone(),
                    signature: signature.clone(),
                    remote_ip,
                },
            };
            self.authenticate(&authentication).await
        })
    }
}
