use std::sync::Arc;

use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use serde_json::json;

use onegate_core::{
    code, ApiRegistry, Dispatcher, Error, IncomingCall, IngressCredentials, IngressKind, Injector,
    Principal, RpcRequest,
};
use onegate_security::{
    AuthManager, AuthResource, PasswordAuthenticator, RefreshAuthenticator, TokenAuthenticator,
    TokenConfig, TokenIssuer, TokenKind, UserLoader,
};

struct OneUser {
    hash: String,
}

#[async_trait]
impl UserLoader for OneUser {
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
        if id != "u1" {
            return Err(Error::record_not_found("user"));
        }
        Ok(Principal::user("u1", "Alice").with_roles(["admin"]))
    }
}

fn dispatcher() -> (Dispatcher, Arc<TokenIssuer>) {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(b"p@ss", &salt)
        .unwrap()
        .to_string();
    let users: Arc<dyn UserLoader> = Arc::new(OneUser { hash });

    let issuer = TokenIssuer::new(TokenConfig::new("integration-secret", "demo"));
    let manager = AuthManager::builder()
        .with(PasswordAuthenticator::new(users.clone()))
        .with(TokenAuthenticator::new(issuer.clone()))
        .with(RefreshAuthenticator::new(issuer.clone(), Some(users)))
        .build();

    let injector = Arc::new(Injector::empty());
    let registry = Arc::new(
        ApiRegistry::builder(injector.clone())
            .register(AuthResource::new(manager.clone(), issuer.clone()))
            .unwrap()
            .build(),
    );

    let dispatcher = Dispatcher::builder(registry, injector)
        .authenticator(manager)
        .build();
    (dispatcher, issuer)
}

fn login_call(username: &str, password: &str) -> IncomingCall {
    let mut request = RpcRequest::new("security/auth", "login");
    request.params = match json!({
        "kind": "password",
        "principal": username,
        "credentials": password,
    }) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    IncomingCall::new(IngressKind::Api, request)
}

#[tokio::test]
async fn login_issues_token_pair() {
    let (dispatcher, issuer) = dispatcher();

    let reply = dispatcher.dispatch(login_call("alice", "p@ss")).await;
    assert_eq!(reply.status, 200);
    let envelope = reply.envelope().unwrap();
    assert_eq!(envelope.code, 0);

    let access = envelope.data["accessToken"].as_str().unwrap();
    let refresh = envelope.data["refreshToken"].as_str().unwrap();
    assert_ne!(access, refresh);

    let verified = issuer.verify(access, TokenKind::Access).unwrap();
    assert_eq!(verified.principal().subject(), "u1@Alice");
    assert_eq!(verified.roles, vec!["admin"]);
}

#[tokio::test]
async fn login_failure_does_not_reveal_account_existence() {
    let (dispatcher, _) = dispatcher();

    let wrong_password = dispatcher.dispatch(login_call("alice", "nope")).await;
    let unknown_user = dispatcher.dispatch(login_call("mallory", "p@ss")).await;

    // Both land at HTTP 200 (login is public) with identical bodies.
    assert_eq!(wrong_password.status, 200);
    assert_eq!(unknown_user.status, 200);
    assert_eq!(
        wrong_password.envelope().unwrap(),
        unknown_user.envelope().unwrap()
    );
    assert_eq!(
        wrong_password.envelope().unwrap().code,
        code::CREDENTIALS_INVALID
    );
}

#[tokio::test]
async fn refresh_rotates_the_pair() {
    let (dispatcher, _) = dispatcher();

    let login = dispatcher.dispatch(login_call("alice", "p@ss")).await;
    let login = login.envelope().unwrap();
    let old_access = login.data["accessToken"].as_str().unwrap().to_string();
    let old_refresh = login.data["refreshToken"].as_str().unwrap().to_string();

    let mut request = RpcRequest::new("security/auth", "refresh");
    request.params = match json!({ "refreshToken": old_refresh }) {
        serde_json::Value::Object(map) => map,
        _ => unreachable!(),
    };
    let reply = dispatcher
        .dispatch(IncomingCall::new(IngressKind::Api, request))
        .await;

    let envelope = reply.envelope().unwrap();
    assert_eq!(envelope.code, 0);
    assert_ne!(envelope.data["accessToken"].as_str().unwrap(), old_access);
    assert_ne!(envelope.data["refreshToken"].as_str().unwrap(), old_refresh);
}

#[tokio::test]
async fn get_user_info_requires_authentication() {
    let (dispatcher, issuer) = dispatcher();

    let anonymous = dispatcher
        .dispatch(IncomingCall::new(
            IngressKind::Api,
            RpcRequest::new("security/auth", "get_user_info"),
        ))
        .await;
    assert_eq!(anonymous.status, 401);

    let pair = issuer
        .generate(&Principal::user("u1", "Alice").with_roles(["admin"]))
        .unwrap();
    let authed = dispatcher
        .dispatch(
            IncomingCall::new(
                IngressKind::Api,
                RpcRequest::new("security/auth", "get_user_info"),
            )
            .credentials(IngressCredentials::Token(pair.access_token)),
        )
        .await;
    assert_eq!(authed.status, 200);
    let envelope = authed.envelope().unwrap();
    assert_eq!(envelope.code, 0);
    assert_eq!(envelope.data["id"], json!("u1"));
}

#[tokio::test]
async fn logout_confirms_for_authenticated_callers() {
    let (dispatcher, issuer) = dispatcher();
    let pair = issuer.generate(&Principal::user("u1", "Alice")).unwrap();

    let reply = dispatcher
        .dispatch(
            IncomingCall::new(
                IngressKind::Api,
                RpcRequest::new("security/auth", "logout"),
            )
            .credentials(IngressCredentials::Token(pair.access_token)),
        )
        .await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.envelope().unwrap().code, 0);
}
