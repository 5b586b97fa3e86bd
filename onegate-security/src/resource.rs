use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use onegate_core::{Error, Json, Params, Principal, Resource, RpcContext, Spec, SpecProvider};

use crate::authentication::{AuthKind, Authentication};
use crate::loaders::UserInfoLoader;
use crate::manager::AuthManager;
use crate::token::{TokenIssuer, TokenPair};

#[derive(Debug, Deserialize, garde::Validate)]
pub struct LoginParams {
    #[garde(skip)]
    pub kind: String,
    #[garde(skip)]
    pub principal: String,
    #[garde(skip)]
    pub credentials: String,
}

#[derive(Debug, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshParams {
    #[garde(skip)]
    pub refresh_token: String,
}

/// The built-in `security/auth` resource: `login`, `refresh` (both public),
/// `logout` and `get_user_info`.
pub struct AuthResource {
    manager: Arc<AuthManager>,
    issuer: Arc<TokenIssuer>,
    user_info: Option<Arc<dyn UserInfoLoader>>,
}

impl AuthResource {
    pub fn new(manager: Arc<AuthManager>, issuer: Arc<TokenIssuer>) -> Self {
        Self {
            manager,
            issuer,
            user_info: None,
        }
    }

    pub fn user_info_loader(mut self, loader: Arc<dyn UserInfoLoader>) -> Self {
        self.user_info = Some(loader);
        self
    }
}

async fn login(
    manager: Arc<AuthManager>,
    issuer: Arc<TokenIssuer>,
    params: LoginParams,
) -> Result<TokenPair, Error> {
    let authentication = match AuthKind::parse(&params.kind) {
        Some(AuthKind::Password) => Authentication::Password {
            username: params.principal,
            password: params.credentials,
        },
        _ => return Err(Error::unsupported_authentication(&params.kind)),
    };
    let principal = manager.authenticate(&authentication).await?;
    issuer.generate(&principal)
}

impl Resource for AuthResource {
    fn name(&self) -> &str {
        "security/auth"
    }

    fn specs(&self) -> Vec<Box<dyn SpecProvider>> {
        let manager = self.manager.clone();
        let issuer = self.issuer.clone();
        let login_spec = Spec::handler("login", move |params: Params<LoginParams>| {
            let manager = manager.clone();
            let issuer = issuer.clone();
            async move { Ok(Json(login(manager, issuer, params.0).await?)) }
        })
        .public_access()
        .audited();

        let manager = self.manager.clone();
        let issuer = self.issuer.clone();
        let refresh_spec = Spec::handler("refresh", move |params: Params<RefreshParams>| {
            let manager = manager.clone();
            let issuer = issuer.clone();
            async move {
                let principal = manager
                    .authenticate(&Authentication::Refresh {
                        token: params.0.refresh_token,
                    })
                    .await?;
                Ok(Json(issuer.generate(&principal)?))
            }
        })
        .public_access();

        // Token invalidation lives with the caller (and any blacklist the
        // application installs); the core endpoint only confirms the call.
        let logout_spec = Spec::handler("logout", |_principal: Principal| async move {
            Ok(Json(Value::Null))
        })
        .audited();

        let user_info = self.user_info.clone();
        let user_info_spec = Spec::handler("get_user_info", move |ctx: RpcContext, principal: Principal| {
            let user_info = user_info.clone();
            async move {
                match user_info {
                    Some(loader) => {
                        let info = loader
                            .load_user_info(&principal, &ctx.params_value())
                            .await?;
                        Ok(Json(info))
                    }
                    None => Ok(Json(serde_json::to_value(&principal)?)),
                }
            }
        });

        vec![
            Box::new(login_spec),
            Box::new(refresh_spec),
            Box::new(logout_spec),
            Box::new(user_info_spec),
        ]
    }
}
