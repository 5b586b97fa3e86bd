use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::context::DefinitionMeta;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::injector::Injector;

/// The tuple a handler is registered under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Identifier {
    pub resource: String,
    pub action: String,
    pub version: String,
}

impl Identifier {
    pub fn new(
        resource: impl Into<String>,
        action: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}@{}", self.resource, self.action, self.version)
    }
}

/// Per-definition rate-limit budget.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSpec {
    pub max: u64,
    pub window: Duration,
}

enum HandlerKind {
    Direct(BoxedHandler),
    /// Invoked exactly once, at registration, with dependencies pulled from
    /// the injector. The returned handler becomes the permanent entry point.
    Factory(Box<dyn FnOnce(&Injector) -> Result<BoxedHandler, Error> + Send>),
}

/// Declaration of one action on a resource: handler plus invocation
/// metadata. Built through the chained setters, consumed by
/// [`RegistryBuilder::register`].
pub struct Spec {
    action: String,
    version: String,
    public: bool,
    permission: Option<String>,
    rate_limit: Option<RateLimitSpec>,
    timeout: Option<Duration>,
    audit: bool,
    handler: HandlerKind,
}

impl Spec {
    /// Declare a direct handler, resolved per request through its bind plan.
    pub fn handler<H, Args>(action: impl Into<String>, handler: H) -> Self
    where
        H: Handler<Args>,
        Args: Send + Sync + 'static,
    {
        Self {
            action: action.into(),
            version: crate::envelope::DEFAULT_VERSION.to_string(),
            public: false,
            permission: None,
            rate_limit: None,
            timeout: None,
            audit: false,
            handler: HandlerKind::Direct(BoxedHandler::new(handler)),
        }
    }

    /// Declare a factory handler: the closure runs once at registration,
    /// resolves its own dependencies from the injector, and returns the
    /// permanent per-request handler.
    pub fn factory<F>(action: impl Into<String>, factory: F) -> Self
    where
        F: FnOnce(&Injector) -> Result<BoxedHandler, Error> + Send + 'static,
    {
        Self {
            action: action.into(),
            version: crate::envelope::DEFAULT_VERSION.to_string(),
            public: false,
            permission: None,
            rate_limit: None,
            timeout: None,
            audit: false,
            handler: HandlerKind::Factory(Box::new(factory)),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Skip authentication for this action.
    pub fn public_access(mut self) -> Self {
        self.public = true;
        self
    }

    /// Require the given permission token; checked after authentication.
    pub fn permission(mut self, token: impl Into<String>) -> Self {
        self.permission = Some(token.into());
        self
    }

    pub fn rate_limit(mut self, max: u64, window: Duration) -> Self {
        self.rate_limit = Some(RateLimitSpec { max, window });
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Emit an audit event after each invocation.
    pub fn audited(mut self) -> Self {
        self.audit = true;
        self
    }
}

/// Anything that can produce a [`Spec`] for a resource: a literal `Spec`, or
/// a nested provider (the CRUD builders) whose `provide` derives the spec
/// from the resource name.
pub trait SpecProvider: Send {
    fn provide(self: Box<Self>, resource: &str) -> Result<Spec, Error>;
}

impl SpecProvider for Spec {
    fn provide(self: Box<Self>, _resource: &str) -> Result<Spec, Error> {
        Ok(*self)
    }
}

/// A named group of actions. Resource names are slash-delimited lowercase
/// tokens (`sys/user`); actions are lowercase snake_case.
pub trait Resource: Send {
    fn name(&self) -> &str;
    fn specs(&self) -> Vec<Box<dyn SpecProvider>>;
}

/// The registry's record for one identifier.
pub struct Definition {
    pub identifier: Identifier,
    pub public: bool,
    pub permission: Option<String>,
    pub rate_limit: Option<RateLimitSpec>,
    pub timeout: Option<Duration>,
    pub audit: bool,
    handler: BoxedHandler,
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("identifier", &self.identifier)
            .field("public", &self.public)
            .field("permission", &self.permission)
            .field("rate_limit", &self.rate_limit)
            .field("timeout", &self.timeout)
            .field("audit", &self.audit)
            .finish()
    }
}

impl Definition {
    pub fn handler(&self) -> &BoxedHandler {
        &self.handler
    }

    pub fn meta(&self) -> DefinitionMeta {
        DefinitionMeta {
            identifier: self.identifier.clone(),
            public: self.public,
            permission: self.permission.clone(),
            audit: self.audit,
        }
    }
}

/// Introspection copy of a definition's metadata.
#[derive(Debug, Clone, Serialize)]
pub struct DefinitionInfo {
    pub identifier: Identifier,
    pub public: bool,
    pub permission: Option<String>,
    pub audit: bool,
}

/// Immutable index of definitions, read-only after startup.
pub struct ApiRegistry {
    definitions: HashMap<Identifier, Definition>,
}

impl ApiRegistry {
    pub fn builder(injector: Arc<Injector>) -> RegistryBuilder {
        RegistryBuilder {
            injector,
            definitions: HashMap::new(),
        }
    }

    pub fn lookup(&self, identifier: &Identifier) -> Option<&Definition> {
        self.definitions.get(identifier)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Immutable metadata snapshot, for introspection endpoints.
    pub fn snapshot(&self) -> Vec<DefinitionInfo> {
        let mut infos: Vec<DefinitionInfo> = self
            .definitions
            .values()
            .map(|d| DefinitionInfo {
                identifier: d.identifier.clone(),
                public: d.public,
                permission: d.permission.clone(),
                audit: d.audit,
            })
            .collect();
        infos.sort_by(|a, b| a.identifier.to_string().cmp(&b.identifier.to_string()));
        infos
    }
}

fn valid_resource_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('/').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        })
}

fn valid_action_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Startup-time builder. Factory handlers run here, exactly once per
/// registered spec; direct handlers are stored as-is.
pub struct RegistryBuilder {
    injector: Arc<Injector>,
    definitions: HashMap<Identifier, Definition>,
}

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("injector", &self.injector)
            .field("definitions", &self.definitions)
            .finish()
    }
}

impl RegistryBuilder {
    pub fn register(mut self, resource: impl Resource) -> Result<Self, Error> {
        let name = resource.name().to_string();
        if !valid_resource_name(&name) {
            return Err(Error::validation(format!(
                "invalid resource name '{name}': expected slash-delimited lowercase tokens"
            )));
        }

        for provider in resource.specs() {
            let spec = provider.provide(&name)?;
            if !valid_action_name(&spec.action) {
                return Err(Error::validation(format!(
                    "invalid action name '{}' on resource '{name}': expected lowercase snake_case",
                    spec.action
                )));
            }

            let identifier = Identifier::new(name.clone(), spec.action, spec.version);
            if self.definitions.contains_key(&identifier) {
                return Err(Error::duplicate_identifier(&identifier));
            }

            let handler = match spec.handler {
                HandlerKind::Direct(handler) => handler,
                HandlerKind::Factory(factory) => factory(&self.injector)?,
            };

            self.definitions.insert(
                identifier.clone(),
                Definition {
                    identifier,
                    public: spec.public,
                    permission: spec.permission,
                    rate_limit: spec.rate_limit,
                    timeout: spec.timeout,
                    audit: spec.audit,
                    handler,
                },
            );
        }

        Ok(self)
    }

    pub fn build(self) -> ApiRegistry {
        ApiRegistry {
            definitions: self.definitions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use crate::handler::Json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn ping() -> Result<Json<&'static str>, Error> {
        Ok(Json("pong"))
    }

    struct Demo {
        specs: fn() -> Vec<Box<dyn SpecProvider>>,
    }

    impl Resource for Demo {
        fn name(&self) -> &str {
            "sys/demo"
        }
        fn specs(&self) -> Vec<Box<dyn SpecProvider>> {
            (self.specs)()
        }
    }

    #[test]
    fn register_and_lookup() {
        let registry = ApiRegistry::builder(Arc::new(Injector::empty()))
            .register(Demo {
                specs: || vec![Box::new(Spec::handler("ping", ping).public_access())],
            })
            .unwrap()
            .build();

        let id = Identifier::new("sys/demo", "ping", "v1");
        let def = registry.lookup(&id).expect("registered");
        assert!(def.public);
        assert!(registry
            .lookup(&Identifier::new("sys/demo", "ping", "v2"))
            .is_none());
    }

    #[test]
    fn duplicate_identifier_rejected() {
        let err = ApiRegistry::builder(Arc::new(Injector::empty()))
            .register(Demo {
                specs: || {
                    vec![
                        Box::new(Spec::handler("ping", ping)),
                        Box::new(Spec::handler("ping", ping)),
                    ]
                },
            })
            .unwrap_err();
        assert_eq!(err.code(), code::DUPLICATE_IDENTIFIER);
    }

    #[test]
    fn same_action_different_version_allowed() {
        let registry = ApiRegistry::builder(Arc::new(Injector::empty()))
            .register(Demo {
                specs: || {
                    vec![
                        Box::new(Spec::handler("ping", ping)),
                        Box::new(Spec::handler("ping", ping).version("v2")),
                    ]
                },
            })
            .unwrap()
            .build();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn invalid_names_rejected() {
        struct Bad;
        impl Resource for Bad {
            fn name(&self) -> &str {
                "Sys/User"
            }
            fn specs(&self) -> Vec<Box<dyn SpecProvider>> {
                vec![]
            }
        }
        let err = ApiRegistry::builder(Arc::new(Injector::empty()))
            .register(Bad)
            .unwrap_err();
        assert_eq!(err.code(), code::VALIDATION_FAILED);
    }

    static FACTORY_CALLS: AtomicUsize = AtomicUsize::new(0);

    #[tokio::test]
    async fn factory_runs_exactly_once_at_registration() {
        let registry = ApiRegistry::builder(Arc::new(Injector::empty()))
            .register(Demo {
                specs: || {
                    vec![Box::new(Spec::factory("made", |_injector| {
                        FACTORY_CALLS.fetch_add(1, Ordering::SeqCst);
                        Ok(BoxedHandler::new(ping))
                    }))]
                },
            })
            .unwrap()
            .build();

        assert_eq!(FACTORY_CALLS.load(Ordering::SeqCst), 1);

        let id = Identifier::new("sys/demo", "made", "v1");
        let def = registry.lookup(&id).unwrap();
        for _ in 0..3 {
            let ctx = crate::context::RpcContext::builder(crate::envelope::RpcRequest::new(
                "sys/demo", "made",
            ))
            .build();
            def.handler().invoke(ctx).await.unwrap();
        }
        assert_eq!(FACTORY_CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn snapshot_is_sorted_metadata() {
        let registry = ApiRegistry::builder(Arc::new(Injector::empty()))
            .register(Demo {
                specs: || {
                    vec![
                        Box::new(Spec::handler("zz", ping)),
                        Box::new(Spec::handler("aa", ping).permission("sys/demo:view")),
                    ]
                },
            })
            .unwrap()
            .build();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].identifier.action, "aa");
        assert_eq!(snapshot[0].permission.as_deref(), Some("sys/demo:view"));
    }
}
