//! Mold: tag-directed field transformation.
//!
//! Runs on the decoded `params` JSON value after envelope decode and before
//! struct decode + validation. Plans are registered per parameter type in
//! the op-chain grammar (`"trim,translate=dict:gender"`, with `dive` to
//! descend into containers and `keys`..`endkeys` to rewrite map keys), and
//! cached by type; chains are cached by tag string.

mod chain;
mod ops;
mod translate;

pub use chain::{parse_chain, Op, Step};
pub use ops::{DefaultOp, LowerOp, TrimOp, UpperOp};
pub use translate::{DataDictLoader, DataDictTranslator, Translator};

use std::any::TypeId;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use onegate_core::{Error, RpcContext, Transformer, ValueTransform};

/// One registered field-level op. Ops mutate the field value in place;
/// translation is handled by the registry itself because it writes a
/// sibling field.
#[async_trait]
pub trait FieldTransformer: Send + Sync {
    /// The op name used in chains (`trim`, `default`, ...).
    fn name(&self) -> &'static str;

    async fn transform(
        &self,
        ctx: &RpcContext,
        value: &mut Value,
        arg: Option<&str>,
    ) -> Result<(), Error>;
}

/// A transformer running once per struct instance, after field ops.
#[async_trait]
pub trait StructTransformer: Send + Sync {
    async fn transform(&self, ctx: &RpcContext, object: &mut Map<String, Value>)
        -> Result<(), Error>;
}

struct FieldPlan {
    field: String,
    steps: Arc<Vec<Step>>,
}

struct StructPlan {
    fields: Vec<FieldPlan>,
}

/// The mold registry: op and translator registrations plus per-type plans.
///
/// Registration is meant to complete during startup, before the first
/// request; the maps are concurrent so readers never block each other.
pub struct MoldRegistry {
    transformers: DashMap<String, Arc<dyn FieldTransformer>>,
    translators: DashMap<String, Arc<dyn Translator>>,
    struct_transformers: DashMap<TypeId, Vec<Arc<dyn StructTransformer>>>,
    plans: DashMap<TypeId, Arc<StructPlan>>,
    chains: DashMap<String, Arc<Vec<Step>>>,
    dict_loader: RwLock<Option<Arc<dyn DataDictLoader>>>,
}

impl MoldRegistry {
    /// A registry with the built-in ops (`trim`, `lower`, `upper`,
    /// `default`) installed.
    pub fn new() -> Arc<Self> {
        let registry = Self {
            transformers: DashMap::new(),
            translators: DashMap::new(),
            struct_transformers: DashMap::new(),
            plans: DashMap::new(),
            chains: DashMap::new(),
            dict_loader: RwLock::new(None),
        };
        registry.register_transformer(TrimOp);
        registry.register_transformer(LowerOp);
        registry.register_transformer(UpperOp);
        registry.register_transformer(DefaultOp);
        Arc::new(registry)
    }

    pub fn register_transformer(&self, transformer: impl FieldTransformer + 'static) {
        self.transformers
            .insert(transformer.name().to_string(), Arc::new(transformer));
    }

    /// Register a translator under its kind (`gender`, `status`, ...).
    /// Kinds prefixed `dict:` are served by the data-dictionary loader
    /// instead.
    pub fn register_translator(&self, kind: impl Into<String>, translator: impl Translator + 'static) {
        self.translators.insert(kind.into(), Arc::new(translator));
    }

    pub fn register_dict_loader(&self, loader: Arc<dyn DataDictLoader>) {
        *self.dict_loader.write().expect("mold registry lock poisoned") = Some(loader);
    }

    pub fn register_struct_transformer<T: 'static>(
        &self,
        transformer: impl StructTransformer + 'static,
    ) {
        self.struct_transformers
            .entry(TypeId::of::<T>())
            .or_default()
            .push(Arc::new(transformer));
    }

    /// Register the field plan for a parameter type: `(field, chain)` pairs
    /// in the op-chain grammar. Malformed chains fail here, at startup.
    pub fn register_plan<T: 'static>(&self, fields: &[(&str, &str)]) -> Result<(), Error> {
        let mut plan = Vec::with_capacity(fields.len());
        for (field, tag) in fields {
            let steps = self.chain_for(tag)?;
            plan.push(FieldPlan {
                field: field.to_string(),
                steps,
            });
        }
        self.plans
            .insert(TypeId::of::<T>(), Arc::new(StructPlan { fields: plan }));
        Ok(())
    }

    fn chain_for(&self, tag: &str) -> Result<Arc<Vec<Step>>, Error> {
        if let Some(chain) = self.chains.get(tag) {
            return Ok(chain.clone());
        }
        let chain = Arc::new(parse_chain(tag)?);
        self.chains.insert(tag.to_string(), chain.clone());
        Ok(chain)
    }

    /// The clonable handle handed to the injector.
    pub fn handle(self: &Arc<Self>) -> Transformer {
        Transformer(self.clone() as Arc<dyn ValueTransform>)
    }

    async fn run_op(
        &self,
        ctx: &RpcContext,
        name: &str,
        arg: Option<&str>,
        value: &mut Value,
    ) -> Result<(), Error> {
        let Some(transformer) = self.transformers.get(name).map(|t| t.clone()) else {
            return Err(Error::validation(format!("unknown mold op '{name}'")));
        };
        transformer.transform(ctx, value, arg).await
    }

    fn apply_steps<'a>(
        &'a self,
        ctx: &'a RpcContext,
        steps: &'a [Step],
        value: &'a mut Value,
        sibling: &'a mut Option<(String, Value)>,
        field: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let mut index = 0;
            while index < steps.len() {
                match &steps[index] {
                    Step::Op(op) => {
                        if op.name == "translate" {
                            self.run_translate(op.arg.as_deref(), value, sibling, field)
                                .await?;
                        } else {
                            self.run_op(ctx, &op.name, op.arg.as_deref(), value).await?;
                        }
                    }
                    Step::Keys(ops) => {
                        if let Value::Object(map) = value {
                            let mut rebuilt = Map::with_capacity(map.len());
                            for (key, entry) in std::mem::take(map) {
                                let mut key_value = Value::String(key);
                                for op in ops {
                                    self.run_op(ctx, &op.name, op.arg.as_deref(), &mut key_value)
                                        .await?;
                                }
                                let key = match key_value {
                                    Value::String(s) => s,
                                    other => other.to_string(),
                                };
                                rebuilt.insert(key, entry);
                            }
                            *map = rebuilt;
                        }
                    }
                    Step::Dive => {
                        // The remaining chain applies to each element.
                        let rest = &steps[index + 1..];
                        match value {
                            Value::Array(items) => {
                                for item in items {
                                    let mut nested = None;
                                    self.apply_steps(ctx, rest, item, &mut nested, None).await?;
                                }
                            }
                            Value::Object(map) => {
                                for (_, entry) in map.iter_mut() {
                                    let mut nested = None;
                                    self.apply_steps(ctx, rest, entry, &mut nested, None).await?;
                                }
                            }
                            _ => {}
                        }
                        return Ok(());
                    }
                }
                index += 1;
            }
            Ok(())
        })
    }

    /// `translate=<kind>`: look up the translator for the kind and write
    /// the result into the sibling `<field>Desc` slot. Kinds ending in `?`
    /// are optional: an unregistered translator is silently skipped.
    async fn run_translate(
        &self,
        arg: Option<&str>,
        value: &Value,
        sibling: &mut Option<(String, Value)>,
        field: Option<&str>,
    ) -> Result<(), Error> {
        let Some(field) = field else {
            // Inside dive there is no named field to hang a sibling on.
            tracing::debug!("translate op ignored inside a container element");
            return Ok(());
        };
        let Some(kind) = arg else {
            return Err(Error::validation("translate op requires a kind argument"));
        };

        let (kind, optional) = match kind.strip_suffix('?') {
            Some(kind) => (kind, true),
            None => (kind, false),
        };

        if value.is_null() {
            return Ok(());
        }

        let translated = if let Some(translator) = self.translators.get(kind).map(|t| t.clone()) {
            translator.translate(value).await?
        } else if let Some(dict_key) = kind.strip_prefix("dict:") {
            let loader = self
                .dict_loader
                .read()
                .expect("mold registry lock poisoned")
                .clone();
            let Some(loader) = loader else {
                if optional {
                    return Ok(());
                }
                return Err(Error::not_implemented(
                    "dictionary translation requires a data-dict loader",
                ));
            };
            DataDictTranslator::new(loader).translate_key(dict_key, value).await?
        } else {
            if optional {
                return Ok(());
            }
            return Err(Error::validation(format!("no translator registered for '{kind}'")));
        };

        *sibling = Some((format!("{field}Desc"), Value::String(translated)));
        Ok(())
    }
}

impl ValueTransform for MoldRegistry {
    fn transform<'a>(
        &'a self,
        type_id: TypeId,
        value: &'a mut Value,
        ctx: &'a RpcContext,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let Some(plan) = self.plans.get(&type_id).map(|p| p.clone()) else {
                return Ok(());
            };
            let Value::Object(object) = value else {
                return Ok(());
            };

            for field_plan in &plan.fields {
                let Some(mut field_value) = object.remove(&field_plan.field) else {
                    continue;
                };
                let mut sibling = None;
                let result = self
                    .apply_steps(
                        ctx,
                        &field_plan.steps,
                        &mut field_value,
                        &mut sibling,
                        Some(&field_plan.field),
                    )
                    .await;
                object.insert(field_plan.field.clone(), field_value);
                result?;
                if let Some((name, translated)) = sibling {
                    object.insert(name, translated);
                }
            }

            if let Some(struct_transformers) = self.struct_transformers.get(&type_id) {
                let transformers: Vec<_> = struct_transformers.clone();
                drop(struct_transformers);
                for transformer in transformers {
                    transformer.transform(ctx, object).await?;
                }
            }

            Ok(())
        })
    }

    fn has_plan(&self, type_id: TypeId) -> bool {
        self.plans.contains_key(&type_id) || self.struct_transformers.contains_key(&type_id)
    }
}
