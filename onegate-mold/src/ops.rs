use async_trait::async_trait;
use serde_json::Value;

use onegate_core::{Error, RpcContext};

use crate::FieldTransformer;

/// `trim`: strip leading and trailing whitespace from string values.
pub struct TrimOp;

#[async_trait]
impl FieldTransformer for TrimOp {
    fn name(&self) -> &'static str {
        "trim"
    }

    async fn transform(
        &self,
        _ctx: &RpcContext,
        value: &mut Value,
        _arg: Option<&str>,
    ) -> Result<(), Error> {
        if let Value::String(s) = value {
            let trimmed = s.trim();
            if trimmed.len() != s.len() {
                *s = trimmed.to_string();
            }
        }
        Ok(())
    }
}

/// `lower`: lowercase string values.
pub struct LowerOp;

#[async_trait]
impl FieldTransformer for LowerOp {
    fn name(&self) -> &'static str {
        "lower"
    }

    async fn transform(
        &self,
        _ctx: &RpcContext,
        value: &mut Value,
        _arg: Option<&str>,
    ) -> Result<(), Error> {
        if let Value::String(s) = value {
            *s = s.to_lowercase();
        }
        Ok(())
    }
}

/// `upper`: uppercase string values.
pub struct UpperOp;

#[async_trait]
impl FieldTransformer for UpperOp {
    fn name(&self) -> &'static str {
        "upper"
    }

    async fn transform(
        &self,
        _ctx: &RpcContext,
        value: &mut Value,
        _arg: Option<&str>,
    ) -> Result<(), Error> {
        if let Value::String(s) = value {
            *s = s.to_uppercase();
        }
        Ok(())
    }
}

/// `default=<v>`: replace null or empty-string values with the argument.
pub struct DefaultOp;

#[async_trait]
impl FieldTransformer for DefaultOp {
    fn name(&self) -> &'static str {
        "default"
    }

    async fn transform(
        &self,
        _ctx: &RpcContext,
        value: &mut Value,
        arg: Option<&str>,
    ) -> Result<(), Error> {
        let Some(arg) = arg else {
            return Err(Error::validation("default op requires an argument"));
        };
        let empty = match value {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        };
        if empty {
            *value = Value::String(arg.to_string());
        }
        Ok(())
    }
}
