use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use onegate_core::Error;

/// Maps a field value to its display label for `translate=<kind>` ops.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, value: &Value) -> Result<String, Error>;
}

/// Resolves a data-dictionary key to its code → label mapping.
#[async_trait]
pub trait DataDictLoader: Send + Sync {
    async fn load(&self, key: &str) -> Result<HashMap<String, String>, Error>;
}

/// Translator for `dict:<key>` kinds, looking codes up through the
/// configured [`DataDictLoader`].
pub struct DataDictTranslator {
    loader: Arc<dyn DataDictLoader>,
}

impl DataDictTranslator {
    pub fn new(loader: Arc<dyn DataDictLoader>) -> Self {
        Self { loader }
    }

    /// Translate one code. Unknown codes resolve to an empty string rather
    /// than an error; the dictionary may simply lag behind the data.
    pub async fn translate_key(&self, dict_key: &str, value: &Value) -> Result<String, Error> {
        let code = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return Ok(String::new()),
        };
        let entries = self.loader.load(dict_key).await?;
        Ok(entries.get(&code).cloned().unwrap_or_default())
    }
}
