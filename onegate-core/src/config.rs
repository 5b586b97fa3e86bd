use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ingress::CorsSettings;

/// Error type for configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// The requested key was not found in the configuration.
    NotFound(String),
    /// The value could not be converted to the requested type.
    TypeMismatch { key: String, expected: &'static str },
    /// An I/O or YAML parsing error occurred while loading config files.
    Load(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(key) => write!(f, "config key not found: {key}"),
            ConfigError::TypeMismatch { key, expected } => {
                write!(f, "config type mismatch for '{key}': expected {expected}")
            }
            ConfigError::Load(msg) => write!(f, "config load error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A single configuration value.
#[derive(Debug, Clone)]
pub enum ConfigValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
    List(Vec<ConfigValue>),
}

impl ConfigValue {
    fn from_yaml(value: &serde_yaml::Value) -> Self {
        match value {
            serde_yaml::Value::Bool(b) => ConfigValue::Bool(*b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ConfigValue::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    ConfigValue::Float(f)
                } else {
                    ConfigValue::String(n.to_string())
                }
            }
            serde_yaml::Value::String(s) => ConfigValue::String(s.clone()),
            serde_yaml::Value::Null => ConfigValue::Null,
            serde_yaml::Value::Sequence(seq) => {
                ConfigValue::List(seq.iter().map(ConfigValue::from_yaml).collect())
            }
            other => ConfigValue::String(format!("{other:?}")),
        }
    }
}

/// Conversion from a [`ConfigValue`] into a concrete type.
pub trait FromConfigValue: Sized {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError>;
}

impl FromConfigValue for String {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::String(s) => Ok(s.clone()),
            ConfigValue::Integer(i) => Ok(i.to_string()),
            ConfigValue::Float(f) => Ok(f.to_string()),
            ConfigValue::Bool(b) => Ok(b.to_string()),
            _ => Err(ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: "String",
            }),
        }
    }
}

impl FromConfigValue for i64 {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::Integer(i) => Ok(*i),
            ConfigValue::String(s) => s.parse().map_err(|_| ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: "i64",
            }),
            _ => Err(ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: "i64",
            }),
        }
    }
}

impl FromConfigValue for u64 {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        let v: i64 = i64::from_config_value(value, key)?;
        u64::try_from(v).map_err(|_| ConfigError::TypeMismatch {
            key: key.to_string(),
            expected: "u64",
        })
    }
}

impl FromConfigValue for u16 {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        let v: i64 = i64::from_config_value(value, key)?;
        u16::try_from(v).map_err(|_| ConfigError::TypeMismatch {
            key: key.to_string(),
            expected: "u16",
        })
    }
}

impl FromConfigValue for bool {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::Bool(b) => Ok(*b),
            ConfigValue::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(ConfigError::TypeMismatch {
                    key: key.to_string(),
                    expected: "bool",
                }),
            },
            _ => Err(ConfigError::TypeMismatch {
                key: key.to_string(),
                expected: "bool",
            }),
        }
    }
}

impl<T: FromConfigValue> FromConfigValue for Option<T> {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::Null => Ok(None),
            v => T::from_config_value(v, key).map(Some),
        }
    }
}

impl<T: FromConfigValue> FromConfigValue for Vec<T> {
    fn from_config_value(value: &ConfigValue, key: &str) -> Result<Self, ConfigError> {
        match value {
            ConfigValue::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| T::from_config_value(v, &format!("{key}[{i}]")))
                .collect(),
            other => Ok(vec![T::from_config_value(other, key)?]),
        }
    }
}

/// Application configuration, flattened into dot-separated keys.
///
/// Resolution order (lowest to highest priority):
/// 1. `application.yaml` in the config directory (base)
/// 2. `application-{profile}.yaml` (profile overlay)
/// 3. `.env` / `.env.{profile}` files (never overwrite existing env vars)
/// 4. Environment variables (`APP_NAME` overrides `app.name`)
///
/// The config directory is the current working directory unless
/// `CONFIG_PATH` points elsewhere. The profile comes from `ONEGATE_PROFILE`,
/// falling back to the argument.
#[derive(Debug, Clone)]
pub struct OnegateConfig {
    values: HashMap<String, ConfigValue>,
    profile: String,
}

impl OnegateConfig {
    pub fn load(profile: &str) -> Result<Self, ConfigError> {
        let active_profile =
            std::env::var("ONEGATE_PROFILE").unwrap_or_else(|_| profile.to_string());
        let base_dir = std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let mut values = HashMap::new();
        load_yaml_file(&base_dir.join("application.yaml"), &mut values)?;
        load_yaml_file(
            &base_dir.join(format!("application-{active_profile}.yaml")),
            &mut values,
        )?;

        let _ = dotenvy::dotenv();
        let _ = dotenvy::from_filename(format!(".env.{active_profile}"));

        resolve_string_values(&mut values)?;

        // Env overlay. Convention: `app.database.url` <-> `APP_DATABASE_URL`.
        for (env_key, env_val) in std::env::vars() {
            let config_key = env_key.to_lowercase().replace('_', ".");
            values.insert(config_key, ConfigValue::String(env_val));
        }

        Ok(Self {
            values,
            profile: active_profile,
        })
    }

    /// Create a config from a YAML string (useful for testing).
    pub fn from_yaml_str(yaml: &str, profile: &str) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        load_yaml_str(yaml, &mut values)?;
        Ok(Self {
            values,
            profile: profile.to_string(),
        })
    }

    pub fn empty() -> Self {
        Self {
            values: HashMap::new(),
            profile: "test".to_string(),
        }
    }

    pub fn set(&mut self, key: &str, value: ConfigValue) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get<V: FromConfigValue>(&self, key: &str) -> Result<V, ConfigError> {
        let value = self
            .values
            .get(key)
            .ok_or_else(|| ConfigError::NotFound(key.to_string()))?;
        V::from_config_value(value, key)
    }

    pub fn get_or<V: FromConfigValue>(&self, key: &str, default: V) -> V {
        self.get(key).unwrap_or(default)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    // ── Well-known sections ─────────────────────────────────────────────

    pub fn app_name(&self) -> String {
        self.get_or("app.name", "onegate".to_string())
    }

    pub fn app_port(&self) -> u16 {
        self.get_or("app.port", 8080)
    }

    pub fn body_limit(&self) -> usize {
        self.get_or::<u64>("app.body_limit", 8 * 1024 * 1024) as usize
    }

    /// Refresh-token lifetime (`security.token_expires`, seconds).
    pub fn token_expires(&self) -> Duration {
        Duration::from_secs(self.get_or("security.token_expires", 7 * 24 * 3600))
    }

    pub fn cors(&self) -> CorsSettings {
        CorsSettings {
            enabled: self.get_or("cors.enabled", false),
            allow_origins: self.get_or("cors.allow_origins", Vec::new()),
        }
    }

    /// Message language for collaborator-provided translation tables.
    /// `I18N_LANGUAGE` overrides `app.language`.
    pub fn language(&self) -> String {
        std::env::var("I18N_LANGUAGE")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| self.get_or("app.language", "en".to_string()))
    }
}

/// Load and parse a YAML file, flattening it into the values map.
fn load_yaml_file(
    path: &Path,
    values: &mut HashMap<String, ConfigValue>,
) -> Result<(), ConfigError> {
    if path.exists() {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Load(e.to_string()))?;
        load_yaml_str(&content, values)?;
    }
    Ok(())
}

fn load_yaml_str(
    content: &str,
    values: &mut HashMap<String, ConfigValue>,
) -> Result<(), ConfigError> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| ConfigError::Load(e.to_string()))?;
    flatten_yaml("", &yaml, values);
    Ok(())
}

/// Flatten a YAML tree into dot-separated keys.
fn flatten_yaml(prefix: &str, value: &serde_yaml::Value, out: &mut HashMap<String, ConfigValue>) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map {
                let key_str = match k {
                    serde_yaml::Value::String(s) => s.clone(),
                    other => format!("{other:?}"),
                };
                let full_key = if prefix.is_empty() {
                    key_str
                } else {
                    format!("{prefix}.{key_str}")
                };
                flatten_yaml(&full_key, v, out);
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            if !prefix.is_empty() {
                out.insert(
                    prefix.to_string(),
                    ConfigValue::List(seq.iter().map(ConfigValue::from_yaml).collect()),
                );
            }
        }
        leaf => {
            if !prefix.is_empty() {
                out.insert(prefix.to_string(), ConfigValue::from_yaml(leaf));
            }
        }
    }
}

/// Resolve `${VAR}` / `${env:VAR}` / `${file:/path}` placeholders in string
/// values.
fn resolve_string_values(values: &mut HashMap<String, ConfigValue>) -> Result<(), ConfigError> {
    let keys: Vec<String> = values.keys().cloned().collect();
    for key in keys {
        if let Some(ConfigValue::String(s)) = values.get(&key) {
            if s.contains("${") {
                let resolved = resolve_placeholders(s)?;
                values.insert(key, ConfigValue::String(resolved));
            }
        }
    }
    Ok(())
}

fn resolve_reference(reference: &str) -> Result<String, ConfigError> {
    if let Some(path) = reference.strip_prefix("file:") {
        std::fs::read_to_string(path.trim())
            .map(|s| s.trim().to_string())
            .map_err(|e| ConfigError::Load(format!("secret file '{}': {}", path.trim(), e)))
    } else {
        let var = reference.strip_prefix("env:").unwrap_or(reference).trim();
        std::env::var(var).map_err(|_| ConfigError::NotFound(var.to_string()))
    }
}

fn resolve_placeholders(value: &str) -> Result<String, ConfigError> {
    let mut result = value.to_string();
    while let Some(start) = result.find("${") {
        let end = result[start..]
            .find('}')
            .ok_or_else(|| ConfigError::Load(format!("unclosed placeholder in: {value}")))?;
        let reference = &result[start + 2..start + end];
        let resolved = resolve_reference(reference)?;
        result = format!(
            "{}{}{}",
            &result[..start],
            resolved,
            &result[start + end + 1..]
        );
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_keys_flatten() {
        let config = OnegateConfig::from_yaml_str(
            "app:\n  name: demo\n  port: 9000\nsecurity:\n  token_expires: 3600\n",
            "test",
        )
        .unwrap();
        assert_eq!(config.app_name(), "demo");
        assert_eq!(config.app_port(), 9000);
        assert_eq!(config.token_expires(), Duration::from_secs(3600));
    }

    #[test]
    fn missing_key_falls_back() {
        let config = OnegateConfig::empty();
        assert_eq!(config.app_port(), 8080);
        assert!(!config.cors().enabled);
    }

    #[test]
    fn list_values_parse() {
        let config = OnegateConfig::from_yaml_str(
            "cors:\n  enabled: true\n  allow_origins:\n    - https://a.example\n    - https://b.example\n",
            "test",
        )
        .unwrap();
        let cors = config.cors();
        assert!(cors.enabled);
        assert_eq!(cors.allow_origins.len(), 2);
    }

    #[test]
    fn type_mismatch_reported() {
        let config = OnegateConfig::from_yaml_str("app:\n  port: not-a-number\n", "test").unwrap();
        let err = config.get::<i64>("app.port").unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { .. }));
    }
}
