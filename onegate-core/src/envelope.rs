use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

/// Version used when the envelope omits one.
pub const DEFAULT_VERSION: &str = "v1";

/// The uniform request envelope carried by `POST /api` and `POST /openapi`.
///
/// Transported either as a single JSON body, or as `multipart/form-data`
/// where the scalar fields arrive as form fields, `params` as a nested JSON
/// string, and file parts land in the [`FileBag`] side channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub resource: String,
    pub action: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

impl RpcRequest {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            version: DEFAULT_VERSION.to_string(),
            params: Map::new(),
            meta: Map::new(),
        }
    }

    /// Apply envelope defaults: an absent or empty version becomes
    /// [`DEFAULT_VERSION`].
    pub fn normalize(mut self) -> Self {
        if self.version.is_empty() {
            self.version = DEFAULT_VERSION.to_string();
        }
        self
    }

    /// The params map as a JSON object value.
    pub fn params_value(&self) -> Value {
        Value::Object(self.params.clone())
    }
}

/// The uniform response envelope. `code == 0` means success; any other code
/// carries the taxonomy of §error codes. Application failures still travel
/// over HTTP 200 — the status is decided by the dispatcher's classifier,
/// never here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl RpcResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            code: 0,
            message: "ok".to_string(),
            data,
        }
    }

    pub fn from_error(err: &Error) -> Self {
        Self {
            code: err.code(),
            message: err.message().to_string(),
            data: Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Serialize the envelope. Always produces the full wrapper object,
    /// success or failure.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("response envelope is always serializable")
    }

    pub fn decode(raw: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(raw)?)
    }
}

// ── Multipart side channel ──────────────────────────────────────────────────

/// A file received through a multipart form part.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// The form field name the part was bound to.
    pub name: String,
    /// Original client-side file name, if any.
    pub file_name: Option<String>,
    /// MIME type declared by the client, if any.
    pub content_type: Option<String>,
    /// Raw part payload.
    pub data: Bytes,
}

impl UploadedFile {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Extension of the original file name, lowercased, without the dot.
    pub fn extension(&self) -> Option<String> {
        self.file_name
            .as_deref()
            .and_then(|n| n.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
    }
}

/// Side channel holding every multipart part that is not a scalar envelope
/// attribute, keyed by form field name. File parts and surplus text fields
/// both land here so handlers can bind them by name.
#[derive(Debug, Clone, Default)]
pub struct FileBag {
    files: HashMap<String, Vec<UploadedFile>>,
    extras: HashMap<String, Vec<String>>,
}

impl FileBag {
    pub fn push_file(&mut self, file: UploadedFile) {
        self.files.entry(file.name.clone()).or_default().push(file);
    }

    pub fn push_extra(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.extras.entry(name.into()).or_default().push(value.into());
    }

    /// First file bound to the given field name.
    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.get(name).and_then(|v| v.first())
    }

    /// All files bound to the given field name (list-valued parameters).
    pub fn files(&self, name: &str) -> &[UploadedFile] {
        self.files.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Like [`file`](Self::file), but a missing part is a validation error.
    pub fn require_file(&self, name: &str) -> Result<&UploadedFile, Error> {
        self.file(name)
            .ok_or_else(|| Error::validation(format!("missing file part '{name}'")))
    }

    /// First surplus text field with the given name.
    pub fn extra(&self, name: &str) -> Option<&str> {
        self.extras.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.extras.is_empty()
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

// ── Decoding ────────────────────────────────────────────────────────────────

/// Decode a JSON request body into the envelope.
pub fn decode_json(raw: &[u8]) -> Result<RpcRequest, Error> {
    let request: RpcRequest = serde_json::from_slice(raw)?;
    Ok(request.normalize())
}

/// Assemble an envelope from collected multipart form fields.
///
/// `resource`, `action`, `version` and `meta` map onto the scalar envelope
/// attributes; the `params` field holds a JSON-encoded object (absent means
/// empty). Every other part stays in the returned [`FileBag`].
pub fn decode_multipart(
    mut text_fields: HashMap<String, Vec<String>>,
    files: Vec<UploadedFile>,
) -> Result<(RpcRequest, FileBag), Error> {
    let mut take_scalar = |name: &str| -> Option<String> {
        let values = text_fields.get_mut(name)?;
        if values.is_empty() {
            None
        } else {
            Some(values.remove(0))
        }
    };

    let resource = take_scalar("resource")
        .ok_or_else(|| Error::validation("multipart envelope is missing the 'resource' field"))?;
    let action = take_scalar("action")
        .ok_or_else(|| Error::validation("multipart envelope is missing the 'action' field"))?;
    let version = take_scalar("version").unwrap_or_default();

    let params = match take_scalar("params") {
        Some(raw) if !raw.is_empty() => match serde_json::from_str::<Value>(&raw)? {
            Value::Object(map) => map,
            _ => return Err(Error::validation("the 'params' field must hold a JSON object")),
        },
        _ => Map::new(),
    };

    let meta = match take_scalar("meta") {
        Some(raw) if !raw.is_empty() => match serde_json::from_str::<Value>(&raw)? {
            Value::Object(map) => map,
            _ => return Err(Error::validation("the 'meta' field must hold a JSON object")),
        },
        _ => Map::new(),
    };

    let mut bag = FileBag::default();
    for file in files {
        bag.push_file(file);
    }
    for (name, values) in text_fields {
        for value in values {
            bag.push_extra(name.clone(), value);
        }
    }

    let request = RpcRequest {
        resource,
        action,
        version,
        params,
        meta,
    }
    .normalize();

    Ok((request, bag))
}
