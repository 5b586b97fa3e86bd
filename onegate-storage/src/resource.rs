use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use onegate_core::{Error, Files, Json, Params, Resource, Spec, SpecProvider};

use crate::provider::{PutOptions, StorageProvider};
use crate::{promoted_key, temp_object_key};

#[derive(Debug, Deserialize, garde::Validate)]
pub struct KeyParams {
    #[garde(length(min = 1))]
    key: String,
}

#[derive(Debug, Deserialize, garde::Validate)]
#[serde(rename_all = "camelCase")]
pub struct PresignParams {
    #[garde(length(min = 1))]
    key: String,
    #[garde(skip)]
    #[serde(default = "default_expiry_secs")]
    expiry_secs: u64,
}

fn default_expiry_secs() -> u64 {
    15 * 60
}

#[derive(Debug, Deserialize, garde::Validate)]
pub struct ListParams {
    #[garde(skip)]
    #[serde(default)]
    prefix: String,
}

/// The built-in `base/storage` resource: `upload`, `get_presigned_url`,
/// `stat`, `list` and `promote`.
///
/// Uploads land under a dated `temp/` key; `promote` moves an object to its
/// permanent key by stripping that prefix.
pub struct StorageResource {
    provider: Arc<dyn StorageProvider>,
}

impl StorageResource {
    pub fn new(provider: Arc<dyn StorageProvider>) -> Self {
        Self { provider }
    }
}

impl Resource for StorageResource {
    fn name(&self) -> &str {
        "base/storage"
    }

    fn specs(&self) -> Vec<Box<dyn SpecProvider>> {
        let provider = self.provider.clone();
        let upload = Spec::handler("upload", move |files: Files| {
            let provider = provider.clone();
            async move {
                let file = files.require_file("file")?;
                let key = temp_object_key(file.extension().as_deref());
                let content_type = file
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let info = provider
                    .put_object(PutOptions::new(key, content_type, file.data.clone()))
                    .await?;
                Ok(Json(info))
            }
        });

        let provider = self.provider.clone();
        let presign = Spec::handler(
            "get_presigned_url",
            move |params: Params<PresignParams>| {
                let provider = provider.clone();
                async move {
                    let url = provider
                        .presigned_get_url(
                            &params.key,
                            Duration::from_secs(params.expiry_secs),
                        )
                        .await?;
                    Ok(Json(serde_json::json!({ "url": url })))
                }
            },
        );

        let provider = self.provider.clone();
        let stat = Spec::handler("stat", move |params: Params<KeyParams>| {
            let provider = provider.clone();
            async move { Ok(Json(provider.stat_object(&params.key).await?)) }
        });

        let provider = self.provider.clone();
        let list = Spec::handler("list", move |params: Params<ListParams>| {
            let provider = provider.clone();
            async move { Ok(Json(provider.list_objects(&params.prefix).await?)) }
        });

        let provider = self.provider.clone();
        let promote = Spec::handler("promote", move |params: Params<KeyParams>| {
            let provider = provider.clone();
            async move {
                let destination = promoted_key(&params.key).ok_or_else(|| {
                    Error::validation("only temp/ objects can be promoted")
                })?;
                let info = provider.copy_object(&params.key, destination).await?;
                provider.remove_object(&params.key).await?;
                Ok(Json(info))
            }
        });

        vec![
            Box::new(upload),
            Box::new(presign),
            Box::new(stat),
            Box::new(list),
            Box::new(promote),
        ]
    }
}
