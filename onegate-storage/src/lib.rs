//! Object storage surface of the onegate framework.
//!
//! The framework consumes storage through the [`StorageProvider`]
//! collaborator contract; the in-memory provider backs tests and local
//! development. The [`StorageResource`] exposes `base/storage` with
//! `upload`, `get_presigned_url`, `stat`, `list` and `promote`.

mod memory;
mod provider;
mod resource;

pub use memory::MemoryStorageProvider;
pub use provider::{ObjectInfo, PutOptions, StorageProvider};
pub use resource::StorageResource;

use uuid::Uuid;

/// Prefix for objects uploaded before their owning record exists.
pub const TEMP_PREFIX: &str = "temp/";

/// Key for a freshly uploaded temporary object:
/// `temp/YYYY/MM/DD/<uuid>.<ext>` (no dot suffix when the extension is
/// unknown).
pub fn temp_object_key(extension: Option<&str>) -> String {
    let date = chrono::Utc::now().format("%Y/%m/%d");
    let id = Uuid::new_v4();
    match extension {
        Some(ext) if !ext.is_empty() => format!("{TEMP_PREFIX}{date}/{id}.{ext}"),
        _ => format!("{TEMP_PREFIX}{date}/{id}"),
    }
}

/// Permanent key for a promoted temp object: the `temp/` prefix is
/// stripped, everything else stays.
pub fn promoted_key(temp_key: &str) -> Option<&str> {
    temp_key.strip_prefix(TEMP_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_keys_carry_date_and_extension() {
        let key = temp_object_key(Some("png"));
        assert!(key.starts_with("temp/"));
        assert!(key.ends_with(".png"));
        assert_eq!(key.split('/').count(), 5);
    }

    #[test]
    fn promoted_key_strips_prefix_only_for_temp() {
        assert_eq!(
            promoted_key("temp/2026/08/01/abc.png"),
            Some("2026/08/01/abc.png")
        );
        assert_eq!(promoted_key("docs/abc.png"), None);
    }
}
