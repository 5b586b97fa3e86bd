use serde::de::DeserializeOwned;
use serde::Serialize;

/// Audit column names shared by every managed entity.
pub mod audit {
    pub const CREATED_AT: &str = "created_at";
    pub const CREATED_BY: &str = "created_by";
    pub const UPDATED_AT: &str = "updated_at";
    pub const UPDATED_BY: &str = "updated_by";
}

/// A database entity managed by the CRUD builders.
///
/// Entities expose a stable primary key (`id` by default), creation and
/// update audit columns, and optionally an optimistic-lock version column.
/// Scan-only columns (joined display names) never touch write paths.
///
/// # Example
///
/// ```ignore
/// impl Entity for User {
///     fn table_name() -> &'static str { "sys_user" }
///     fn columns() -> &'static [&'static str] {
///         &["id", "username", "email", "created_at", "created_by",
///           "updated_at", "updated_by"]
///     }
/// }
/// ```
pub trait Entity: Send + Sync + 'static {
    fn table_name() -> &'static str;

    fn id_column() -> &'static str {
        "id"
    }

    /// Every persisted column, in insert order.
    fn columns() -> &'static [&'static str];

    /// Optimistic-lock column; `None` disables version checking.
    fn version_column() -> Option<&'static str> {
        None
    }

    /// Columns populated only on reads (typically joined `*_by_name`
    /// fields); excluded from INSERT and UPDATE.
    fn scan_only_columns() -> &'static [&'static str] {
        &["created_by_name", "updated_by_name"]
    }
}

/// The full bound set the CRUD builders need from a model type.
pub trait CrudModel: Entity + Serialize + DeserializeOwned {}

impl<T: Entity + Serialize + DeserializeOwned> CrudModel for T {}
