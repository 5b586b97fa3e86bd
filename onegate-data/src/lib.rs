//! Data access layer of the onegate framework.
//!
//! Owns the entity/auditable contract, the condition and select builders
//! (including recursive-CTE tree walks), the search-tag compiler, data
//! scopes, and the generic CRUD operation family. Concrete drivers live
//! behind the narrow [`Db`](db::Db) collaborator trait.

pub mod condition;
pub mod crud;
pub mod db;
pub mod entity;
pub mod hooks;
pub mod page;
pub mod query_config;
pub mod scope;
pub mod search;
pub mod select;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod value;

pub use condition::{CmpOp, ConditionBuilder, MatchKind, Predicate};
pub use crud::{
    build_forest, Create, CreateMany, Delete, DeleteMany, Export, ExportFormat, FindAll,
    FindOne, FindOptions, FindPage, FindTree, FindTreeOptions, Import, OptionItem, OptionNode,
    OptionsMapping, TreeNode, Update, UpdateMany,
};
pub use db::{Database, Db, DbTransaction, JsonRow};
pub use entity::{audit, CrudModel, Entity};
pub use hooks::{CreateHooks, DeleteHooks, ExportHooks, ImportHooks, NoHooks, UpdateHooks};
pub use page::{Page, Pageable};
pub use query_config::{QueryConfig, QueryPart};
pub use scope::{apply_scope, priority, AllScope, DataScope, ScopeHandle, ScopeSource, SelfScope};
pub use search::{parse_tag, plan_for, SearchFieldSpec, SearchOp, SearchParams, SearchPlan};
pub use select::{Dialect, Join, JoinKind, RecursiveSelect, SelectBuilder, Sort};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDb;
pub use value::SqlValue;
