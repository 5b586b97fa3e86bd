use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use onegate_core::{
    ApiRegistry, BoxFuture, Error, FileBag, IdGenerator, Identifier, Injector, Principal, Reply,
    Resource, RpcContext, RpcRequest, SpecProvider, UploadedFile,
};
use onegate_data::{
    search_params, Create, CreateHooks, Database, DataScope, Db, DbTransaction, Delete, Entity,
    Export, ExportFormat, FindOptions, FindPage, FindTree, FindTreeOptions, Import, JsonRow,
    ScopeHandle, ScopeSource, SelfScope, SqlValue, Update,
};

// ── Fixture model ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Note {
    #[serde(default)]
    id: i64,
    title: String,
    #[serde(default)]
    version: i64,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    created_by: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
    #[serde(default)]
    updated_by: Option<String>,
}

impl Entity for Note {
    fn table_name() -> &'static str {
        "notes"
    }
    fn columns() -> &'static [&'static str] {
        &[
            "id",
            "title",
            "version",
            "created_at",
            "created_by",
            "updated_at",
            "updated_by",
        ]
    }
    fn version_column() -> Option<&'static str> {
        Some("version")
    }
}

#[derive(Debug, Deserialize)]
struct NoteSearch {
    #[allow(dead_code)]
    keyword: Option<String>,
}

search_params! {
    NoteSearch {
        keyword: "contains,column=title",
    }
}

#[derive(Debug, Serialize, Deserialize, garde::Validate)]
struct NoteParams {
    #[garde(length(min = 1))]
    title: String,
    #[serde(default)]
    #[garde(skip)]
    id: Option<i64>,
}

// ── Scripted database ───────────────────────────────────────────────────────

#[derive(Default)]
struct MockState {
    log: Vec<(String, Vec<SqlValue>)>,
    rows: Vec<JsonRow>,
    count: u64,
    affected: u64,
    fail_execute: bool,
}

#[derive(Clone)]
struct MockDb(Arc<Mutex<MockState>>);

impl MockDb {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(MockState {
            affected: 1,
            ..MockState::default()
        })))
    }

    fn with_rows(self, rows: Vec<JsonRow>) -> Self {
        self.0.lock().unwrap().rows = rows;
        self
    }

    fn with_count(self, count: u64) -> Self {
        self.0.lock().unwrap().count = count;
        self
    }

    fn with_affected(self, affected: u64) -> Self {
        self.0.lock().unwrap().affected = affected;
        self
    }

    fn log(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.0.lock().unwrap().log.clone()
    }

    fn statements(&self) -> Vec<String> {
        self.log().into_iter().map(|(sql, _)| sql).collect()
    }
}

fn row(value: Value) -> JsonRow {
    match value {
        Value::Object(map) => map,
        _ => panic!("row fixture must be an object"),
    }
}

#[async_trait]
impl Db for MockDb {
    async fn fetch_all(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<JsonRow>, Error> {
        let mut state = self.0.lock().unwrap();
        state.log.push((sql.to_string(), params.to_vec()));
        if sql.starts_with("SELECT COUNT") {
            let count = state.count;
            Ok(vec![row(json!({ "count": count }))])
        } else {
            Ok(state.rows.clone())
        }
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, Error> {
        let mut state = self.0.lock().unwrap();
        state.log.push((sql.to_string(), params.to_vec()));
        if state.fail_execute {
            return Err(Error::internal("scripted failure"));
        }
        Ok(state.affected)
    }

    async fn begin(&self) -> Result<Box<dyn DbTransaction>, Error> {
        self.0
            .lock()
            .unwrap()
            .log
            .push(("BEGIN".to_string(), Vec::new()));
        Ok(Box::new(MockTx(self.0.clone())))
    }
}

struct MockTx(Arc<Mutex<MockState>>);

#[async_trait]
impl DbTransaction for MockTx {
    async fn fetch_all(&mut self, sql: &str, params: &[SqlValue]) -> Result<Vec<JsonRow>, Error> {
        let mut state = self.0.lock().unwrap();
        state.log.push((sql.to_string(), params.to_vec()));
        Ok(state.rows.clone())
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, Error> {
        let mut state = self.0.lock().unwrap();
        state.log.push((sql.to_string(), params.to_vec()));
        if state.fail_execute {
            return Err(Error::internal("scripted failure"));
        }
        Ok(state.affected)
    }

    async fn commit(self: Box<Self>) -> Result<(), Error> {
        self.0
            .lock()
            .unwrap()
            .log
            .push(("COMMIT".to_string(), Vec::new()));
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), Error> {
        self.0
            .lock()
            .unwrap()
            .log
            .push(("ROLLBACK".to_string(), Vec::new()));
        Ok(())
    }
}

// ── Harness ─────────────────────────────────────────────────────────────────

struct SelfScopeSource;

impl ScopeSource for SelfScopeSource {
    fn resolve_data_scope<'a>(
        &'a self,
        _principal: &'a Principal,
        _token: &'a str,
    ) -> BoxFuture<'a, Result<Option<Arc<dyn DataScope>>, Error>> {
        Box::pin(async { Ok(Some(Arc::new(SelfScope::new()) as Arc<dyn DataScope>)) })
    }
}

struct TestResource {
    spec: Mutex<Option<Box<dyn SpecProvider>>>,
}

impl TestResource {
    fn new(spec: Box<dyn SpecProvider>) -> Self {
        Self {
            spec: Mutex::new(Some(spec)),
        }
    }
}

impl Resource for TestResource {
    fn name(&self) -> &str {
        "demo/note"
    }
    fn specs(&self) -> Vec<Box<dyn SpecProvider>> {
        vec![self.spec.lock().unwrap().take().expect("spec consumed twice")]
    }
}

struct Harness {
    registry: ApiRegistry,
    injector: Arc<Injector>,
}

fn harness(provider: Box<dyn SpecProvider>, db: &MockDb, scoped: bool) -> Harness {
    let mut builder = Injector::builder()
        .provide(Database::new(db.clone()))
        .provide(IdGenerator::new(1));
    if scoped {
        builder = builder.provide(ScopeHandle(Arc::new(SelfScopeSource)));
    }
    let injector = Arc::new(builder.build());

    let registry = ApiRegistry::builder(injector.clone())
        .register(TestResource::new(provider))
        .unwrap()
        .build();

    Harness { registry, injector }
}

impl Harness {
    async fn call(
        &self,
        action: &str,
        params: Value,
        principal: Option<Principal>,
        files: FileBag,
    ) -> Result<Reply, Error> {
        let identifier = Identifier::new("demo/note", action, "v1");
        let definition = self.registry.lookup(&identifier).expect("action registered");

        let mut request = RpcRequest::new("demo/note", action);
        request.params = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => panic!("params must be an object"),
        };

        let ctx = RpcContext::builder(request)
            .principal(principal)
            .injector(self.injector.clone())
            .definition(definition.meta())
            .files(files)
            .build();

        definition.handler().invoke(ctx).await
    }
}

fn alice() -> Principal {
    Principal::user("u1", "Alice").with_roles(["staff"])
}

fn note_row(id: i64, title: &str) -> JsonRow {
    row(json!({
        "id": id,
        "title": title,
        "version": 3,
        "created_at": "2026-01-01T00:00:00Z",
        "created_by": "u1",
        "updated_at": "2026-01-01T00:00:00Z",
        "updated_by": "u1",
    }))
}

// ── Read paths ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn find_page_applies_search_scope_and_count() {
    let db = MockDb::new()
        .with_rows(vec![note_row(1, "alpha")])
        .with_count(41);
    let h = harness(
        Box::new(FindPage::<Note, NoteSearch>::new()),
        &db,
        true,
    );

    let reply = h
        .call(
            "find_page",
            json!({"keyword": "al", "page": 1, "size": 20}),
            Some(alice()),
            FileBag::default(),
        )
        .await
        .unwrap();

    let data = reply.as_json().unwrap();
    assert_eq!(data["totalElements"], json!(41));
    assert_eq!(data["content"][0]["title"], json!("alpha"));

    let statements = db.statements();
    let select = statements
        .iter()
        .find(|s| s.starts_with("SELECT *"))
        .expect("page select issued");
    let count = statements
        .iter()
        .find(|s| s.starts_with("SELECT COUNT"))
        .expect("count query issued");

    // Search predicate and the Self data scope both land in the WHERE; the
    // count shares them but drops paging.
    assert!(select.contains("title LIKE ?"));
    assert!(select.contains("created_by = ?"));
    assert!(select.contains("LIMIT 20 OFFSET 20"));
    assert!(count.contains("created_by = ?"));
    assert!(!count.contains("LIMIT"));
}

#[tokio::test]
async fn find_page_without_scope_source_adds_no_filter() {
    let db = MockDb::new().with_rows(vec![note_row(1, "alpha")]);
    let h = harness(
        Box::new(FindPage::<Note, NoteSearch>::new()),
        &db,
        false,
    );

    h.call("find_page", json!({}), Some(alice()), FileBag::default())
        .await
        .unwrap();

    let select = db
        .statements()
        .into_iter()
        .find(|s| s.starts_with("SELECT *"))
        .unwrap();
    assert!(!select.contains("created_by"));
}

#[tokio::test]
async fn empty_keyword_emits_no_predicate() {
    let db = MockDb::new().with_rows(vec![note_row(1, "alpha")]);
    let h = harness(
        Box::new(FindPage::<Note, NoteSearch>::new()),
        &db,
        false,
    );

    h.call(
        "find_page",
        json!({"keyword": ""}),
        Some(alice()),
        FileBag::default(),
    )
    .await
    .unwrap();

    let select = db
        .statements()
        .into_iter()
        .find(|s| s.starts_with("SELECT *"))
        .unwrap();
    assert!(!select.contains("LIKE"));
}

// ── Tree walk (S7) ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Dept {
    id: String,
    #[serde(default)]
    parent_id: Option<String>,
    name: String,
}

impl Entity for Dept {
    fn table_name() -> &'static str {
        "depts"
    }
    fn columns() -> &'static [&'static str] {
        &["id", "parent_id", "name"]
    }
}

#[derive(Debug, Deserialize)]
struct DeptSearch {}

search_params! {
    DeptSearch {}
}

#[tokio::test]
async fn find_tree_builds_forest_from_cte_rows() {
    let db = MockDb::new().with_rows(vec![
        row(json!({"id": "A", "parent_id": null, "name": "a"})),
        row(json!({"id": "B", "parent_id": "A", "name": "b"})),
        row(json!({"id": "C", "parent_id": "B", "name": "c"})),
        row(json!({"id": "D", "parent_id": null, "name": "d"})),
    ]);

    struct DeptResource {
        spec: Mutex<Option<Box<dyn SpecProvider>>>,
    }
    impl Resource for DeptResource {
        fn name(&self) -> &str {
            "sys/dept"
        }
        fn specs(&self) -> Vec<Box<dyn SpecProvider>> {
            vec![self.spec.lock().unwrap().take().unwrap()]
        }
    }

    let injector = Arc::new(
        Injector::builder()
            .provide(Database::new(db.clone()))
            .build(),
    );
    let registry = ApiRegistry::builder(injector.clone())
        .register(DeptResource {
            spec: Mutex::new(Some(Box::new(
                FindTree::<Dept, DeptSearch>::new().public_access(),
            ))),
        })
        .unwrap()
        .build();

    let identifier = Identifier::new("sys/dept", "find_tree", "v1");
    let definition = registry.lookup(&identifier).unwrap();
    let ctx = RpcContext::builder(RpcRequest::new("sys/dept", "find_tree"))
        .injector(injector)
        .definition(definition.meta())
        .build();

    let reply = definition.handler().invoke(ctx).await.unwrap();
    let data = reply.as_json().unwrap();

    let forest = data.as_array().unwrap();
    assert_eq!(forest.len(), 2);
    assert_eq!(forest[0]["id"], json!("A"));
    assert_eq!(forest[0]["children"][0]["id"], json!("B"));
    assert_eq!(forest[0]["children"][0]["children"][0]["id"], json!("C"));
    assert_eq!(forest[1]["id"], json!("D"));
    assert!(forest[1]["children"].as_array().unwrap().is_empty());

    let sql = &db.statements()[0];
    assert!(sql.starts_with("WITH RECURSIVE"));
    assert!(sql.contains("depts.parent_id IS NULL"));
    assert!(sql.contains("UNION ALL"));
}

// ── Option lists ────────────────────────────────────────────────────────────

#[tokio::test]
async fn find_options_maps_label_and_value_columns() {
    let db = MockDb::new().with_rows(vec![note_row(1, "alpha"), note_row(2, "beta")]);
    let h = harness(
        Box::new(
            FindOptions::<Note, NoteSearch>::new()
                .label_column("title")
                .value_column("id"),
        ),
        &db,
        false,
    );

    let reply = h
        .call("find_options", json!({}), Some(alice()), FileBag::default())
        .await
        .unwrap();

    let options = reply.as_json().unwrap().as_array().unwrap().clone();
    assert_eq!(options.len(), 2);
    assert_eq!(options[0]["label"], json!("alpha"));
    assert_eq!(options[0]["value"], json!(1));
    assert!(options[0].get("description").is_none());
}

#[tokio::test]
async fn find_tree_options_builds_option_forest() {
    let db = MockDb::new().with_rows(vec![
        row(json!({"id": "A", "parent_id": null, "name": "a"})),
        row(json!({"id": "B", "parent_id": "A", "name": "b"})),
    ]);
    let h = harness(
        Box::new(
            FindTreeOptions::<Dept, DeptSearch>::new()
                .label_column("name")
                .value_column("id"),
        ),
        &db,
        false,
    );

    let reply = h
        .call(
            "find_tree_options",
            json!({}),
            Some(alice()),
            FileBag::default(),
        )
        .await
        .unwrap();

    let forest = reply.as_json().unwrap().as_array().unwrap().clone();
    assert_eq!(forest.len(), 1);
    assert_eq!(forest[0]["label"], json!("a"));
    assert_eq!(forest[0]["value"], json!("A"));
    assert_eq!(forest[0]["children"][0]["label"], json!("b"));

    let sql = &db.statements()[0];
    assert!(sql.starts_with("WITH RECURSIVE"));
}

// ── Mutations ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_stamps_id_and_audit_columns() {
    let db = MockDb::new();
    let h = harness(Box::new(Create::<Note, NoteParams>::new()), &db, false);

    let reply = h
        .call(
            "create",
            json!({"title": "hello"}),
            Some(alice()),
            FileBag::default(),
        )
        .await
        .unwrap();

    let id = reply.as_json().unwrap()["id"].as_i64().unwrap();
    assert!(id > 0, "generated snowflake id expected");

    let log = db.log();
    let (insert_sql, insert_params) = log
        .iter()
        .find(|(sql, _)| sql.starts_with("INSERT INTO notes"))
        .expect("insert issued");
    assert!(insert_sql.contains("title"));
    assert!(insert_sql.contains("created_at"));
    assert!(insert_sql.contains("created_by"));
    assert!(insert_params.contains(&SqlValue::Text("hello".to_string())));
    assert!(insert_params.contains(&SqlValue::Text("u1".to_string())));

    let statements = db.statements();
    assert!(statements.contains(&"BEGIN".to_string()));
    assert!(statements.contains(&"COMMIT".to_string()));
    assert!(!statements.contains(&"ROLLBACK".to_string()));
}

struct FailingPostCreate;

#[async_trait]
impl CreateHooks<Note, NoteParams> for FailingPostCreate {
    async fn post_create(
        &self,
        _ctx: &RpcContext,
        _tx: &mut dyn DbTransaction,
        _model: &Note,
        _params: &NoteParams,
    ) -> Result<(), Error> {
        Err(Error::domain(2001, "post hook rejected"))
    }
}

#[tokio::test]
async fn failing_post_hook_rolls_back() {
    let db = MockDb::new();
    let h = harness(
        Box::new(Create::<Note, NoteParams>::new().hooks(FailingPostCreate)),
        &db,
        false,
    );

    let err = h
        .call(
            "create",
            json!({"title": "hello"}),
            Some(alice()),
            FileBag::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), 2001);

    let statements = db.statements();
    assert!(statements.contains(&"ROLLBACK".to_string()));
    assert!(!statements.contains(&"COMMIT".to_string()));
}

#[tokio::test]
async fn create_rejects_invalid_params() {
    let db = MockDb::new();
    let h = harness(Box::new(Create::<Note, NoteParams>::new()), &db, false);

    let err = h
        .call("create", json!({"title": ""}), Some(alice()), FileBag::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), onegate_core::code::VALIDATION_FAILED);
    assert!(db.log().is_empty(), "no SQL before validation passes");
}

#[tokio::test]
async fn update_requires_existing_row() {
    let db = MockDb::new(); // no rows: load misses
    let h = harness(Box::new(Update::<Note, NoteParams>::new()), &db, false);

    let err = h
        .call(
            "update",
            json!({"id": 7, "title": "new"}),
            Some(alice()),
            FileBag::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), onegate_core::code::RECORD_NOT_FOUND);
}

#[tokio::test]
async fn update_detects_version_conflict() {
    let db = MockDb::new()
        .with_rows(vec![note_row(7, "old")])
        .with_affected(0);
    let h = harness(Box::new(Update::<Note, NoteParams>::new()), &db, false);

    let err = h
        .call(
            "update",
            json!({"id": 7, "title": "new"}),
            Some(alice()),
            FileBag::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), onegate_core::code::VERSION_CONFLICT);

    let statements = db.statements();
    let update = statements
        .iter()
        .find(|s| s.starts_with("UPDATE notes"))
        .unwrap();
    assert!(update.contains("version = 4"));
    assert!(update.contains("AND version = ?"));
    assert!(statements.contains(&"ROLLBACK".to_string()));
}

#[tokio::test]
async fn update_rewrites_update_audit_only() {
    let db = MockDb::new().with_rows(vec![note_row(7, "old")]);
    let h = harness(Box::new(Update::<Note, NoteParams>::new()), &db, false);

    h.call(
        "update",
        json!({"id": 7, "title": "new"}),
        Some(alice()),
        FileBag::default(),
    )
    .await
    .unwrap();

    let (update_sql, _) = db
        .log()
        .into_iter()
        .find(|(sql, _)| sql.starts_with("UPDATE notes"))
        .unwrap();
    assert!(update_sql.contains("updated_at = ?"));
    assert!(!update_sql.contains("created_at = ?"));
    assert!(!update_sql.contains("created_by = ?"));
}

#[tokio::test]
async fn delete_loads_then_deletes_in_transaction() {
    let db = MockDb::new().with_rows(vec![note_row(7, "old")]);
    let h = harness(Box::new(Delete::<Note>::new()), &db, false);

    h.call("delete", json!({"id": 7}), Some(alice()), FileBag::default())
        .await
        .unwrap();

    let statements = db.statements();
    assert!(statements.iter().any(|s| s.starts_with("SELECT * FROM notes")));
    assert!(statements
        .iter()
        .any(|s| s.starts_with("DELETE FROM notes WHERE id = ?")));
    assert!(statements.contains(&"COMMIT".to_string()));
}

// ── Import / export ─────────────────────────────────────────────────────────

#[tokio::test]
async fn import_inserts_all_rows_in_one_transaction() {
    let db = MockDb::new();
    let h = harness(Box::new(Import::<Note>::new()), &db, false);

    let mut bag = FileBag::default();
    bag.push_file(UploadedFile {
        name: "file".to_string(),
        file_name: Some("notes.csv".to_string()),
        content_type: Some("text/csv".to_string()),
        data: bytes::Bytes::from_static(b"title\nfirst\nsecond\n"),
    });

    let reply = h
        .call("import", json!({}), Some(alice()), bag)
        .await
        .unwrap();
    assert_eq!(reply.as_json().unwrap()["imported"], json!(2));

    let statements = db.statements();
    let inserts = statements
        .iter()
        .filter(|s| s.starts_with("INSERT INTO notes"))
        .count();
    assert_eq!(inserts, 2);
    assert_eq!(
        statements.iter().filter(|s| *s == "BEGIN").count(),
        1,
        "single transaction for the whole file"
    );
    assert!(statements.contains(&"COMMIT".to_string()));
}

#[tokio::test]
async fn import_missing_file_is_validation_error() {
    let db = MockDb::new();
    let h = harness(Box::new(Import::<Note>::new()), &db, false);

    let err = h
        .call("import", json!({}), Some(alice()), FileBag::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), onegate_core::code::VALIDATION_FAILED);
}

#[tokio::test]
async fn export_streams_csv_with_requested_format() {
    let db = MockDb::new().with_rows(vec![note_row(1, "alpha"), note_row(2, "beta")]);
    let h = harness(
        Box::new(
            Export::<Note, NoteSearch>::new()
                .default_format(ExportFormat::Xlsx)
                .columns(["id", "title"]),
        ),
        &db,
        false,
    );

    let reply = h
        .call(
            "export",
            json!({"format": "csv"}),
            Some(alice()),
            FileBag::default(),
        )
        .await
        .unwrap();

    match reply {
        Reply::File(payload) => {
            assert_eq!(payload.content_type, "text/csv");
            assert!(payload.filename.starts_with("demo-note-"));
            assert!(payload.filename.ends_with(".csv"));
            let text = String::from_utf8(payload.data.to_vec()).unwrap();
            let mut lines = text.lines();
            assert_eq!(lines.next(), Some("id,title"));
            assert_eq!(lines.next(), Some("1,alpha"));
            assert_eq!(lines.next(), Some("2,beta"));
        }
        Reply::Json(_) => panic!("export must produce a file reply"),
    }
}
