use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::{json, Value};

use onegate_core::{Error, FilePayload, Files, Json, Reply, RpcContext, Spec, SpecProvider};

use crate::db::{Database, JsonRow};
use crate::entity::{CrudModel, Entity};
use crate::hooks::{ExportHooks, ImportHooks, NoHooks};
use crate::query_config::QueryConfig;
use crate::search::SearchParams;

use super::write::insert_model;
use super::{
    compile_plan, decode_model, flat_query, prepare_insert, scoped, search_conditions,
    BuilderMeta, FLAT_PARTS,
};

// ── import ──────────────────────────────────────────────────────────────────

/// `import`: parse an uploaded CSV file, validate each row through the
/// import hooks, insert everything in a single transaction.
pub struct Import<M> {
    meta: BuilderMeta,
    hooks: Arc<dyn ImportHooks<M>>,
    file_param: String,
    _marker: PhantomData<fn() -> M>,
}

impl<M: CrudModel> Import<M> {
    pub fn new() -> Self {
        Self {
            meta: BuilderMeta::default(),
            hooks: Arc::new(NoHooks),
            file_param: "file".to_string(),
            _marker: PhantomData,
        }
    }

    pub fn hooks(mut self, hooks: impl ImportHooks<M> + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Multipart field name the file binds to. Defaults to `file`.
    pub fn file_param(mut self, name: impl Into<String>) -> Self {
        self.file_param = name.into();
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.meta.action = Some(action.into());
        self
    }

    pub fn permission(mut self, token: impl Into<String>) -> Self {
        self.meta.permission = Some(token.into());
        self
    }

    pub fn audited(mut self) -> Self {
        self.meta.audit = true;
        self
    }
}

impl<M: CrudModel> Default for Import<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse CSV bytes into JSON rows keyed by header. Cell values are coerced
/// to numbers and booleans where they parse cleanly.
pub(crate) fn csv_rows(data: &[u8]) -> Result<Vec<JsonRow>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data);

    let headers = reader
        .headers()
        .map_err(|e| Error::validation(format!("malformed CSV header: {e}")))?
        .clone();

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record =
            record.map_err(|e| Error::validation(format!("malformed CSV row {index}: {e}")))?;
        let mut row = JsonRow::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            row.insert(header.to_string(), coerce_cell(cell));
        }
        rows.push(row);
    }
    Ok(rows)
}

fn coerce_cell(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = cell.parse::<f64>() {
        return Value::from(f);
    }
    match cell {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::from(cell),
    }
}

impl<M: CrudModel> SpecProvider for Import<M> {
    fn provide(self: Box<Self>, resource: &str) -> Result<Spec, Error> {
        let hooks = self.hooks.clone();
        let file_param = self.file_param.clone();

        let handler = move |ctx: RpcContext, db: Database, files: Files| {
            let hooks = hooks.clone();
            let file_param = file_param.clone();
            async move {
                let file = files.require_file(&file_param)?;
                let rows = csv_rows(&file.data)?;
                if rows.is_empty() {
                    return Err(Error::validation("import file has no data rows"));
                }

                let mut models: Vec<M> = Vec::with_capacity(rows.len());
                for (index, row) in rows.into_iter().enumerate() {
                    let obj = prepare_insert::<M>(&ctx, row);
                    let mut model: M = decode_model(&obj)
                        .map_err(|e| Error::validation(format!("row {index}: {e}")))?;
                    hooks.pre_import(&ctx, index, &mut model).await?;
                    models.push(model);
                }

                let mut tx = db.begin().await?;
                for model in &models {
                    if let Err(err) = insert_model(tx.as_mut(), model, db.dialect()).await {
                        if let Err(rollback_err) = tx.rollback().await {
                            tracing::error!(error = %rollback_err, "rollback failed");
                        }
                        return Err(err);
                    }
                }
                if let Err(err) = hooks.post_import(&ctx, tx.as_mut(), &models).await {
                    if let Err(rollback_err) = tx.rollback().await {
                        tracing::error!(error = %rollback_err, "rollback failed");
                    }
                    return Err(err);
                }
                tx.commit().await?;

                Ok(Json(json!({ "imported": models.len() })))
            }
        };

        let action = self.meta.action("import").to_string();
        Ok(self
            .meta
            .spec("create", resource, Spec::handler(action, handler)))
    }
}

// ── export ──────────────────────────────────────────────────────────────────

/// Export stream formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "csv" => Some(ExportFormat::Csv),
            "xlsx" => Some(ExportFormat::Xlsx),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

type FilenameFn = Arc<dyn Fn(&RpcContext) -> String + Send + Sync>;

/// `export`: run the filtered, scoped query and stream the rows as CSV or
/// XLSX. The format comes from the request's `format` param, falling back to
/// the builder default.
pub struct Export<M, P> {
    meta: BuilderMeta,
    config: QueryConfig,
    hooks: Arc<dyn ExportHooks>,
    default_format: ExportFormat,
    columns: Option<Vec<String>>,
    filename: Option<FilenameFn>,
    _marker: PhantomData<fn() -> (M, P)>,
}

impl<M: CrudModel, P: SearchParams> Export<M, P> {
    pub fn new() -> Self {
        Self {
            meta: BuilderMeta::default(),
            config: QueryConfig::new(),
            hooks: Arc::new(NoHooks),
            default_format: ExportFormat::Xlsx,
            columns: None,
            filename: None,
            _marker: PhantomData,
        }
    }

    pub fn hooks(mut self, hooks: impl ExportHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn default_format(mut self, format: ExportFormat) -> Self {
        self.default_format = format;
        self
    }

    /// Restrict and order the exported columns. Defaults to the entity's
    /// full column list.
    pub fn columns(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Custom file-name builder. The default is
    /// `<resource>-<yyyyMMdd>.<ext>` with slashes dashed.
    pub fn filename(mut self, f: impl Fn(&RpcContext) -> String + Send + Sync + 'static) -> Self {
        self.filename = Some(Arc::new(f));
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.meta.action = Some(action.into());
        self
    }

    pub fn permission(mut self, token: impl Into<String>) -> Self {
        self.meta.permission = Some(token.into());
        self
    }

    pub fn audited(mut self) -> Self {
        self.meta.audit = true;
        self
    }

    pub fn query(mut self, build: impl FnOnce(&mut QueryConfig)) -> Self {
        build(&mut self.config);
        self
    }
}

impl<M: CrudModel, P: SearchParams> Default for Export<M, P> {
    fn default() -> Self {
        Self::new()
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn encode_csv(columns: &[String], rows: &[JsonRow]) -> Result<Vec<u8>, Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(columns)
        .map_err(|e| Error::internal("failed to write CSV header").with_cause(e))?;
    for row in rows {
        let record: Vec<String> = columns
            .iter()
            .map(|c| cell_text(row.get(c).unwrap_or(&Value::Null)))
            .collect();
        writer
            .write_record(&record)
            .map_err(|e| Error::internal("failed to write CSV row").with_cause(e))?;
    }
    writer
        .into_inner()
        .map_err(|e| Error::internal(format!("failed to flush CSV stream: {e}")))
}

pub(crate) fn encode_xlsx(columns: &[String], rows: &[JsonRow]) -> Result<Vec<u8>, Error> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (col, name) in columns.iter().enumerate() {
        worksheet
            .write_string(0, col as u16, name)
            .map_err(|e| Error::internal(format!("failed to write XLSX header: {e}")))?;
    }
    for (row_index, row) in rows.iter().enumerate() {
        for (col, name) in columns.iter().enumerate() {
            let text = cell_text(row.get(name).unwrap_or(&Value::Null));
            worksheet
                .write_string((row_index + 1) as u32, col as u16, &text)
                .map_err(|e| Error::internal(format!("failed to write XLSX cell: {e}")))?;
        }
    }

    workbook
        .save_to_buffer()
        .map_err(|e| Error::internal(format!("failed to serialize XLSX workbook: {e}")))
}

impl<M: CrudModel, P: SearchParams> SpecProvider for Export<M, P> {
    fn provide(self: Box<Self>, resource: &str) -> Result<Spec, Error> {
        let plan = compile_plan::<P>()?;
        let config = Arc::new(self.config);
        let hooks = self.hooks.clone();
        let default_format = self.default_format;
        let columns = self.columns.clone();
        let filename = self.filename.clone();

        let handler = {
            let config = config.clone();
            move |ctx: RpcContext, db: Database| {
                let plan = plan.clone();
                let config = config.clone();
                let hooks = hooks.clone();
                let columns = columns.clone();
                let filename = filename.clone();
                async move {
                    let conditions = search_conditions(&plan, &config, FLAT_PARTS, &ctx);
                    let query = flat_query::<M>(&config, conditions, &db);
                    let query = scoped(&ctx, M::table_name(), query).await?;
                    let (sql, params) = query.build_select();
                    let mut rows = db.fetch_all(&sql, &params).await?;

                    hooks.pre_export(&ctx, &mut rows).await?;

                    let format = ctx
                        .params()
                        .get("format")
                        .and_then(|v| v.as_str())
                        .and_then(ExportFormat::parse)
                        .unwrap_or(default_format);

                    let columns: Vec<String> = columns.clone().unwrap_or_else(|| {
                        M::columns().iter().map(|c| c.to_string()).collect()
                    });

                    let data = match format {
                        ExportFormat::Csv => encode_csv(&columns, &rows)?,
                        ExportFormat::Xlsx => encode_xlsx(&columns, &rows)?,
                    };

                    let name = match &filename {
                        Some(f) => f(&ctx),
                        None => format!(
                            "{}-{}.{}",
                            ctx.definition().identifier.resource.replace('/', "-"),
                            chrono::Utc::now().format("%Y%m%d"),
                            format.extension()
                        ),
                    };

                    Ok(Reply::File(FilePayload {
                        filename: name,
                        content_type: format.content_type().to_string(),
                        data: data.into(),
                    }))
                }
            }
        };

        let action = self.meta.action("export").to_string();
        Ok(self
            .meta
            .spec("export", resource, Spec::handler(action, handler)))
    }
}
