use serde::{Deserialize, Serialize};

use onegate_core::{Error, FromRpcContext, RpcContext};

use crate::select::Sort;

/// Pagination parameters, read from the envelope's `params` (`page`, `size`,
/// `sort`). Pages are zero-based.
#[derive(Debug, Clone, Deserialize)]
pub struct Pageable {
    #[serde(default)]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub size: u64,
    #[serde(default)]
    pub sort: Option<String>,
}

fn default_page_size() -> u64 {
    20
}

impl Default for Pageable {
    fn default() -> Self {
        Self {
            page: 0,
            size: default_page_size(),
            sort: None,
        }
    }
}

impl Pageable {
    pub fn offset(&self) -> u64 {
        self.page * self.size
    }

    /// Parse the `sort` string (`"name,desc|created_at"`) into sort entries.
    pub fn sorts(&self) -> Vec<Sort> {
        let Some(sort) = &self.sort else {
            return Vec::new();
        };
        sort.split('|')
            .filter_map(|entry| {
                let mut parts = entry.split(',');
                let column = parts.next()?.trim();
                if column.is_empty() {
                    return None;
                }
                let ascending = !matches!(parts.next().map(str::trim), Some("desc") | Some("DESC"));
                Some(Sort {
                    column: column.to_string(),
                    ascending,
                })
            })
            .collect()
    }
}

impl FromRpcContext for Pageable {
    async fn from_context(ctx: &RpcContext) -> Result<Self, Error> {
        let params = ctx.params();
        let page = params.get("page").and_then(|v| v.as_u64()).unwrap_or(0);
        let size = params
            .get("size")
            .and_then(|v| v.as_u64())
            .unwrap_or_else(default_page_size);
        let sort = params
            .get("sort")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(Self { page, size, sort })
    }
}

/// A page of results with pagination metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: u64,
    pub size: u64,
    pub total_elements: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, pageable: &Pageable, total_elements: u64) -> Self {
        let total_pages = if pageable.size == 0 {
            0
        } else {
            total_elements.div_ceil(pageable.size)
        };
        Self {
            content,
            page: pageable.page,
            size: pageable.size,
            total_elements,
            total_pages,
        }
    }
}
