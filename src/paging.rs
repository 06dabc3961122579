use serde::Serialize;

use crate::config::LabConfig;
use crate::error::{ApiError, ApiResult};

const DEFAULT_LIMIT: i64 = 20;

/// `?page=..&limit=..` as sent by list views. Kept as text so that a value
/// which is not a number is reported instead of silently ignored.
#[derive(Debug, Default, FromForm)]
pub struct PageParams {
    pub page: Option<String>,
    pub limit: Option<String>,
}

/// A validated page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub page: i64,
    pub limit: i64,
}

impl PageParams {
    pub fn window(&self, config: &LabConfig) -> ApiResult<Window> {
        let page = number("page", self.page.as_deref())?.unwrap_or(1);
        let limit = number("limit", self.limit.as_deref())?.unwrap_or_else(|| DEFAULT_LIMIT.min(config.max_page_size));
        if page < 1 {
            return Err(ApiError::validation("page must be 1 or greater"));
        }
        if limit < 1 || limit > config.max_page_size {
            return Err(ApiError::validation(format!(
                "limit must be between 1 and {}",
                config.max_page_size
            )));
        }
        Ok(Window { page, limit })
    }
}

fn number(field: &str, value: Option<&str>) -> ApiResult<Option<i64>> {
    value
        .map(|v| {
            v.trim()
                .parse::<i64>()
                .map_err(|_| ApiError::validation(format!("{} must be a whole number, got '{}'", field, v)))
        })
        .transpose()
}

impl Window {
    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, window: Window, total: i64) -> Self {
        let has_more = window.offset() + (items.len() as i64) < total;
        Page {
            items,
            page: window.page,
            limit: window.limit,
            total,
            has_more,
        }
    }
}
