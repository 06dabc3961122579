//! Small input checks shared by the resource modules.

use crate::error::{ApiError, ApiResult};

const MAX_NAME_LEN: usize = 200;

/// Trims `value` and rejects it if empty or overly long.
pub fn required(field: &str, value: &str) -> ApiResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::validation(format!("{} must not be empty", field)));
    }
    if value.chars().count() > MAX_NAME_LEN {
        return Err(ApiError::validation(format!(
            "{} must not exceed {} characters",
            field, MAX_NAME_LEN
        )));
    }
    Ok(value.to_string())
}

/// Empty strings count as "not given".
pub fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn one_of(field: &str, value: &str, allowed: &[&str]) -> ApiResult<String> {
    if allowed.contains(&value) {
        Ok(value.to_string())
    } else {
        Err(ApiError::validation(format!(
            "invalid {} '{}', expected one of: {}",
            field,
            value,
            allowed.join(", ")
        )))
    }
}

/// Parses a `true`/`false` query flag; anything else is rejected.
pub fn flag(field: &str, value: Option<&str>) -> ApiResult<Option<bool>> {
    match value.map(str::trim) {
        None => Ok(None),
        Some("true") | Some("1") => Ok(Some(true)),
        Some("false") | Some("0") => Ok(Some(false)),
        Some(other) => Err(ApiError::validation(format!(
            "{} must be true or false, got '{}'",
            field, other
        ))),
    }
}
