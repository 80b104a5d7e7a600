use axum::http::header::{CONTENT_RANGE, HeaderMap, HeaderValue};
use std::collections::BTreeMap;

use crate::ApiError;

pub const OFFSET_PARAM: &str = "__offset";
pub const LIMIT_PARAM: &str = "__limit";

fn parse_count(params: &BTreeMap<String, String>, name: &str) -> Result<Option<u64>, ApiError> {
    params
        .get(name)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|_| ApiError::invalid_parameter(name, "expected a non-negative integer"))
        })
        .transpose()
}

/// Read `__offset` (default 0) and `__limit` (default unbounded).
///
/// # Errors
/// `InvalidParameter` when either value is not a non-negative integer.
pub fn parse_window(params: &BTreeMap<String, String>) -> Result<(u64, Option<u64>), ApiError> {
    let offset = parse_count(params, OFFSET_PARAM)?.unwrap_or(0);
    let limit = parse_count(params, LIMIT_PARAM)?;
    Ok((offset, limit))
}

/// Whether the client asked for a window at all.
#[must_use]
pub fn is_requested(params: &BTreeMap<String, String>) -> bool {
    params.contains_key(OFFSET_PARAM) || params.contains_key(LIMIT_PARAM)
}

/// Sanitize resource name by removing control characters for HTTP headers
fn sanitize_resource_name(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii() && !c.is_ascii_control()).collect()
}

/// Build the `Content-Range` header for a windowed read.
///
/// `returned` is the number of rows in this page. An empty page renders as
/// `<resource> */<total>`.
#[must_use]
pub fn calculate_content_range(
    offset: u64,
    returned: u64,
    total_count: u64,
    resource_name: &str,
) -> HeaderMap {
    let safe_name = sanitize_resource_name(resource_name);
    let content_range = if returned == 0 {
        format!("{safe_name} */{total_count}")
    } else {
        let last = offset.saturating_add(returned - 1);
        format!("{safe_name} {offset}-{last}/{total_count}")
    };

    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(&content_range)
        .unwrap_or_else(|_| HeaderValue::from_static("items */0"));
    headers.insert(CONTENT_RANGE, value);
    headers
}
