//! JSONPath extraction of a single value from a response body.

use jsonpath_lib as jsonpath;
use serde_json::Value;

use crate::error::{Error, Result};

/// Paths without a leading `$` are taken relative to the root.
fn normalize_path(path: &str) -> String {
    if path.starts_with('$') {
        path.to_string()
    } else if path.starts_with('[') || path.starts_with('.') {
        format!("${path}")
    } else {
        format!("$.{path}")
    }
}

fn is_root_selector(path: &str) -> bool {
    let path = path.trim();
    path.is_empty() || path == "$"
}

/// Strict lookup: the first match in document order, `None` when nothing
/// matches, and an error for a malformed expression.
pub fn select_first<'a>(root: &'a Value, path: &str) -> Result<Option<&'a Value>> {
    if is_root_selector(path) {
        return Ok(Some(root));
    }
    let results = jsonpath::select(root, &normalize_path(path.trim())).map_err(|e| {
        Error::ExtractionSyntax {
            path: path.to_string(),
            message: format!("{e:?}"),
        }
    })?;
    Ok(results.into_iter().next())
}

/// Lenient lookup used by the resolver. A malformed expression is logged and
/// reported as "not found".
#[must_use]
pub fn extract<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    match select_first(root, path) {
        Ok(found) => found,
        Err(err) => {
            log::warn!("{err}");
            None
        }
    }
}
