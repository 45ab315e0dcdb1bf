//! Candidate extraction from auxiliary listing documents: HTML pages with
//! embedded `application/json` blocks, one document per namespace.
//!
//! The contract is best effort, never throws: malformed documents, missing
//! markers, and unparsable blocks all yield an empty candidate sequence.

use std::path::Path;

use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

pub const CRATE_NAME: &str = "recat-extract";

const PROJECTS_KEY: &str = "projects";
const NEXT_DATA_POINTER: &str = "/props/pageProps/devResult/projects/data";

/// Reads a namespace's auxiliary document and extracts its candidate
/// records. Any failure, down to the file not existing, yields an empty
/// sequence.
pub fn extract_candidates(path: &Path) -> Vec<Value> {
    let html = match std::fs::read_to_string(path) {
        Ok(html) => html,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "candidate document unavailable");
            return Vec::new();
        }
    };
    extract_candidates_from_html(&html)
}

/// Extraction over in-memory document text. Tries the well-known
/// `__NEXT_DATA__` block first, then falls back to scanning every embedded
/// JSON block for a plausible `projects` array.
pub fn extract_candidates_from_html(html: &str) -> Vec<Value> {
    let document = Html::parse_document(html);
    if let Some(candidates) = next_data_candidates(&document) {
        return candidates;
    }
    scan_embedded_blocks(&document).unwrap_or_default()
}

fn next_data_candidates(document: &Html) -> Option<Vec<Value>> {
    let selector = Selector::parse(r#"script#__NEXT_DATA__[type="application/json"]"#).ok()?;
    let block = document.select(&selector).next()?;
    let text = block.text().collect::<String>();
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    match value.pointer(NEXT_DATA_POINTER)? {
        Value::Array(items) if !items.is_empty() => Some(items.clone()),
        _ => None,
    }
}

fn scan_embedded_blocks(document: &Html) -> Option<Vec<Value>> {
    let selector = Selector::parse(r#"script[type="application/json"]"#).ok()?;
    for block in document.select(&selector) {
        let text = block.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<Value>(text.trim()) else {
            continue;
        };
        if let Some(candidates) = find_projects(&value) {
            return Some(candidates.to_vec());
        }
    }
    None
}

/// Depth-first search for the first `projects` key holding a non-empty
/// array whose first element looks like a candidate (an object with a
/// `title`). Only objects and arrays are descended, so arbitrary nesting
/// cannot recurse through scalars.
fn find_projects(value: &Value) -> Option<&[Value]> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == PROJECTS_KEY {
                    if let Value::Array(items) = child {
                        if items
                            .first()
                            .map(|first| first.get("title").is_some())
                            .unwrap_or(false)
                        {
                            return Some(items);
                        }
                    }
                }
                if let Some(found) = find_projects(child) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(find_projects),
        _ => None,
    }
}
