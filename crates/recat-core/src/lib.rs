//! Pure helpers shared by the catalog pipelines: presence checks, text
//! similarity, and slug normalization.

use serde_json::Value;

pub const CRATE_NAME: &str = "recat-core";

/// Single gap-filling predicate used everywhere a merge decides whether a
/// field already holds data. Empty strings, zero, `false`, and empty
/// containers all count as absent.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Presence check for a field on a record map; missing keys are absent.
pub fn field_present(record: &serde_json::Map<String, Value>, key: &str) -> bool {
    record.get(key).map(is_present).unwrap_or(false)
}

/// Normalized Ratcliff/Obershelp similarity in `[0, 1]`.
///
/// Both sides are lowercased and trimmed first; an empty input scores 0.
/// `1.0` means identical after normalization. Total function, never fails.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a: Vec<char> = a.trim().to_lowercase().chars().collect();
    let b: Vec<char> = b.trim().to_lowercase().chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matched = matching_chars(&a, &b);
    2.0 * matched as f64 / total as f64
}

/// Total characters covered by recursively taking the longest common
/// substring and matching what remains on either side of it.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (a_start, b_start, size) = longest_common_run(a, b);
    if size == 0 {
        return 0;
    }
    size + matching_chars(&a[..a_start], &b[..b_start])
        + matching_chars(&a[a_start + size..], &b[b_start + size..])
}

/// Earliest longest common substring of `a` and `b` as
/// `(start_in_a, start_in_b, length)`.
fn longest_common_run(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        let mut cur = vec![0usize; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            if ca == cb {
                let run = prev[j] + 1;
                cur[j + 1] = run;
                if run > best.2 {
                    best = (i + 1 - run, j + 1 - run, run);
                }
            }
        }
        prev = cur;
    }
    best
}

/// Canonical identifier token for a display name: lowercase, word
/// characters only, whitespace/hyphen runs collapsed to one hyphen, no
/// leading or trailing hyphens. Idempotent.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_separator = false;
    for c in text.to_lowercase().chars() {
        if c.is_alphanumeric() || c == '_' {
            if pending_separator && !out.is_empty() {
                out.push('-');
            }
            pending_separator = false;
            out.push(c);
        } else if c.is_whitespace() || c == '-' {
            pending_separator = true;
        }
        // anything else is stripped without acting as a separator
    }
    out
}
