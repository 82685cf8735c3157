//! Small tolerant accessors over `serde_json::Value`.
//!
//! Every helper returns `None` instead of failing, so field extractors can be
//! chained as "first present key among N candidate paths".

use serde_json::Value;

/// First non-null value among `keys` on an object. Non-objects yield `None`.
pub fn first_present<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

/// Walk a nested object path, e.g. `["score", "current", "p1"]`.
pub fn path<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    let mut cur = root;
    for k in keys {
        cur = cur.get(*k)?;
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

/// Non-blank string, or a number rendered as text.
pub fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Finite number, or a string that parses as one.
pub fn as_number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Display name: a plain string, or an object carrying `name` / `title`.
pub fn as_name(v: &Value) -> Option<String> {
    match v {
        Value::Object(_) => first_present(v, &["name", "title"]).and_then(as_text),
        other => as_text(other),
    }
}

/// Render a score component: whole numbers without a fractional part.
pub fn format_count(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}
