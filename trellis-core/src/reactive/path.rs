//! Path Expressions
//!
//! A watch expression such as `"user.address.city"` is split once into
//! segments and resolved on every evaluation. Resolution reads through
//! [`Object::get`](super::Object::get), so each segment along the way is
//! tracked. Only word characters, `.` and `$` are accepted.

use super::value::Value;

/// Split a dot-delimited path into segments.
///
/// Returns `None` if the path contains anything other than word
/// characters, `.` and `$`.
pub fn parse_path(path: &str) -> Option<Vec<String>> {
    let valid = path
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '$'));

    valid.then(|| path.split('.').map(str::to_owned).collect())
}

/// Walk `segments` from `root`.
///
/// Missing keys and reads through scalars produce `Null`. Arrays accept
/// numeric indexes and `length`.
pub fn resolve(root: &Value, segments: &[String]) -> Value {
    let mut current = root.clone();

    for segment in segments {
        current = match &current {
            Value::Object(obj) => obj.get(segment).unwrap_or_default(),
            Value::Array(arr) if segment == "length" => Value::from(arr.len()),
            Value::Array(arr) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| arr.get(index))
                .unwrap_or_default(),
            _ => return Value::Null,
        };
    }

    current
}
