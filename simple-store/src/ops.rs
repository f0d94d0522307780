//! Pure document operations.

use std::cmp::Ordering;

use serde_json::{Map, Value};
use tandem_engine::{OrderByClause, OrderDirection, PluginError, WhereClause, WhereFilterOp};

/// Merge `patch` into `target`, recursing into nested objects.
///
/// Arrays and scalars in `patch` replace what was there.
pub fn deep_merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                let existing = target.entry(key).or_insert(Value::Null);
                if existing.is_object() && value.is_object() {
                    deep_merge(existing, value);
                } else {
                    *existing = value;
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

/// Overwrite the top-level keys of `target` with those of `patch`.
pub fn shallow_assign(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => target.extend(patch),
        (target, patch) => *target = patch,
    }
}

/// Remove the property at a dot-separated path. Missing paths are ignored.
pub fn delete_path(target: &mut Value, path: &str) {
    let (parents, last) = match path.rsplit_once('.') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, path),
    };

    let mut current = target;
    if let Some(parents) = parents {
        for segment in parents.split('.') {
            match current.get_mut(segment) {
                Some(next) => current = next,
                None => return,
            }
        }
    }
    if let Value::Object(map) = current {
        map.remove(last);
    }
}

/// Read a payload that is either one string or an array of strings.
pub fn string_list(payload: &Value) -> Result<Vec<String>, PluginError> {
    match payload {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| PluginError::new(format!("expected a string, got {item}")))
            })
            .collect(),
        other => Err(PluginError::new(format!(
            "expected a string or an array of strings, got {other}"
        ))),
    }
}

pub fn empty_doc() -> Value {
    Value::Object(Map::new())
}

/// Read a field by dot-separated path.
fn field<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| current.get(segment))
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Whether a document passes one where clause.
pub fn matches_clause(doc: &Value, WhereClause(path, op, expected): &WhereClause) -> bool {
    use std::cmp::Ordering::*;

    let Some(actual) = field(doc, path) else {
        return matches!(op, WhereFilterOp::NotEq | WhereFilterOp::NotIn);
    };
    let listed = |list: &Value, item: &Value| {
        list.as_array()
            .map(|items| items.contains(item))
            .unwrap_or(false)
    };

    match op {
        WhereFilterOp::Eq => actual == expected,
        WhereFilterOp::NotEq => actual != expected,
        WhereFilterOp::Lt => compare(actual, expected) == Some(Less),
        WhereFilterOp::Lte => matches!(compare(actual, expected), Some(Less | Equal)),
        WhereFilterOp::Gt => compare(actual, expected) == Some(Greater),
        WhereFilterOp::Gte => matches!(compare(actual, expected), Some(Greater | Equal)),
        WhereFilterOp::In => listed(expected, actual),
        WhereFilterOp::NotIn => !listed(expected, actual),
        WhereFilterOp::ArrayContains => listed(actual, expected),
        WhereFilterOp::ArrayContainsAny => expected
            .as_array()
            .map(|wanted| wanted.iter().any(|item| listed(actual, item)))
            .unwrap_or(false),
    }
}

/// Sort `(id, doc)` pairs by the order-by clauses, first clause first.
///
/// Documents missing a field sort after those that have it. Ties fall back
/// to the id.
pub fn sort_docs(docs: &mut [(String, Value)], order_by: &[OrderByClause]) {
    docs.sort_by(|(a_id, a), (b_id, b)| {
        order_by
            .iter()
            .map(|OrderByClause(path, direction)| {
                let ordering = match (field(a, path), field(b, path)) {
                    (Some(a), Some(b)) => compare(a, b).unwrap_or(Ordering::Equal),
                    (Some(_), None) => return Ordering::Less,
                    (None, Some(_)) => return Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                match direction {
                    OrderDirection::Asc => ordering,
                    OrderDirection::Desc => ordering.reverse(),
                }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a_id.cmp(b_id))
    });
}
