//! Filter evaluation for the in-memory store.
//!
//! Filters use the same document syntax the server accepts:
//! `{field: value}` for equality, `{field: {$op: value}}` for operators and
//! `$and` / `$or` / `$nor` at the top level.

use std::cmp::Ordering;

use mongodb::bson::{Bson, Document};

use super::error::{StoreError, StoreResult};

/// Check a filter for unknown operators and malformed arguments.
pub fn validate(filter: &Document) -> StoreResult<()> {
    matches(&Document::new(), filter).map(|_| ())
}

/// Evaluate a filter against a document.
///
/// Every clause is evaluated so malformed clauses are reported even when an
/// earlier clause already failed to match.
pub fn matches(document: &Document, filter: &Document) -> StoreResult<bool> {
    let mut all = true;
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => logical_branches(document, key, condition)?.iter().all(|m| *m),
            "$or" => logical_branches(document, key, condition)?.iter().any(|m| *m),
            "$nor" => !logical_branches(document, key, condition)?.iter().any(|m| *m),
            k if k.starts_with('$') => {
                return Err(StoreError::InvalidArgument(format!(
                    "unknown top level operator: {}",
                    k
                )))
            }
            path => field_matches(&lookup_all(document, path), condition)?,
        };
        all &= matched;
    }
    Ok(all)
}

fn logical_branches(document: &Document, op: &str, condition: &Bson) -> StoreResult<Vec<bool>> {
    let branches = match condition {
        Bson::Array(items) if !items.is_empty() => items,
        _ => {
            return Err(StoreError::InvalidArgument(format!(
                "{} must be a nonempty array",
                op
            )))
        }
    };

    branches
        .iter()
        .map(|branch| match branch {
            Bson::Document(sub) => matches(document, sub),
            _ => Err(StoreError::InvalidArgument(format!(
                "{} argument's entries must be objects",
                op
            ))),
        })
        .collect()
}

fn is_operator_document(value: &Bson) -> Option<&Document> {
    match value {
        Bson::Document(d) if d.keys().next().is_some_and(|k| k.starts_with('$')) => Some(d),
        _ => None,
    }
}

fn field_matches(values: &[&Bson], condition: &Bson) -> StoreResult<bool> {
    match is_operator_document(condition) {
        Some(ops) => operators_match(values, ops),
        None => Ok(equals_any(values, condition)),
    }
}

fn operators_match(values: &[&Bson], ops: &Document) -> StoreResult<bool> {
    let mut all = true;
    for (op, arg) in ops {
        let matched = match op.as_str() {
            "$eq" => equals_any(values, arg),
            "$ne" => !equals_any(values, arg),
            "$gt" => compare_any(values, arg, |o| o == Ordering::Greater),
            "$gte" => compare_any(values, arg, |o| o != Ordering::Less),
            "$lt" => compare_any(values, arg, |o| o == Ordering::Less),
            "$lte" => compare_any(values, arg, |o| o != Ordering::Greater),
            "$in" => in_list(values, op, arg)?,
            "$nin" => !in_list(values, op, arg)?,
            "$exists" => values.is_empty() != truthy(arg),
            "$not" => match arg {
                Bson::Document(inner) if is_operator_document(arg).is_some() => {
                    !operators_match(values, inner)?
                }
                _ => {
                    return Err(StoreError::InvalidArgument(
                        "$not needs an operator document".to_string(),
                    ))
                }
            },
            other => {
                return Err(StoreError::InvalidArgument(format!(
                    "unknown operator: {}",
                    other
                )))
            }
        };
        all &= matched;
    }
    Ok(all)
}

fn in_list(values: &[&Bson], op: &str, arg: &Bson) -> StoreResult<bool> {
    match arg {
        Bson::Array(candidates) => Ok(candidates.iter().any(|c| equals_any(values, c))),
        _ => Err(StoreError::InvalidArgument(format!("{} needs an array", op))),
    }
}

/// Equality the way the server applies it: a missing field equals null and
/// an array field matches when any element (or the array itself) is equal.
fn equals_any(values: &[&Bson], expected: &Bson) -> bool {
    if values.is_empty() {
        return matches!(expected, Bson::Null);
    }
    values.iter().copied().any(|actual| {
        bson_equal(actual, expected)
            || matches!(actual, Bson::Array(items) if items.iter().any(|item| bson_equal(item, expected)))
    })
}

/// Range comparison with type bracketing: values of different type classes
/// never compare.
fn compare_any<F>(values: &[&Bson], arg: &Bson, pred: F) -> bool
where
    F: Fn(Ordering) -> bool,
{
    let check = |v: &Bson| type_rank(v) == type_rank(arg) && pred(compare_bson(v, arg));
    values.iter().copied().any(|value| match value {
        Bson::Array(items) if !matches!(arg, Bson::Array(_)) => items.iter().any(&check),
        other => check(other),
    })
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => as_f64(other).map(|n| n != 0.0).unwrap_or(true),
    }
}

/// Resolve a dotted path inside a document.
///
/// Numeric segments index into arrays.
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Every value a dotted path reaches, the way the server resolves filters:
/// a non-numeric segment applied to an array descends into each embedded
/// document.
pub fn lookup_all<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let mut found = Vec::new();
    let mut segments = path.split('.');
    if let Some(first) = segments.next().and_then(|head| document.get(head)) {
        let rest: Vec<&str> = segments.collect();
        collect_path(first, &rest, &mut found);
    }
    found
}

fn collect_path<'a>(value: &'a Bson, rest: &[&str], found: &mut Vec<&'a Bson>) {
    let Some((segment, tail)) = rest.split_first() else {
        found.push(value);
        return;
    };

    match value {
        Bson::Document(inner) => {
            if let Some(next) = inner.get(*segment) {
                collect_path(next, tail, found);
            }
        }
        Bson::Array(items) => {
            if let Some(next) = segment.parse::<usize>().ok().and_then(|i| items.get(i)) {
                collect_path(next, tail, found);
            }
            for item in items {
                if let Bson::Document(inner) = item {
                    if let Some(next) = inner.get(*segment) {
                        collect_path(next, tail, found);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Numeric view of a BSON value.
pub fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Check if two BSON values are equal, treating all numeric types alike.
pub fn bson_equal(a: &Bson, b: &Bson) -> bool {
    type_rank(a) == type_rank(b) && compare_bson(a, b) == Ordering::Equal
}

/// Position of a value's type in the server's cross-type sort order.
fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 1,
        Bson::Null | Bson::Undefined => 2,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 3,
        Bson::String(_) | Bson::Symbol(_) => 4,
        Bson::Document(_) => 5,
        Bson::Array(_) => 6,
        Bson::Binary(_) => 7,
        Bson::ObjectId(_) => 8,
        Bson::Boolean(_) => 9,
        Bson::DateTime(_) => 10,
        Bson::Timestamp(_) => 11,
        Bson::RegularExpression(_) => 12,
        Bson::MaxKey => 14,
        _ => 13,
    }
}

/// Total order over BSON values: type class first, then value.
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    let by_rank = type_rank(a).cmp(&type_rank(b));
    if by_rank != Ordering::Equal {
        return by_rank;
    }

    match (a, b) {
        (Bson::String(x), Bson::String(y)) | (Bson::Symbol(x), Bson::Symbol(y)) => x.cmp(y),
        (Bson::String(x), Bson::Symbol(y)) | (Bson::Symbol(x), Bson::String(y)) => x.cmp(y),
        (Bson::Document(x), Bson::Document(y)) => compare_documents(x, y),
        (Bson::Array(x), Bson::Array(y)) => compare_sequences(x.iter(), y.iter()),
        (Bson::Binary(x), Bson::Binary(y)) => x.bytes.cmp(&y.bytes),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            x.timestamp_millis().cmp(&y.timestamp_millis())
        }
        (Bson::Timestamp(x), Bson::Timestamp(y)) => {
            (x.time, x.increment).cmp(&(y.time, y.increment))
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}

fn compare_documents(a: &Document, b: &Document) -> Ordering {
    let mut left = a.iter();
    let mut right = b.iter();
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some((ka, va)), Some((kb, vb))) => {
                let ord = compare_bson(va, vb).then_with(|| ka.cmp(kb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn compare_sequences<'a>(
    mut left: impl Iterator<Item = &'a Bson>,
    mut right: impl Iterator<Item = &'a Bson>,
) -> Ordering {
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => {
                let ord = compare_bson(a, b);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}
