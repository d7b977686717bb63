//! Update operators for the in-memory store.

use mongodb::bson::{Bson, Document};

use super::error::{StoreError, StoreResult};
use super::filter::{as_f64, bson_equal, lookup};

/// Operators understood by `apply`.
const SUPPORTED: &[&str] = &["$set", "$unset", "$inc"];

/// Check that an update document only holds supported operators.
pub fn validate(update: &Document) -> StoreResult<()> {
    if update.is_empty() {
        return Err(StoreError::InvalidArgument(
            "update document must not be empty".to_string(),
        ));
    }

    for (op, fields) in update {
        if !op.starts_with('$') {
            return Err(StoreError::InvalidArgument(format!(
                "update document requires atomic operators, found field '{}'",
                op
            )));
        }
        if !SUPPORTED.contains(&op.as_str()) {
            return Err(StoreError::InvalidArgument(format!(
                "unknown modifier: {}",
                op
            )));
        }
        let fields = match fields {
            Bson::Document(d) => d,
            _ => {
                return Err(StoreError::InvalidArgument(format!(
                    "modifier {} expects a document",
                    op
                )))
            }
        };
        for (path, value) in fields {
            if path.is_empty() || path.split('.').any(str::is_empty) {
                return Err(StoreError::InvalidArgument(format!(
                    "invalid field path '{}'",
                    path
                )));
            }
            if op == "$inc" && as_f64(value).is_none() {
                return Err(StoreError::InvalidArgument(format!(
                    "cannot increment with non-numeric argument: {{{}: {}}}",
                    path, value
                )));
            }
        }
    }
    Ok(())
}

/// Apply an update to a copy of `original`.
///
/// The caller compares the result with the original to decide whether the
/// document was modified.
pub fn apply(original: &Document, update: &Document) -> StoreResult<Document> {
    validate(update)?;
    let mut doc = original.clone();

    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            continue;
        };
        for (path, value) in fields {
            let segments: Vec<&str> = path.split('.').collect();
            match op.as_str() {
                "$set" => set_in(&mut doc, &segments, value.clone())?,
                "$unset" => remove_in(&mut doc, &segments),
                "$inc" => {
                    let next = match lookup(&doc, path) {
                        None => value.clone(),
                        Some(current) => add(current, value).ok_or_else(|| {
                            StoreError::InvalidArgument(format!(
                                "cannot apply $inc to a value of non-numeric type at '{}'",
                                path
                            ))
                        })?,
                    };
                    set_in(&mut doc, &segments, next)?;
                }
                _ => {}
            }
        }
    }

    match (original.get("_id"), doc.get("_id")) {
        (Some(before), Some(after)) if bson_equal(before, after) => {}
        (None, None) => {}
        _ => {
            return Err(StoreError::InvalidArgument(
                "performing an update on the path '_id' would modify the immutable field '_id'"
                    .to_string(),
            ))
        }
    }

    Ok(doc)
}

fn set_in(doc: &mut Document, segments: &[&str], value: Bson) -> StoreResult<()> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(());
    };

    if rest.is_empty() {
        doc.insert(*head, value);
        return Ok(());
    }

    if !doc.contains_key(*head) {
        doc.insert(*head, Document::new());
    }
    match doc.get_mut(*head) {
        Some(Bson::Document(inner)) => set_in(inner, rest, value),
        _ => Err(StoreError::InvalidArgument(format!(
            "cannot create field '{}' inside non-document field '{}'",
            rest[0], head
        ))),
    }
}

fn remove_in(doc: &mut Document, segments: &[&str]) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    if rest.is_empty() {
        doc.remove(*head);
    } else if let Some(Bson::Document(inner)) = doc.get_mut(*head) {
        remove_in(inner, rest);
    }
}

/// Numeric addition keeping the narrowest type that holds the result.
fn add(current: &Bson, delta: &Bson) -> Option<Bson> {
    match (current, delta) {
        (Bson::Int32(a), Bson::Int32(b)) => Some(
            a.checked_add(*b)
                .map(Bson::Int32)
                .unwrap_or(Bson::Int64(*a as i64 + *b as i64)),
        ),
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            let a = as_i64(current)?;
            let b = as_i64(delta)?;
            Some(
                a.checked_add(b)
                    .map(Bson::Int64)
                    .unwrap_or(Bson::Double(a as f64 + b as f64)),
            )
        }
        _ => Some(Bson::Double(as_f64(current)? + as_f64(delta)?)),
    }
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn test_set_keeps_other_fields() {
        let original = doc! { "_id": 1, "name": "pedro", "age": 31 };
        let updated = apply(&original, &doc! { "$set": { "age": 32 } }).unwrap();
        assert_eq!(updated, doc! { "_id": 1, "name": "pedro", "age": 32 });
    }

    #[test]
    fn test_set_creates_nested_documents() {
        let original = doc! { "name": "pedro" };
        let updated = apply(&original, &doc! { "$set": { "address.city": "Recife" } }).unwrap();
        assert_eq!(updated.get_document("address").unwrap(), &doc! { "city": "Recife" });
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let original = doc! { "address": "none" };
        let result = apply(&original, &doc! { "$set": { "address.city": "Recife" } });
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
    }

    #[test]
    fn test_unset() {
        let original = doc! { "name": "pedro", "cpf": "123", "address": { "city": "Recife" } };
        let updated = apply(
            &original,
            &doc! { "$unset": { "cpf": "", "address.city": "", "missing": "" } },
        )
        .unwrap();
        assert_eq!(updated, doc! { "name": "pedro", "address": {} });
    }

    #[test]
    fn test_inc_numeric_types() {
        let original = doc! { "a": 1, "b": 1_i64, "c": 1.5, "d": i32::MAX };
        let updated = apply(
            &original,
            &doc! { "$inc": { "a": 2, "b": -3, "c": 1, "d": 1, "e": 5 } },
        )
        .unwrap();
        assert_eq!(updated.get("a"), Some(&Bson::Int32(3)));
        assert_eq!(updated.get("b"), Some(&Bson::Int64(-2)));
        assert_eq!(updated.get("c"), Some(&Bson::Double(2.5)));
        assert_eq!(updated.get("d"), Some(&Bson::Int64(i32::MAX as i64 + 1)));
        assert_eq!(updated.get("e"), Some(&Bson::Int32(5)));
    }

    #[test]
    fn test_inc_rejects_non_numeric() {
        let original = doc! { "name": "pedro" };
        assert!(apply(&original, &doc! { "$inc": { "name": 1 } }).is_err());
        assert!(apply(&original, &doc! { "$inc": { "age": "one" } }).is_err());
    }

    #[test]
    fn test_rejects_replacement_and_unknown_operators() {
        let original = doc! { "name": "pedro" };
        assert!(apply(&original, &doc! { "name": "ana" }).is_err());
        assert!(apply(&original, &doc! { "$push": { "tags": "x" } }).is_err());
        assert!(apply(&original, &doc! {}).is_err());
    }

    #[test]
    fn test_id_is_immutable() {
        let original = doc! { "_id": 1, "name": "pedro" };
        assert!(apply(&original, &doc! { "$set": { "_id": 2 } }).is_err());
        assert!(apply(&original, &doc! { "$unset": { "_id": "" } }).is_err());
        // setting the same value is allowed
        assert!(apply(&original, &doc! { "$set": { "_id": 1 } }).is_ok());
    }
}
