//! Conversion between JSON text and BSON records.
//!
//! Input is parsed as extended JSON, so `{"$oid": ...}` and `{"$date": ...}`
//! come through as ObjectIds and dates. Output is relaxed extended JSON.

use mongodb::bson::{Bson, Document};
use serde_json::Value;
use thiserror::Error;

pub use crate::repository::parse_object_id;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("expected a json object, got {0}")]
    NotAnObject(&'static str),

    #[error("invalid extended json: {0}")]
    ExtendedJson(String),
}

pub type RecordResult<T> = Result<T, RecordError>;

/// Convert a JSON object into a document.
pub fn from_json(value: Value) -> RecordResult<Document> {
    let kind = json_kind(&value);
    let bson = Bson::try_from(value).map_err(|e| RecordError::ExtendedJson(e.to_string()))?;
    match bson {
        Bson::Document(doc) => Ok(doc),
        // extended json such as {"$oid": ..} is an object that is not a document
        _ if kind == "object" => Err(RecordError::NotAnObject("an extended json value")),
        _ => Err(RecordError::NotAnObject(kind)),
    }
}

/// Parse JSON text into a document.
pub fn from_json_str(text: &str) -> RecordResult<Document> {
    let value: Value = serde_json::from_str(text)?;
    from_json(value)
}

/// Render a document as relaxed extended JSON.
pub fn to_json(document: &Document) -> Value {
    Bson::Document(document.clone()).into_relaxed_extjson()
}

/// The `_id` of a document as display text.
pub fn id_of(document: &Document) -> Option<String> {
    match document.get("_id")? {
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        Bson::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::oid::ObjectId;
    use mongodb::bson::doc;
    use serde_json::json;

    #[test]
    fn test_plain_object() {
        let doc = from_json_str(r#"{"name": "pedro", "age": 31, "tags": ["a"]}"#).unwrap();
        assert_eq!(doc.get_str("name").unwrap(), "pedro");
        assert_eq!(doc.get_i32("age").unwrap(), 31);
        assert_eq!(doc.get_array("tags").unwrap().len(), 1);
    }

    #[test]
    fn test_extended_json_types() {
        let oid = ObjectId::new();
        let doc = from_json(json!({
            "_id": { "$oid": oid.to_hex() },
            "created_at": { "$date": "2024-01-02T03:04:05Z" }
        }))
        .unwrap();
        assert_eq!(doc.get_object_id("_id").unwrap(), oid);
        assert!(doc.get_datetime("created_at").is_ok());
    }

    #[test]
    fn test_rejects_non_objects() {
        assert!(matches!(
            from_json_str("[1, 2]"),
            Err(RecordError::NotAnObject("an array"))
        ));
        assert!(matches!(from_json_str("{oops"), Err(RecordError::InvalidJson(_))));
        assert!(matches!(
            from_json(json!({ "$oid": ObjectId::new().to_hex() })),
            Err(RecordError::NotAnObject(_))
        ));
    }

    #[test]
    fn test_to_json_is_relaxed() {
        let oid = ObjectId::new();
        let value = to_json(&doc! { "_id": oid, "n": 3_i64, "x": 1.5 });
        assert_eq!(value, json!({ "_id": { "$oid": oid.to_hex() }, "n": 3, "x": 1.5 }));
    }

    #[test]
    fn test_id_of() {
        let oid = ObjectId::new();
        assert_eq!(id_of(&doc! { "_id": oid }), Some(oid.to_hex()));
        assert_eq!(id_of(&doc! { "_id": "abc" }), Some("abc".to_string()));
        assert_eq!(id_of(&doc! { "name": "x" }), None);
    }
}
