//! Schema-less documents as they cross the HTTP and store boundaries.

use mongodb::bson::{self, Bson};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// A client-supplied JSON object. No schema is imposed.
pub type JsonDocument = serde_json::Map<String, Value>;

/// Field under which the store keeps a document's identifier.
pub const ID_FIELD: &str = "_id";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("request body must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Parse a request body into a document, accepting any JSON object.
pub fn parse_document(body: &[u8]) -> Result<JsonDocument, DocumentError> {
    match serde_json::from_slice::<Value>(body)? {
        Value::Object(map) => Ok(map),
        other => Err(DocumentError::NotAnObject(json_kind(&other))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Store-assigned identifier, rendered as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct InsertedId(String);

impl InsertedId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InsertedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Bson> for InsertedId {
    fn from(id: Bson) -> Self {
        match id {
            Bson::ObjectId(oid) => Self(oid.to_hex()),
            Bson::String(s) => Self(s),
            other => Self(other.into_relaxed_extjson().to_string()),
        }
    }
}

/// Convert a parsed document for storage. Infallible: every JSON value has a
/// BSON counterpart.
pub fn to_bson(document: &JsonDocument) -> bson::Document {
    document
        .iter()
        .map(|(key, value)| (key.clone(), json_to_bson(value)))
        .collect()
}

fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Bson::Int64(i)
            } else {
                // Integers above i64::MAX have no BSON integer type.
                Bson::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => Bson::Document(to_bson(map)),
    }
}

/// Convert a stored document back to JSON. ObjectId identifiers become their
/// hex string; every other value uses relaxed extended JSON.
pub fn from_bson(mut document: bson::Document) -> JsonDocument {
    let id = document.remove(ID_FIELD);

    let mut json = match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(map) => map,
        _ => JsonDocument::new(),
    };

    if let Some(id) = id {
        let id = match id {
            Bson::ObjectId(oid) => Value::String(oid.to_hex()),
            other => other.into_relaxed_extjson(),
        };
        json.insert(ID_FIELD.to_string(), id);
    }

    json
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{doc, oid::ObjectId};
    use serde_json::json;

    #[test]
    fn accepts_any_object_shape() {
        let doc = parse_document(br#"{"nested":{"a":[1,2,{"b":null}]},"flag":true}"#).unwrap();
        assert_eq!(doc["nested"]["a"][2]["b"], Value::Null);
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse_document(b"{not json").unwrap_err();
        assert!(matches!(err, DocumentError::InvalidJson(_)));
    }

    #[test]
    fn rejects_non_object_json() {
        for body in [&b"[1,2,3]"[..], b"\"text\"", b"42", b"null"] {
            let err = parse_document(body).unwrap_err();
            assert!(matches!(err, DocumentError::NotAnObject(_)), "{:?}", body);
        }
    }

    #[test]
    fn object_id_becomes_hex_string() {
        let oid = ObjectId::new();
        let json = from_bson(doc! { "_id": oid, "test": "persistence", "n": 3_i64 });

        assert_eq!(json["_id"], json!(oid.to_hex()));
        assert_eq!(json["test"], json!("persistence"));
        assert_eq!(json["n"], json!(3));
    }

    #[test]
    fn client_supplied_id_is_kept_as_is() {
        let json = from_bson(doc! { "_id": 7_i32 });
        assert_eq!(json["_id"], json!(7));

        assert_eq!(InsertedId::from(Bson::Int32(7)).as_str(), "7");
        assert_eq!(InsertedId::from(Bson::String("abc".into())).as_str(), "abc");
    }

    #[test]
    fn json_survives_bson_conversion() {
        let original = json!({"name": "x", "tags": ["a", "b"], "score": 1.5, "count": 10});
        let map = original.as_object().unwrap().clone();

        let back = from_bson(to_bson(&map));
        assert_eq!(Value::Object(back), original);
    }

    #[test]
    fn oversized_unsigned_integer_is_stored_as_double() {
        let map = parse_document(br#"{"n":18446744073709551615,"nested":{"m":[18446744073709551615]}}"#)
            .unwrap();

        let stored = to_bson(&map);

        assert_eq!(stored.get("n"), Some(&Bson::Double(18446744073709551615_u64 as f64)));
        let nested = stored.get_document("nested").unwrap();
        assert_eq!(
            nested.get_array("m").unwrap()[0],
            Bson::Double(18446744073709551615_u64 as f64)
        );
    }

    #[test]
    fn integers_and_floats_keep_their_kind() {
        let map = parse_document(br#"{"i":-3,"big":9223372036854775807,"f":2.5}"#).unwrap();

        let stored = to_bson(&map);

        assert_eq!(stored.get("i"), Some(&Bson::Int64(-3)));
        assert_eq!(stored.get("big"), Some(&Bson::Int64(i64::MAX)));
        assert_eq!(stored.get("f"), Some(&Bson::Double(2.5)));
    }
}
