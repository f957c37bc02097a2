pub mod document;

pub use document::{
    from_bson, parse_document, to_bson, DocumentError, InsertedId, JsonDocument, ID_FIELD,
};
