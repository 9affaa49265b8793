//! Document payload helpers.
//!
//! Documents are dynamically shaped JSON values. The store derives a
//! document's identity from the key argument of the operation, not from the
//! payload body, so the reserved identity field is stripped from every
//! outgoing write.

use serde_json::Value;

/// Reserved identity field name inside a document body.
pub const ID_FIELD: &str = "id";

/// Strips the reserved identity field from an outgoing payload.
///
/// Non-object payloads are passed through unchanged.
pub fn normalize_payload(mut document: Value) -> Value {
    if let Value::Object(map) = &mut document {
        map.remove(ID_FIELD);
    }
    document
}
