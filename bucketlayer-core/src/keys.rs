//! Composite-key identifier generation.
//!
//! Entities with composite primary keys are stored under a single opaque
//! string key. [`generate_id`] encodes the ordered key-part values into that
//! string: parts are joined with `::`, elements of a multi-valued part are
//! each followed by `|`, and any literal `/`, `:` or `|` inside a rendered
//! value is escaped by prefixing it with `/`. Escaping the full delimiter
//! alphabet makes the encoding injective: two distinct key-value combinations
//! can never produce the same id, even when values contain the separators
//! themselves.

use serde_json::Value;

use crate::error::{StoreError, StoreResult};

const PART_SEPARATOR: &str = "::";
const ELEMENT_SEPARATOR: char = '|';
const ESCAPE: char = '/';

/// One ordered part of a composite key.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPart {
    /// A single scalar value.
    Scalar(Value),
    /// An ordered sequence of scalar values.
    List(Vec<Value>),
}

impl KeyPart {
    /// Creates a scalar key part.
    pub fn scalar(value: impl Into<Value>) -> Self {
        KeyPart::Scalar(value.into())
    }

    /// Creates a multi-valued key part.
    pub fn list<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        KeyPart::List(values.into_iter().map(Into::into).collect())
    }
}

/// Encodes the ordered key-part values of one entity into an opaque string id.
///
/// Deterministic and pure: the same input always yields the same id. Fails
/// with [`StoreError::InvalidKey`] when a part is null, absent, not a
/// scalar, or an empty multi-valued part.
pub fn generate_id(parts: &[KeyPart]) -> StoreResult<String> {
    if parts.is_empty() {
        return Err(StoreError::InvalidKey("no key parts supplied".into()));
    }

    let mut id = String::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            id.push_str(PART_SEPARATOR);
        }
        match part {
            KeyPart::Scalar(value) => append_escaped(&mut id, value)?,
            KeyPart::List(values) => {
                // An empty list would emit nothing and become
                // indistinguishable from an empty scalar.
                if values.is_empty() {
                    return Err(StoreError::InvalidKey(
                        "multi-valued key part is empty".into(),
                    ));
                }
                for value in values {
                    append_escaped(&mut id, value)?;
                    id.push(ELEMENT_SEPARATOR);
                }
            }
        }
    }

    Ok(id)
}

fn append_escaped(out: &mut String, value: &Value) -> StoreResult<()> {
    let rendered = match value {
        Value::Null => {
            return Err(StoreError::InvalidKey("key part value is null".into()));
        }
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => {
            return Err(StoreError::InvalidKey(
                "key part values must be scalar".into(),
            ));
        }
    };

    for ch in rendered.chars() {
        if ch == ESCAPE || ch == ELEMENT_SEPARATOR || ch == ':' {
            out.push(ESCAPE);
        }
        out.push(ch);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;

    #[test]
    fn includes_values_of_all_key_parts_delimited() {
        let id = generate_id(&[KeyPart::scalar(456), KeyPart::scalar(123)]).unwrap();
        assert_eq!(id, "456::123");
    }

    #[test]
    fn is_deterministic() {
        let parts = [KeyPart::scalar("blog"), KeyPart::scalar(42)];
        assert_eq!(generate_id(&parts).unwrap(), generate_id(&parts).unwrap());
    }

    #[test]
    fn adjacent_digit_shuffles_do_not_collide() {
        let a = generate_id(&[KeyPart::scalar(456), KeyPart::scalar(123)]).unwrap();
        let b = generate_id(&[KeyPart::scalar(45), KeyPart::scalar(6123)]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn values_containing_separators_do_not_collide() {
        let mut ids = HashSet::new();
        ids.insert(generate_id(&[KeyPart::scalar(1), KeyPart::scalar(1)]).unwrap());
        ids.insert(generate_id(&[KeyPart::scalar(1), KeyPart::scalar(1)]).unwrap());
        ids.insert(generate_id(&[KeyPart::scalar("1"), KeyPart::scalar("1|")]).unwrap());
        ids.insert(generate_id(&[KeyPart::scalar("1|"), KeyPart::scalar("1")]).unwrap());
        ids.insert(generate_id(&[KeyPart::scalar("1:"), KeyPart::scalar(":1")]).unwrap());
        ids.insert(generate_id(&[KeyPart::scalar("1"), KeyPart::scalar("::1")]).unwrap());

        // The two integer inputs encode identically to the first string input;
        // every other combination must stay distinct.
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn value_with_literal_separator_differs_from_split_parts() {
        let joined = generate_id(&[KeyPart::scalar("a::b")]).unwrap();
        let split = generate_id(&[KeyPart::scalar("a"), KeyPart::scalar("b")]).unwrap();
        assert_ne!(joined, split);
    }

    #[test]
    fn escape_marker_itself_is_escaped() {
        let a = generate_id(&[KeyPart::scalar("a/"), KeyPart::scalar("b")]).unwrap();
        let b = generate_id(&[KeyPart::scalar("a"), KeyPart::scalar("/b")]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn multi_valued_parts_keep_element_order() {
        let id = generate_id(&[
            KeyPart::list(["a", "b"]),
            KeyPart::scalar(7),
        ])
        .unwrap();
        assert_eq!(id, "a|b|::7");
    }

    #[test]
    fn list_part_differs_from_scalar_with_embedded_separator() {
        let list = generate_id(&[KeyPart::list(["a", "b"])]).unwrap();
        let scalar = generate_id(&[KeyPart::scalar("a|b|")]).unwrap();
        assert_ne!(list, scalar);
    }

    #[test]
    fn empty_list_part_is_rejected() {
        // Would otherwise encode like an empty string scalar.
        assert_eq!(generate_id(&[KeyPart::scalar("")]).unwrap(), "");
        let err = generate_id(&[KeyPart::List(Vec::new())]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[test]
    fn null_key_part_is_rejected() {
        let err = generate_id(&[KeyPart::scalar(1), KeyPart::Scalar(json!(null))]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[test]
    fn structured_key_part_is_rejected() {
        let err = generate_id(&[KeyPart::Scalar(json!({ "nested": true }))]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(
            generate_id(&[]).unwrap_err(),
            StoreError::InvalidKey(_)
        ));
    }
}
