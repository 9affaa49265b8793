//! Query descriptor construction.
//!
//! A [`QueryDescriptor`] is an immutable value pairing a statement in the
//! store's query language with an ordered set of named parameters. It is
//! produced by a higher query-translation layer and consumed read-only by the
//! streaming enumerators; this crate never interprets the statement text.

use serde_json::Value;

/// An immutable, parameterized query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    statement: String,
    params: Vec<(String, Value)>,
}

impl QueryDescriptor {
    /// Creates a descriptor for the given statement with no parameters.
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            params: Vec::new(),
        }
    }

    /// Adds a named parameter, replacing any existing parameter of the same
    /// name. Parameter order is otherwise preserved.
    pub fn named_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.params.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.params.push((name, value)),
        }
        self
    }

    /// The statement text.
    pub fn statement(&self) -> &str {
        &self.statement
    }

    /// The named parameters, in declaration order.
    pub fn params(&self) -> &[(String, Value)] {
        &self.params
    }

    /// Looks up a parameter value by name.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parameters_keep_declaration_order() {
        let query = QueryDescriptor::new("SELECT * FROM content WHERE a = $a AND b = $b")
            .named_param("a", 1)
            .named_param("b", "two");

        assert_eq!(
            query.params(),
            &[("a".to_string(), json!(1)), ("b".to_string(), json!("two"))]
        );
    }

    #[test]
    fn duplicate_parameter_names_replace_in_place() {
        let query = QueryDescriptor::new("SELECT 1")
            .named_param("a", 1)
            .named_param("b", 2)
            .named_param("a", 3);

        assert_eq!(query.param("a"), Some(&json!(3)));
        assert_eq!(query.params().len(), 2);
        assert_eq!(query.params()[0].0, "a");
    }
}
