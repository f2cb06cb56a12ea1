//! Argument shapes: the typed contract a tool's arguments must satisfy
//!
//! A shape both validates incoming JSON and renders itself as JSON Schema for
//! tool listings. Validation returns a cleaned copy of the arguments with
//! unknown object keys removed, so handlers only ever see declared fields.

use serde_json::{Map, Value, json};
use std::fmt;
use thiserror::Error;

/// Expected structure of a JSON value
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentShape {
    String,
    Number,
    Integer,
    Boolean,
    Any,
    Array(Box<ArgumentShape>),
    /// May be absent or `null`
    Optional(Box<ArgumentShape>),
    /// Declared fields in declaration order
    Object(Vec<(String, ArgumentShape)>),
}

impl ArgumentShape {
    pub fn string() -> Self {
        Self::String
    }

    pub fn number() -> Self {
        Self::Number
    }

    pub fn integer() -> Self {
        Self::Integer
    }

    pub fn boolean() -> Self {
        Self::Boolean
    }

    pub fn any() -> Self {
        Self::Any
    }

    pub fn array(item: ArgumentShape) -> Self {
        Self::Array(Box::new(item))
    }

    pub fn optional(inner: ArgumentShape) -> Self {
        Self::Optional(Box::new(inner))
    }

    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, ArgumentShape)>,
        K: Into<String>,
    {
        Self::Object(
            fields
                .into_iter()
                .map(|(name, shape)| (name.into(), shape))
                .collect(),
        )
    }

    /// An object with no declared fields
    pub fn empty() -> Self {
        Self::Object(Vec::new())
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Any => "any",
            Self::Array(_) => "array",
            Self::Optional(inner) => inner.type_name(),
            Self::Object(_) => "object",
        }
    }

    /// Check `value` against the shape.
    ///
    /// Returns the value with undeclared object keys stripped, or every
    /// mismatch found.
    pub fn validate(&self, value: &Value) -> Result<Value, ShapeErrors> {
        let mut errors = Vec::new();
        let cleaned = self.check(value, "$", &mut errors);
        if errors.is_empty() {
            Ok(cleaned)
        } else {
            Err(ShapeErrors(errors))
        }
    }

    fn check(&self, value: &Value, path: &str, errors: &mut Vec<ShapeError>) -> Value {
        let mismatch = |errors: &mut Vec<ShapeError>| {
            errors.push(ShapeError {
                path: path.to_string(),
                expected: self.type_name(),
                found: json_type_name(value),
            });
            Value::Null
        };

        match (self, value) {
            (Self::Any, v) => v.clone(),
            (Self::Optional(_), Value::Null) => Value::Null,
            (Self::Optional(inner), v) => inner.check(v, path, errors),
            (Self::String, Value::String(_)) | (Self::Boolean, Value::Bool(_)) => value.clone(),
            (Self::Number, Value::Number(_)) => value.clone(),
            (Self::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => value.clone(),
            (Self::Array(item), Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| item.check(v, &format!("{path}[{i}]"), errors))
                    .collect(),
            ),
            (Self::Object(fields), Value::Object(given)) => {
                let mut cleaned = Map::new();
                for (name, shape) in fields {
                    let field_path = format!("{path}.{name}");
                    match given.get(name) {
                        Some(v) => {
                            let checked = shape.check(v, &field_path, errors);
                            if !checked.is_null() || !matches!(shape, Self::Optional(_)) {
                                cleaned.insert(name.clone(), checked);
                            }
                        }
                        None if matches!(shape, Self::Optional(_) | Self::Any) => {}
                        None => errors.push(ShapeError {
                            path: field_path,
                            expected: shape.type_name(),
                            found: "nothing",
                        }),
                    }
                }
                Value::Object(cleaned)
            }
            _ => mismatch(errors),
        }
    }

    /// Render as a JSON Schema fragment
    pub fn to_json_schema(&self) -> Value {
        match self {
            Self::String | Self::Number | Self::Integer | Self::Boolean => {
                json!({ "type": self.type_name() })
            }
            Self::Any => json!({}),
            Self::Array(item) => json!({ "type": "array", "items": item.to_json_schema() }),
            Self::Optional(inner) => inner.to_json_schema(),
            Self::Object(fields) => {
                let properties: Map<String, Value> = fields
                    .iter()
                    .map(|(name, shape)| (name.clone(), shape.to_json_schema()))
                    .collect();
                let required: Vec<&str> = fields
                    .iter()
                    .filter(|(_, shape)| !matches!(shape, Self::Optional(_) | Self::Any))
                    .map(|(name, _)| name.as_str())
                    .collect();
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                })
            }
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One mismatch between a value and its shape
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{path}: expected {expected}, found {found}")]
pub struct ShapeError {
    pub path: String,
    pub expected: &'static str,
    pub found: &'static str,
}

/// All mismatches found while validating one value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeErrors(pub Vec<ShapeError>);

impl fmt::Display for ShapeErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ShapeErrors {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn echo_shape() -> ArgumentShape {
        ArgumentShape::object([("text", ArgumentShape::string())])
    }

    #[rstest]
    #[case(ArgumentShape::string(), json!("x"), true)]
    #[case(ArgumentShape::string(), json!(5), false)]
    #[case(ArgumentShape::number(), json!(0.5), true)]
    #[case(ArgumentShape::number(), json!(3), true)]
    #[case(ArgumentShape::integer(), json!(3), true)]
    #[case(ArgumentShape::integer(), json!(3.5), false)]
    #[case(ArgumentShape::boolean(), json!(false), true)]
    #[case(ArgumentShape::boolean(), json!("false"), false)]
    #[case(ArgumentShape::any(), json!({"nested": [1, null]}), true)]
    #[case(ArgumentShape::array(ArgumentShape::number()), json!([1, 2.5]), true)]
    #[case(ArgumentShape::array(ArgumentShape::number()), json!([1, "2"]), false)]
    #[case(ArgumentShape::optional(ArgumentShape::string()), json!(null), true)]
    fn scalar_and_container_checks(
        #[case] shape: ArgumentShape,
        #[case] value: Value,
        #[case] valid: bool,
    ) {
        assert_eq!(shape.validate(&value).is_ok(), valid);
    }

    #[test]
    fn unknown_keys_are_stripped() {
        let cleaned = echo_shape()
            .validate(&json!({"text": "hi", "extra": true}))
            .unwrap();
        assert_eq!(cleaned, json!({"text": "hi"}));
    }

    #[test]
    fn optional_fields_may_be_absent_or_null() {
        let shape = ArgumentShape::object([
            ("query", ArgumentShape::string()),
            ("limit", ArgumentShape::optional(ArgumentShape::integer())),
        ]);
        assert_eq!(
            shape.validate(&json!({"query": "q"})).unwrap(),
            json!({"query": "q"})
        );
        assert_eq!(
            shape.validate(&json!({"query": "q", "limit": null})).unwrap(),
            json!({"query": "q"})
        );
        assert_eq!(
            shape.validate(&json!({"query": "q", "limit": 3})).unwrap(),
            json!({"query": "q", "limit": 3})
        );
    }

    #[test]
    fn every_mismatch_is_reported_with_its_path() {
        let shape = ArgumentShape::object([
            ("text", ArgumentShape::string()),
            ("tags", ArgumentShape::array(ArgumentShape::string())),
        ]);
        let errors = shape
            .validate(&json!({"tags": ["a", 1]}))
            .unwrap_err();
        assert_eq!(errors.0.len(), 2);
        assert_eq!(
            errors.to_string(),
            "$.text: expected string, found nothing; $.tags[1]: expected string, found integer"
        );
    }

    #[test]
    fn non_object_arguments_are_rejected() {
        let err = echo_shape().validate(&json!("hi")).unwrap_err();
        assert_eq!(err.to_string(), "$: expected object, found string");
    }

    #[test]
    fn json_schema_lists_required_fields() {
        let shape = ArgumentShape::object([
            ("embedding", ArgumentShape::array(ArgumentShape::number())),
            ("limit", ArgumentShape::optional(ArgumentShape::integer())),
        ]);
        assert_eq!(
            shape.to_json_schema(),
            json!({
                "type": "object",
                "properties": {
                    "embedding": {"type": "array", "items": {"type": "number"}},
                    "limit": {"type": "integer"},
                },
                "required": ["embedding"],
            })
        );
    }

    proptest! {
        #[test]
        fn strings_always_satisfy_the_echo_shape(text in ".*", extra in any::<i64>()) {
            let cleaned = echo_shape()
                .validate(&json!({"text": text.clone(), "noise": extra}))
                .unwrap();
            prop_assert_eq!(cleaned, json!({"text": text}));
        }

        #[test]
        fn numbers_never_satisfy_a_string_field(n in any::<i64>()) {
            let outcome = echo_shape().validate(&json!({"text": n}));
            prop_assert!(outcome.is_err(), "numbers must be rejected");
        }
    }
}
