//! Structural validation of desired entities.

use thiserror::Error;

use crate::entity::{Entity, Presence, Value};
use crate::schema::{FieldKind, FieldSchema, Schema, join_path};

/// Validation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unknown field {0}")]
    UnknownField(String),

    #[error("required field {0} is not set")]
    RequiredFieldMissing(String),

    #[error("field {path} expects {expected}, got {actual}")]
    TypeMismatch {
        path: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("field {path} has value {value:?}, expected one of {allowed:?}")]
    InvalidEnumValue {
        path: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("field {0} cannot be explicitly empty")]
    EmptyNotAllowed(String),

    #[error("field {field} must be set to derive {derived}")]
    MissingDerivationInput { field: String, derived: String },
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Validate a desired entity against its schema.
///
/// Returns the first violation found. Unknown attributes are reported before
/// schema fields are checked; schema fields are checked in declaration order.
pub fn validate(schema: &Schema, desired: &Entity) -> Result<()> {
    validate_entity(&schema.fields, desired, "")
}

fn validate_entity(fields: &[FieldSchema], entity: &Entity, prefix: &str) -> Result<()> {
    if let Some(unknown) = entity
        .names()
        .find(|name| !fields.iter().any(|f| f.name == *name))
    {
        return Err(ValidationError::UnknownField(join_path(prefix, unknown)));
    }

    for field in fields {
        let path = join_path(prefix, &field.name);
        match entity.get(&field.name) {
            Presence::Absent => {
                if field.required && !field.output_only {
                    return Err(ValidationError::RequiredFieldMissing(path));
                }
            }
            Presence::Empty => {
                if !matches!(field.kind, FieldKind::Object { .. }) {
                    return Err(ValidationError::EmptyNotAllowed(path));
                }
            }
            Presence::Present(value) => validate_value(&field.kind, value, &path)?,
        }
    }
    Ok(())
}

fn validate_value(kind: &FieldKind, value: &Value, path: &str) -> Result<()> {
    let mismatch = || ValidationError::TypeMismatch {
        path: path.to_string(),
        expected: kind.type_name(),
        actual: value.type_name(),
    };

    match (kind, value) {
        (FieldKind::String, Value::String(_))
        | (FieldKind::Int, Value::Int(_))
        | (FieldKind::Float, Value::Float(_) | Value::Int(_))
        | (FieldKind::Bool, Value::Bool(_)) => Ok(()),
        (FieldKind::Enum { values }, Value::String(s)) => {
            if values.iter().any(|v| v == s) {
                Ok(())
            } else {
                Err(ValidationError::InvalidEnumValue {
                    path: path.to_string(),
                    value: s.clone(),
                    allowed: values.clone(),
                })
            }
        }
        (FieldKind::Object { fields }, Value::Object(entity)) => {
            validate_entity(fields, entity, path)
        }
        (FieldKind::List { item }, Value::List(items)) => {
            for (i, v) in items.iter().enumerate() {
                validate_value(item, v, &format!("{}[{}]", path, i))?;
            }
            Ok(())
        }
        _ => Err(mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new("Thing", "things/{name}")
            .with_operation("update")
            .with_field(FieldSchema::string("name").required().immutable())
            .with_field(FieldSchema::enumeration("tier", &["BASIC", "PREMIUM"]).update_op("update"))
            .with_field(FieldSchema::new("ratio", FieldKind::Float).update_op("update"))
            .with_field(
                FieldSchema::list(
                    "rules",
                    FieldKind::Object {
                        fields: vec![FieldSchema::int("port").required()],
                    },
                )
                .update_op("update"),
            )
            .with_field(FieldSchema::object("config", vec![FieldSchema::int("size")]).update_op("update"))
    }

    #[test]
    fn test_valid_entity() {
        let desired = Entity::new()
            .with("name", "d1")
            .with("tier", "PREMIUM")
            .with("ratio", 2)
            .with(
                "rules",
                vec![Value::Object(Entity::new().with("port", 80))],
            )
            .with_empty("config");
        validate(&schema(), &desired).unwrap();
    }

    #[test]
    fn test_enum_outside_value_set() {
        let desired = Entity::new().with("name", "d1").with("tier", "GOLD");
        assert_eq!(
            validate(&schema(), &desired),
            Err(ValidationError::InvalidEnumValue {
                path: "tier".to_string(),
                value: "GOLD".to_string(),
                allowed: vec!["BASIC".to_string(), "PREMIUM".to_string()],
            })
        );
    }

    #[test]
    fn test_required_missing() {
        let desired = Entity::new().with("tier", "BASIC");
        assert_eq!(
            validate(&schema(), &desired),
            Err(ValidationError::RequiredFieldMissing("name".to_string()))
        );
    }

    #[test]
    fn test_unknown_field_reported_first() {
        let desired = Entity::new().with("bogus", 1);
        assert_eq!(
            validate(&schema(), &desired),
            Err(ValidationError::UnknownField("bogus".to_string()))
        );
    }

    #[test]
    fn test_nested_list_item_path() {
        let desired = Entity::new().with("name", "d1").with(
            "rules",
            vec![
                Value::Object(Entity::new().with("port", 80)),
                Value::Object(Entity::new().with("port", "http")),
            ],
        );
        assert_eq!(
            validate(&schema(), &desired),
            Err(ValidationError::TypeMismatch {
                path: "rules[1].port".to_string(),
                expected: "integer",
                actual: "string",
            })
        );
    }

    #[test]
    fn test_empty_only_for_objects() {
        let desired = Entity::new().with("name", "d1").with_empty("tier");
        assert_eq!(
            validate(&schema(), &desired),
            Err(ValidationError::EmptyNotAllowed("tier".to_string()))
        );
    }
}
