//! Derived field extraction and identity rendering.
//!
//! Derived fields are computed from `{field}` placeholders. Extraction is
//! strict for desired entities: a missing input is a validation error.
//! Entities returned by the service go through [`post_read_extract`], which
//! keeps whatever the service returned for a derived field it cannot
//! recompute and reports a warning instead.

use std::fmt;

use crate::entity::{Entity, Presence, Value};
use crate::remote::Identity;
use crate::schema::Schema;
use crate::validate::ValidationError;

/// A derived field that could not be recomputed on a service-returned entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractWarning {
    pub field: String,
    pub missing: String,
}

impl fmt::Display for ExtractWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot derive {}: {} is not set on the returned resource",
            self.field, self.missing
        )
    }
}

/// Placeholder names in a template, in order of appearance.
pub(crate) fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start + 1..].find('}') else {
            break;
        };
        names.push(&rest[start + 1..start + 1 + len]);
        rest = &rest[start + 1 + len + 1..];
    }
    names
}

/// Render a template against an entity. Errors with the first missing input.
///
/// Single left-to-right pass: substituted values are never re-scanned.
fn render(template: &str, entity: &Entity) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start + 1..].find('}') else {
            break;
        };
        let name = &rest[start + 1..start + 1 + len];
        out.push_str(&rest[..start]);
        match entity.get(name) {
            Presence::Present(Value::String(s)) if !s.is_empty() => out.push_str(s),
            Presence::Present(Value::Int(i)) => out.push_str(&i.to_string()),
            _ => return Err(name.to_string()),
        }
        rest = &rest[start + 1 + len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Render the identity used to address the remote resource.
pub fn identity(schema: &Schema, entity: &Entity) -> Result<Identity, ValidationError> {
    render(&schema.identity, entity)
        .map(Identity::new)
        .map_err(|field| ValidationError::MissingDerivationInput {
            field,
            derived: "identity".to_string(),
        })
}

/// Compute derived fields on a desired entity.
pub fn extract_fields(schema: &Schema, entity: &Entity) -> Result<Entity, ValidationError> {
    let mut out = entity.clone();
    for derived in &schema.derived {
        let value = render(&derived.template, &out).map_err(|field| {
            ValidationError::MissingDerivationInput {
                field,
                derived: derived.name.clone(),
            }
        })?;
        out.set(&derived.name, Presence::Present(Value::String(value)));
    }
    Ok(out)
}

/// Compute derived fields on an entity returned by the service.
pub fn post_read_extract(schema: &Schema, entity: &Entity) -> (Entity, Vec<ExtractWarning>) {
    let mut out = entity.clone();
    let mut warnings = Vec::new();
    for derived in &schema.derived {
        match render(&derived.template, &out) {
            Ok(value) => out.set(&derived.name, Presence::Present(Value::String(value))),
            Err(missing) => warnings.push(ExtractWarning {
                field: derived.name.clone(),
                missing,
            }),
        }
    }
    (out, warnings)
}
