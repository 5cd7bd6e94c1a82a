//! Resource schema - the field tree entities are interpreted against.
//!
//! A resource type is described once as data: field types, closed enum value
//! sets, immutability, list ordering, normalization, and which update
//! operation a change to each field triggers.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extract::placeholders;

/// Schema definition errors.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid schema JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate field {0}")]
    DuplicateField(String),

    #[error("field {path} references undeclared operation {op}")]
    UnknownOperation { path: String, op: String },

    #[error("mutable field {0} has no update operation")]
    MissingUpdateOp(String),

    #[error("field {0} cannot be both input-only and output-only")]
    ConflictingMarkers(String),

    #[error("template {template:?} references {field}, which is not a top-level string field")]
    UnknownTemplateField { template: String, field: String },

    #[error("derived field {0} is not a declared top-level string field")]
    UnknownDerivedField(String),
}

/// How string values are compared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    #[default]
    None,
    /// ASCII case-insensitive.
    CaseInsensitive,
    /// Leading/trailing whitespace ignored.
    TrimWhitespace,
    /// Only the last `/`-separated segment is significant (self links).
    LastSegment,
}

impl Normalization {
    pub fn equivalent(&self, a: &str, b: &str) -> bool {
        match self {
            Normalization::None => a == b,
            Normalization::CaseInsensitive => a.eq_ignore_ascii_case(b),
            Normalization::TrimWhitespace => a.trim() == b.trim(),
            Normalization::LastSegment => last_segment(a) == last_segment(b),
        }
    }
}

fn last_segment(s: &str) -> &str {
    s.trim_end_matches('/').rsplit('/').next().unwrap_or(s)
}

/// Field type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Int,
    Float,
    Bool,
    Enum { values: Vec<String> },
    Object { fields: Vec<FieldSchema> },
    List { item: Box<FieldKind> },
}

impl FieldKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Int => "integer",
            FieldKind::Float => "number",
            FieldKind::Bool => "boolean",
            FieldKind::Enum { .. } => "enum",
            FieldKind::Object { .. } => "object",
            FieldKind::List { .. } => "list",
        }
    }
}

/// One attribute of a resource or nested object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    /// Changing it requires destroying and recreating the resource.
    #[serde(default)]
    pub immutable: bool,
    /// Populated by the service; never compared.
    #[serde(default)]
    pub output_only: bool,
    /// Accepted by the service but never returned by it.
    #[serde(default)]
    pub input_only: bool,
    /// Lists compare as multisets.
    #[serde(default)]
    pub order_irrelevant: bool,
    /// An explicitly empty value means the same as an unset one.
    #[serde(default)]
    pub empty_equals_absent: bool,
    #[serde(default)]
    pub normalize: Normalization,
    /// Update operation triggered by a change. Inherited by nested fields.
    #[serde(default)]
    pub update_op: Option<String>,
}

impl FieldSchema {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            immutable: false,
            output_only: false,
            input_only: false,
            order_irrelevant: false,
            empty_equals_absent: false,
            normalize: Normalization::None,
            update_op: None,
        }
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn int(name: &str) -> Self {
        Self::new(name, FieldKind::Int)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub fn enumeration(name: &str, values: &[&str]) -> Self {
        Self::new(
            name,
            FieldKind::Enum {
                values: values.iter().map(|v| v.to_string()).collect(),
            },
        )
    }

    pub fn object(name: &str, fields: Vec<FieldSchema>) -> Self {
        Self::new(name, FieldKind::Object { fields })
    }

    pub fn list(name: &str, item: FieldKind) -> Self {
        Self::new(
            name,
            FieldKind::List {
                item: Box::new(item),
            },
        )
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn output_only(mut self) -> Self {
        self.output_only = true;
        self
    }

    pub fn input_only(mut self) -> Self {
        self.input_only = true;
        self
    }

    pub fn order_irrelevant(mut self) -> Self {
        self.order_irrelevant = true;
        self
    }

    pub fn empty_equals_absent(mut self) -> Self {
        self.empty_equals_absent = true;
        self
    }

    pub fn normalize(mut self, normalize: Normalization) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn update_op(mut self, op: &str) -> Self {
        self.update_op = Some(op.to_string());
        self
    }
}

/// A declared update operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSchema {
    pub name: String,
}

/// A top-level string field computed from other top-level fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedField {
    pub name: String,
    /// e.g. `locations/{location}/things/{name}`
    pub template: String,
}

/// Schema of one resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub kind: String,
    /// Identity template used to address the remote resource.
    pub identity: String,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
    /// Declaration order defines the order update operations run in.
    #[serde(default)]
    pub operations: Vec<OperationSchema>,
    #[serde(default)]
    pub derived: Vec<DerivedField>,
}

impl Schema {
    pub fn new(kind: &str, identity: &str) -> Self {
        Self {
            kind: kind.to_string(),
            identity: identity.to_string(),
            fields: Vec::new(),
            operations: Vec::new(),
            derived: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_operation(mut self, name: &str) -> Self {
        self.operations.push(OperationSchema {
            name: name.to_string(),
        });
        self
    }

    pub fn with_derived(mut self, name: &str, template: &str) -> Self {
        self.derived.push(DerivedField {
            name: name.to_string(),
            template: template.to_string(),
        });
        self
    }

    /// Parse and check a schema.
    pub fn from_json_str(s: &str) -> Result<Self, SchemaError> {
        let schema: Schema = serde_json::from_str(s)?;
        schema.check()?;
        Ok(schema)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Position of an operation in declaration order.
    pub fn operation_index(&self, name: &str) -> Option<usize> {
        self.operations.iter().position(|o| o.name == name)
    }

    /// Check the schema for internal consistency.
    pub fn check(&self) -> Result<(), SchemaError> {
        let ops: HashSet<&str> = self.operations.iter().map(|o| o.name.as_str()).collect();
        check_fields(&self.fields, "", false, None, &ops)?;

        let is_string_field = |name: &str| {
            self.field(name)
                .map(|f| f.kind == FieldKind::String)
                .unwrap_or(false)
        };

        let templates = std::iter::once(&self.identity).chain(self.derived.iter().map(|d| &d.template));
        for template in templates {
            for field in placeholders(template) {
                if !is_string_field(field) {
                    return Err(SchemaError::UnknownTemplateField {
                        template: template.clone(),
                        field: field.to_string(),
                    });
                }
            }
        }

        for derived in &self.derived {
            if !is_string_field(&derived.name) {
                return Err(SchemaError::UnknownDerivedField(derived.name.clone()));
            }
        }

        Ok(())
    }
}

fn check_fields(
    fields: &[FieldSchema],
    prefix: &str,
    immutable: bool,
    op: Option<&str>,
    ops: &HashSet<&str>,
) -> Result<(), SchemaError> {
    let mut seen = HashSet::new();
    for field in fields {
        let path = join_path(prefix, &field.name);
        if !seen.insert(field.name.as_str()) {
            return Err(SchemaError::DuplicateField(path));
        }
        if field.input_only && field.output_only {
            return Err(SchemaError::ConflictingMarkers(path));
        }
        if let Some(name) = &field.update_op
            && !ops.contains(name.as_str())
        {
            return Err(SchemaError::UnknownOperation {
                path,
                op: name.clone(),
            });
        }
        if field.output_only {
            continue;
        }

        let immutable = immutable || field.immutable;
        let op = field.update_op.as_deref().or(op);
        match nested_fields(&field.kind) {
            Some(children) => check_fields(children, &path, immutable, op, ops)?,
            None if !immutable && op.is_none() => {
                return Err(SchemaError::MissingUpdateOp(path));
            }
            None => {}
        }
    }
    Ok(())
}

/// Child fields of an object, or of a list of objects.
pub(crate) fn nested_fields(kind: &FieldKind) -> Option<&[FieldSchema]> {
    match kind {
        FieldKind::Object { fields } => Some(fields),
        FieldKind::List { item } => nested_fields(item),
        _ => None,
    }
}

pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}
