//! Entity model - resource instances with explicit per-attribute presence.
//!
//! Every attribute slot is a [`Presence`]: absent (never supplied), explicitly
//! empty (an empty nested object), or present. Remote APIs frequently return
//! `{}` for sub-objects the user never set, so "empty" and "absent" must stay
//! distinguishable until canonicalization decides whether they are the same.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Number, Value as Json};
use thiserror::Error;

/// Presence of a single attribute.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Presence<T> {
    /// No value supplied.
    #[default]
    Absent,
    /// Explicitly empty nested entity (`{}`).
    Empty,
    /// A populated value.
    Present(T),
}

impl<T> Presence<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Presence::Absent)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Presence::Empty)
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Presence::Present(_))
    }

    pub fn as_ref(&self) -> Presence<&T> {
        match self {
            Presence::Absent => Presence::Absent,
            Presence::Empty => Presence::Empty,
            Presence::Present(v) => Presence::Present(v),
        }
    }

    /// The populated value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Presence::Present(v) => Some(v),
            _ => None,
        }
    }

    /// True if both slots are in the same state, ignoring the values.
    pub fn same_state<U>(&self, other: &Presence<U>) -> bool {
        matches!(
            (self, other),
            (Presence::Absent, Presence::Absent)
                | (Presence::Empty, Presence::Empty)
                | (Presence::Present(_), Presence::Present(_))
        )
    }
}

impl<T: Clone> Presence<&T> {
    pub fn cloned(self) -> Presence<T> {
        match self {
            Presence::Absent => Presence::Absent,
            Presence::Empty => Presence::Empty,
            Presence::Present(v) => Presence::Present(v.clone()),
        }
    }
}

impl fmt::Display for Presence<Value> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Presence::Absent => write!(f, "<unset>"),
            Presence::Empty => write!(f, "{{}}"),
            Presence::Present(v) => write!(f, "{}", v),
        }
    }
}

/// A populated attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Object(Entity),
    List(Vec<Value>),
}

impl Value {
    /// Short type name used in validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Int(_) => "integer",
            Value::Float(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Object(_) => "object",
            Value::List(_) => "list",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Entity> {
        match self {
            Value::Object(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    fn to_json(&self) -> Json {
        match self {
            Value::String(s) => Json::String(s.clone()),
            Value::Int(i) => Json::Number((*i).into()),
            Value::Float(x) => Number::from_f64(*x).map(Json::Number).unwrap_or(Json::Null),
            Value::Bool(b) => Json::Bool(*b),
            Value::Object(e) => e.to_json(),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    fn from_json(path: &str, json: &Json) -> Result<Value, CodecError> {
        match json {
            Json::Null => Err(CodecError::NullListItem(path.to_string())),
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Ok(Value::Int(i)),
                None => n
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| CodecError::InvalidNumber(path.to_string())),
            },
            Json::String(s) => Ok(Value::String(s.clone())),
            Json::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| Value::from_json(&format!("{}[{}]", path, i), item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Json::Object(map) => Entity::from_map(path, map).map(Value::Object),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i.into())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Entity> for Value {
    fn from(e: Entity) -> Self {
        Value::Object(e)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

/// Errors decoding an entity from JSON.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("null item in list {0}")]
    NullListItem(String),

    #[error("number at {0} is not representable")]
    InvalidNumber(String),
}

/// A resource instance: attribute name to presence-tracked value.
///
/// Attributes missing from the map are [`Presence::Absent`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Entity {
    fields: BTreeMap<String, Presence<Value>>,
}

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set a populated attribute.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, Presence::Present(value.into()));
        self
    }

    /// Builder: set an explicitly empty attribute.
    pub fn with_empty(mut self, name: &str) -> Self {
        self.set(name, Presence::Empty);
        self
    }

    pub fn get(&self, name: &str) -> Presence<&Value> {
        self.fields
            .get(name)
            .map(Presence::as_ref)
            .unwrap_or(Presence::Absent)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).value().and_then(|v| v.as_str())
    }

    /// Set an attribute. Setting [`Presence::Absent`] removes it.
    pub fn set(&mut self, name: &str, slot: Presence<Value>) {
        match slot {
            Presence::Absent => {
                self.fields.remove(name);
            }
            slot => {
                self.fields.insert(name.to_string(), slot);
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Presence<Value> {
        self.fields.remove(name).unwrap_or(Presence::Absent)
    }

    /// The "is-empty" sentinel test: every attribute is unset.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Presence<Value>)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Decode from a JSON object. `null` is absent, `{}` is empty.
    pub fn from_json(json: &Json) -> Result<Entity, CodecError> {
        match json {
            Json::Object(map) => Entity::from_map("", map),
            Json::Null => Err(CodecError::NotAnObject("null")),
            Json::Bool(_) => Err(CodecError::NotAnObject("boolean")),
            Json::Number(_) => Err(CodecError::NotAnObject("number")),
            Json::String(_) => Err(CodecError::NotAnObject("string")),
            Json::Array(_) => Err(CodecError::NotAnObject("array")),
        }
    }

    pub fn to_json(&self) -> Json {
        let mut map = Map::new();
        for (name, slot) in &self.fields {
            match slot {
                Presence::Absent => {}
                Presence::Empty => {
                    map.insert(name.clone(), Json::Object(Map::new()));
                }
                Presence::Present(v) => {
                    map.insert(name.clone(), v.to_json());
                }
            }
        }
        Json::Object(map)
    }

    fn from_map(prefix: &str, map: &Map<String, Json>) -> Result<Entity, CodecError> {
        let mut entity = Entity::new();
        for (name, json) in map {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", prefix, name)
            };
            let slot = match json {
                Json::Null => Presence::Absent,
                Json::Object(inner) if inner.is_empty() => Presence::Empty,
                other => Presence::Present(Value::from_json(&path, other)?),
            };
            entity.set(name, slot);
        }
        Ok(entity)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Entity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        Entity::from_json(&json).map_err(D::Error::custom)
    }
}
