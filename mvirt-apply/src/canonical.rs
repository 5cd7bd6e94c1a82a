//! Canonicalization - making desired and remote representations comparable.
//!
//! The service fills in defaults the user never set, normalizes values the
//! user wrote differently, omits empty sub-objects and never echoes
//! input-only fields. Before diffing, each side borrows from the other where
//! the two mean the same thing.

use crate::diff::{equivalent, multiset_equivalent};
use crate::entity::{Entity, Presence, Value};
use crate::schema::{FieldKind, FieldSchema, Schema};

/// Canonicalize a desired entity against the remote state, if any.
///
/// - unset attributes take the remote value (server defaults)
/// - output-only attributes always take the remote value
/// - values equivalent under the field's normalization take the remote form
pub fn canonicalize_desired(schema: &Schema, raw_desired: &Entity, actual: Option<&Entity>) -> Entity {
    match actual {
        Some(actual) => desired_entity(&schema.fields, raw_desired, actual),
        None => raw_desired.clone(),
    }
}

/// Canonicalize the state fetched before any operation ran.
///
/// Only input-only attributes are borrowed from desired: the service never
/// returns them, so there is nothing to compare. Absent and `{}` stay
/// distinct here so an explicit `{}` still produces an update.
pub fn canonicalize_initial(schema: &Schema, raw_initial: &Entity, desired: &Entity) -> Entity {
    let mut out = raw_initial.clone();
    for field in schema.fields.iter().filter(|f| f.input_only) {
        if out.get(&field.name).is_absent() {
            out.set(&field.name, desired.get(&field.name).cloned());
        }
    }
    out
}

/// Canonicalize a fetched entity against the desired entity.
///
/// - input-only attributes the service did not return take the desired value
/// - a missing or empty object the user set to `{}` becomes `{}`
/// - values equivalent under the field's normalization take the desired form
pub fn canonicalize_new_state(schema: &Schema, raw_new: &Entity, desired: &Entity) -> Entity {
    new_entity(&schema.fields, raw_new, desired)
}

/// Fill attributes the fetch left unset with values from an operation response.
pub fn merge_response(raw_new: &Entity, response: &Entity) -> Entity {
    let mut out = raw_new.clone();
    for (name, slot) in response.iter() {
        if out.get(name).is_absent() {
            out.set(name, slot.clone());
        }
    }
    out
}

fn desired_entity(fields: &[FieldSchema], desired: &Entity, actual: &Entity) -> Entity {
    let mut out = desired.clone();
    for field in fields {
        let d = desired.get(&field.name);
        let a = actual.get(&field.name);
        let slot = if field.output_only {
            a.cloned()
        } else if field.input_only {
            d.cloned()
        } else {
            desired_slot(field, d, a)
        };
        out.set(&field.name, slot);
    }
    out
}

fn desired_slot(field: &FieldSchema, d: Presence<&Value>, a: Presence<&Value>) -> Presence<Value> {
    match (d, a) {
        (Presence::Absent, a) => a.cloned(),
        (Presence::Empty, Presence::Absent) if field.empty_equals_absent => Presence::Absent,
        (Presence::Present(dv), Presence::Present(av)) => {
            Presence::Present(desired_value(field, &field.kind, dv, av))
        }
        (d, _) => d.cloned(),
    }
}

fn desired_value(field: &FieldSchema, kind: &FieldKind, d: &Value, a: &Value) -> Value {
    match (kind, d, a) {
        (FieldKind::Object { fields }, Value::Object(de), Value::Object(ae)) => {
            Value::Object(desired_entity(fields, de, ae))
        }
        (FieldKind::List { item }, Value::List(ds), Value::List(actuals)) => {
            if field.order_irrelevant {
                if multiset_equivalent(field, item, ds, actuals) {
                    a.clone()
                } else {
                    d.clone()
                }
            } else if ds.len() == actuals.len() {
                Value::List(
                    ds.iter()
                        .zip(actuals)
                        .map(|(x, y)| desired_value(field, item, x, y))
                        .collect(),
                )
            } else {
                d.clone()
            }
        }
        _ if equivalent(field, kind, d, a) => a.clone(),
        _ => d.clone(),
    }
}

fn new_entity(fields: &[FieldSchema], new: &Entity, desired: &Entity) -> Entity {
    let mut out = new.clone();
    for field in fields {
        let n = new.get(&field.name);
        let d = desired.get(&field.name);
        let slot = if field.input_only && n.is_absent() {
            d.cloned()
        } else {
            new_slot(field, n, d)
        };
        out.set(&field.name, slot);
    }
    out
}

fn new_slot(field: &FieldSchema, n: Presence<&Value>, d: Presence<&Value>) -> Presence<Value> {
    match (n, d) {
        (Presence::Absent, Presence::Empty) => Presence::Empty,
        (Presence::Present(Value::Object(e)), Presence::Empty) if e.is_empty() => Presence::Empty,
        (Presence::Present(nv), Presence::Present(dv)) => {
            Presence::Present(new_value(field, &field.kind, nv, dv))
        }
        (n, _) => n.cloned(),
    }
}

fn new_value(field: &FieldSchema, kind: &FieldKind, n: &Value, d: &Value) -> Value {
    match (kind, n, d) {
        (FieldKind::Object { fields }, Value::Object(ne), Value::Object(de)) => {
            Value::Object(new_entity(fields, ne, de))
        }
        (FieldKind::List { item }, Value::List(ns), Value::List(ds)) => {
            if field.order_irrelevant {
                if multiset_equivalent(field, item, ns, ds) {
                    d.clone()
                } else {
                    n.clone()
                }
            } else if ns.len() == ds.len() {
                Value::List(
                    ns.iter()
                        .zip(ds)
                        .map(|(x, y)| new_value(field, item, x, y))
                        .collect(),
                )
            } else {
                n.clone()
            }
        }
        _ if equivalent(field, kind, n, d) => d.clone(),
        _ => n.clone(),
    }
}
