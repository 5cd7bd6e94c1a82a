//! Diff engine - field-level differences and their grouping into operations.

use std::collections::BTreeMap;
use std::fmt;

use crate::entity::{Entity, Presence, Value};
use crate::schema::{FieldKind, FieldSchema, Schema, join_path};

/// One differing attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDiff {
    /// Attribute path, e.g. `config.size` or `rules[2].port`.
    pub path: String,
    pub old: Presence<Value>,
    pub new: Presence<Value>,
    /// Update operations that resolve this diff.
    pub operations: Vec<String>,
    pub requires_recreate: bool,
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.path, self.old, self.new)?;
        if self.requires_recreate {
            write!(f, " (requires recreate)")?;
        }
        Ok(())
    }
}

/// Field diffs resolved by one remote update call.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDiff {
    /// None for the recreate group.
    pub update_op: Option<String>,
    pub fields: Vec<FieldDiff>,
    pub requires_recreate: bool,
}

impl OperationDiff {
    /// Top-level attribute names touched by this operation, deduplicated.
    pub fn field_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for fd in &self.fields {
            let top = fd.path.split(['.', '[']).next().unwrap_or(fd.path.as_str());
            if !names.contains(&top) {
                names.push(top);
            }
        }
        names
    }
}

impl fmt::Display for OperationDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paths: Vec<&str> = self.fields.iter().map(|d| d.path.as_str()).collect();
        match &self.update_op {
            Some(op) => write!(f, "{}({})", op, paths.join(", ")),
            None => write!(f, "recreate({})", paths.join(", ")),
        }
    }
}

/// Where in the field tree the walk currently is.
#[derive(Clone)]
struct Scope<'a> {
    path: String,
    immutable: bool,
    op: Option<&'a str>,
}

impl<'a> Scope<'a> {
    fn root() -> Self {
        Self {
            path: String::new(),
            immutable: false,
            op: None,
        }
    }

    fn field(&self, field: &'a FieldSchema) -> Self {
        Self {
            path: join_path(&self.path, &field.name),
            immutable: self.immutable || field.immutable,
            op: field.update_op.as_deref().or(self.op),
        }
    }

    fn index(&self, i: usize) -> Self {
        Self {
            path: format!("{}[{}]", self.path, i),
            ..self.clone()
        }
    }

    fn leaf(&self, old: Presence<&Value>, new: Presence<&Value>) -> FieldDiff {
        // A mutable field with no resolvable operation cannot be updated in place.
        let requires_recreate = self.immutable || self.op.is_none();
        FieldDiff {
            path: self.path.clone(),
            old: old.cloned(),
            new: new.cloned(),
            operations: if requires_recreate {
                Vec::new()
            } else {
                self.op.map(|op| vec![op.to_string()]).unwrap_or_default()
            },
            requires_recreate,
        }
    }
}

/// Compute the field-level differences between `initial` and `desired`.
///
/// Returns nothing when `initial` is absent: that is a creation, not an update.
pub fn diff(schema: &Schema, initial: Option<&Entity>, desired: &Entity) -> Vec<FieldDiff> {
    let Some(initial) = initial else {
        return Vec::new();
    };
    let mut out = Vec::new();
    diff_entity(&schema.fields, initial, desired, &Scope::root(), &mut out);
    out
}

fn diff_entity<'a>(
    fields: &'a [FieldSchema],
    old: &Entity,
    new: &Entity,
    scope: &Scope<'a>,
    out: &mut Vec<FieldDiff>,
) {
    for field in fields {
        if field.output_only {
            continue;
        }
        let scope = scope.field(field);
        diff_slot(field, old.get(&field.name), new.get(&field.name), &scope, out);
    }
}

fn diff_slot<'a>(
    field: &'a FieldSchema,
    old: Presence<&Value>,
    new: Presence<&Value>,
    scope: &Scope<'a>,
    out: &mut Vec<FieldDiff>,
) {
    let (old, new) = if field.empty_equals_absent {
        (collapse_empty(old), collapse_empty(new))
    } else {
        (old, new)
    };

    match (old, new) {
        (Presence::Present(a), Presence::Present(b)) => {
            diff_value(field, &field.kind, a, b, scope, out)
        }
        (a, b) if a.same_state(&b) => {}
        (a, b) => out.push(scope.leaf(a, b)),
    }
}

/// Treat `{}`, an empty object and an empty list as unset.
fn collapse_empty(slot: Presence<&Value>) -> Presence<&Value> {
    match slot {
        Presence::Empty => Presence::Absent,
        Presence::Present(Value::Object(e)) if e.is_empty() => Presence::Absent,
        Presence::Present(Value::List(items)) if items.is_empty() => Presence::Absent,
        other => other,
    }
}

fn diff_value<'a>(
    field: &'a FieldSchema,
    kind: &'a FieldKind,
    a: &Value,
    b: &Value,
    scope: &Scope<'a>,
    out: &mut Vec<FieldDiff>,
) {
    match (kind, a, b) {
        (FieldKind::Object { fields }, Value::Object(x), Value::Object(y)) => {
            diff_entity(fields, x, y, scope, out)
        }
        (FieldKind::List { item }, Value::List(xs), Value::List(ys)) => {
            if field.order_irrelevant {
                if !multiset_equivalent(field, item, xs, ys) {
                    out.push(scope.leaf(Presence::Present(a), Presence::Present(b)));
                }
            } else if xs.len() != ys.len() {
                out.push(scope.leaf(Presence::Present(a), Presence::Present(b)));
            } else {
                for (i, (x, y)) in xs.iter().zip(ys).enumerate() {
                    diff_value(field, item, x, y, &scope.index(i), out);
                }
            }
        }
        _ => {
            if !scalar_equivalent(field, a, b) {
                out.push(scope.leaf(Presence::Present(a), Presence::Present(b)));
            }
        }
    }
}

fn scalar_equivalent(field: &FieldSchema, a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(x), Value::String(y)) => field.normalize.equivalent(x, y),
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        _ => a == b,
    }
}

/// Deep equivalence under the field's comparison rules.
pub(crate) fn equivalent(field: &FieldSchema, kind: &FieldKind, a: &Value, b: &Value) -> bool {
    let mut out = Vec::new();
    let scope = Scope {
        path: field.name.clone(),
        immutable: false,
        op: None,
    };
    diff_value(field, kind, a, b, &scope, &mut out);
    out.is_empty()
}

/// Multiset equality: every item pairs with exactly one equivalent item.
pub(crate) fn multiset_equivalent(
    field: &FieldSchema,
    item: &FieldKind,
    xs: &[Value],
    ys: &[Value],
) -> bool {
    if xs.len() != ys.len() {
        return false;
    }
    let mut used = vec![false; ys.len()];
    xs.iter().all(|x| {
        let matched = ys
            .iter()
            .enumerate()
            .find(|(j, y)| !used[*j] && equivalent(field, item, x, y))
            .map(|(j, _)| j);
        match matched {
            Some(j) => {
                used[j] = true;
                true
            }
            None => false,
        }
    })
}

/// Group field diffs into the remote operations that resolve them.
///
/// Recreate diffs form a single group placed first. Update groups follow in
/// the schema's operation declaration order, then any undeclared operation by
/// name. Field diffs keep their walk order inside a group.
pub fn to_operation_diffs(schema: &Schema, diffs: &[FieldDiff]) -> Vec<OperationDiff> {
    let mut result = Vec::new();

    let recreate: Vec<FieldDiff> = diffs.iter().filter(|d| d.requires_recreate).cloned().collect();
    if !recreate.is_empty() {
        result.push(OperationDiff {
            update_op: None,
            fields: recreate,
            requires_recreate: true,
        });
    }

    let mut groups: BTreeMap<(usize, String), Vec<FieldDiff>> = BTreeMap::new();
    for fd in diffs.iter().filter(|d| !d.requires_recreate) {
        for op in &fd.operations {
            let rank = schema.operation_index(op).unwrap_or(usize::MAX);
            groups
                .entry((rank, op.clone()))
                .or_default()
                .push(fd.clone());
        }
    }

    result.extend(groups.into_iter().map(|((_, op), fields)| OperationDiff {
        update_op: Some(op),
        fields,
        requires_recreate: false,
    }));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Normalization;

    fn schema() -> Schema {
        Schema::new("Thing", "things/{name}")
            .with_operation("update_display")
            .with_operation("update_config")
            .with_field(FieldSchema::string("name").required().immutable())
            .with_field(FieldSchema::string("display_name").update_op("update_display"))
            .with_field(
                FieldSchema::object(
                    "config",
                    vec![
                        FieldSchema::int("size"),
                        FieldSchema::enumeration("tier", &["BASIC", "PREMIUM"])
                            .normalize(Normalization::CaseInsensitive),
                    ],
                )
                .update_op("update_config"),
            )
            .with_field(
                FieldSchema::object("labels", vec![FieldSchema::string("env")])
                    .update_op("update_config")
                    .empty_equals_absent(),
            )
            .with_field(
                FieldSchema::list("tags", FieldKind::String)
                    .order_irrelevant()
                    .update_op("update_display"),
            )
            .with_field(
                FieldSchema::list(
                    "rules",
                    FieldKind::Object {
                        fields: vec![FieldSchema::int("port")],
                    },
                )
                .update_op("update_config"),
            )
            .with_field(FieldSchema::string("uid").output_only())
    }

    fn tags(items: &[&str]) -> Value {
        Value::List(items.iter().map(|s| Value::from(*s)).collect())
    }

    #[test]
    fn test_no_initial_means_no_diff() {
        let desired = Entity::new().with("name", "d1");
        assert!(diff(&schema(), None, &desired).is_empty());
    }

    #[test]
    fn test_scalar_diff() {
        let initial = Entity::new().with("name", "d1").with("display_name", "v1");
        let desired = Entity::new().with("name", "d1").with("display_name", "v2");
        let diffs = diff(&schema(), Some(&initial), &desired);
        assert_eq!(
            diffs,
            vec![FieldDiff {
                path: "display_name".to_string(),
                old: Presence::Present(Value::from("v1")),
                new: Presence::Present(Value::from("v2")),
                operations: vec!["update_display".to_string()],
                requires_recreate: false,
            }]
        );
    }

    #[test]
    fn test_immutable_requires_recreate() {
        let initial = Entity::new().with("name", "d1");
        let desired = Entity::new().with("name", "d2");
        let diffs = diff(&schema(), Some(&initial), &desired);
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].requires_recreate);
        assert!(diffs[0].operations.is_empty());
    }

    #[test]
    fn test_nested_leaf_paths_inherit_operation() {
        let initial = Entity::new().with("name", "d1").with(
            "config",
            Entity::new().with("size", 1).with("tier", "BASIC"),
        );
        let desired = Entity::new().with("name", "d1").with(
            "config",
            Entity::new().with("size", 2).with("tier", "basic"),
        );
        let diffs = diff(&schema(), Some(&initial), &desired);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "config.size");
        assert_eq!(diffs[0].operations, vec!["update_config".to_string()]);
    }

    #[test]
    fn test_absent_and_empty_are_distinct() {
        let initial = Entity::new().with("name", "d1");
        let empty = Entity::new().with("name", "d1").with_empty("config");
        let unset = Entity::new().with("name", "d1");

        let diffs = diff(&schema(), Some(&initial), &empty);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "config");
        assert_eq!(diffs[0].old, Presence::Absent);
        assert_eq!(diffs[0].new, Presence::Empty);

        assert!(diff(&schema(), Some(&initial), &unset).is_empty());
    }

    #[test]
    fn test_empty_equals_absent_when_schema_says_so() {
        let initial = Entity::new().with("name", "d1");
        let desired = Entity::new().with("name", "d1").with_empty("labels");
        assert!(diff(&schema(), Some(&initial), &desired).is_empty());
    }

    #[test]
    fn test_order_irrelevant_list() {
        let initial = Entity::new().with("name", "d1").with("tags", tags(&["a", "b", "b"]));
        let same = Entity::new().with("name", "d1").with("tags", tags(&["b", "a", "b"]));
        let other = Entity::new().with("name", "d1").with("tags", tags(&["a", "a", "b"]));

        assert!(diff(&schema(), Some(&initial), &same).is_empty());
        let diffs = diff(&schema(), Some(&initial), &other);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "tags");
    }

    #[test]
    fn test_ordered_list_recurses_by_index() {
        let rule = |port: i64| Value::Object(Entity::new().with("port", port));
        let initial = Entity::new()
            .with("name", "d1")
            .with("rules", vec![rule(80), rule(443)]);
        let reordered = Entity::new()
            .with("name", "d1")
            .with("rules", vec![rule(443), rule(80)]);
        let longer = Entity::new()
            .with("name", "d1")
            .with("rules", vec![rule(80), rule(443), rule(8080)]);

        let paths: Vec<String> = diff(&schema(), Some(&initial), &reordered)
            .into_iter()
            .map(|d| d.path)
            .collect();
        assert_eq!(paths, vec!["rules[0].port", "rules[1].port"]);

        let diffs = diff(&schema(), Some(&initial), &longer);
        assert_eq!(diffs.len(), 1);
        assert_eq!(diffs[0].path, "rules");
    }

    #[test]
    fn test_output_only_never_diffs() {
        let initial = Entity::new().with("name", "d1").with("uid", "abc");
        let desired = Entity::new().with("name", "d1");
        assert!(diff(&schema(), Some(&initial), &desired).is_empty());
    }

    #[test]
    fn test_operation_grouping_is_deterministic() {
        let initial = Entity::new()
            .with("name", "d1")
            .with("display_name", "v1")
            .with("config", Entity::new().with("size", 1))
            .with("tags", tags(&["a"]));
        let desired = Entity::new()
            .with("name", "d1")
            .with("display_name", "v2")
            .with("config", Entity::new().with("size", 2))
            .with("tags", tags(&["b"]));

        let schema = schema();
        let diffs = diff(&schema, Some(&initial), &desired);
        let first = to_operation_diffs(&schema, &diffs);
        for _ in 0..10 {
            assert_eq!(to_operation_diffs(&schema, &diffs), first);
        }

        let mut reversed = diffs.clone();
        reversed.reverse();
        let ops: Vec<Option<String>> = to_operation_diffs(&schema, &reversed)
            .into_iter()
            .map(|d| d.update_op)
            .collect();
        assert_eq!(
            ops,
            vec![
                Some("update_display".to_string()),
                Some("update_config".to_string())
            ]
        );

        assert_eq!(first[0].update_op.as_deref(), Some("update_display"));
        assert_eq!(first[0].field_names(), vec!["display_name", "tags"]);
        assert_eq!(first[1].field_names(), vec!["config"]);
    }

    #[test]
    fn test_recreate_group_first() {
        let initial = Entity::new().with("name", "d1").with("display_name", "v1");
        let desired = Entity::new().with("name", "d2").with("display_name", "v2");
        let schema = schema();
        let ops = to_operation_diffs(&schema, &diff(&schema, Some(&initial), &desired));
        assert_eq!(ops.len(), 2);
        assert!(ops[0].requires_recreate);
        assert_eq!(ops[0].update_op, None);
        assert_eq!(ops[1].update_op.as_deref(), Some("update_display"));
    }
}
