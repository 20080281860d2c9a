//! Field-level diff between an in-memory record and the requested state.

use agentdb_schema::{Accessor, Entity, Value};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMode {
    Insert,
    Update,
}

/// One column to write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Change {
    pub field: &'static str,
    pub column: &'static str,
    pub value: Value,
}

/// Ordered changes plus the named parameters they bind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Changeset {
    pub changes: Vec<Change>,
    pub params: BTreeMap<String, Value>,
}

impl Changeset {
    fn push(&mut self, field: &'static str, column: &'static str, value: Value) {
        self.params.insert(column.to_string(), value.clone());
        self.changes.push(Change {
            field,
            column,
            value,
        });
    }

    /// Column names in detection order.
    pub fn columns(&self) -> Vec<&'static str> {
        self.changes.iter().map(|c| c.column).collect()
    }

    pub fn params(&self) -> &BTreeMap<String, Value> {
        &self.params
    }

    /// Adds a parameter that is not a change (e.g. the identity in a WHERE clause).
    pub fn bind(&mut self, name: &str, value: Value) {
        self.params.insert(name.to_string(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// Compares `requested` against `current` field by field.
///
/// Identity and transient fields are skipped. A blank requested value (`None`, empty text,
/// integer zero) never contributes, except that a plain integer may be updated to zero.
/// In update mode only differing fields contribute; in insert mode every non-blank field
/// does. Each contributing value is copied into `current`.
pub fn diff<E: Entity>(current: &mut E, requested: &E, mode: DiffMode) -> Changeset {
    let mut changeset = Changeset::default();

    for field in E::descriptor().persistable() {
        if field.identity {
            continue;
        }
        let Some(column) = field.column else {
            continue;
        };
        let accessor = &field.accessor;

        let include = match mode {
            DiffMode::Insert => !accessor.is_blank(requested),
            DiffMode::Update => {
                !accessor.same(current, requested)
                    && (matches!(accessor, Accessor::Int(..)) || !accessor.is_blank(requested))
            }
        };
        if !include {
            continue;
        }

        accessor.copy_from(current, requested);
        changeset.push(field.name, column, accessor.value(requested));
    }

    changeset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{JobDetail, Node};
    use agentdb_schema::{DescriptorBuilder, EntityDescriptor};
    use rust_decimal::Decimal;
    use std::sync::LazyLock;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Quota {
        id: i64,
        slots: i64,
        weight: Decimal,
        ceiling: Option<Decimal>,
    }

    static QUOTA: LazyLock<EntityDescriptor<Quota>> = LazyLock::new(|| {
        DescriptorBuilder::<Quota>::new("quotas")
            .identity("id", |q| &q.id, |q| &mut q.id)
            .int("slots", |q| &q.slots, |q| &mut q.slots)
            .decimal("weight", |q| &q.weight, |q| &mut q.weight)
            .opt_decimal("ceiling", |q| &q.ceiling, |q| &mut q.ceiling)
            .build()
    });

    impl Entity for Quota {
        fn descriptor() -> &'static EntityDescriptor<Self> {
            &QUOTA
        }
    }

    fn node(name: &str, code: &str) -> Node {
        Node {
            name: name.to_string(),
            code: code.to_string(),
            node_type: "worker".to_string(),
            ..Node::default()
        }
    }

    #[test]
    fn equal_records_produce_empty_update() {
        let mut current = node("edge", "edge-01");
        current.id = 4;
        let requested = current.clone();
        let changeset = diff(&mut current, &requested, DiffMode::Update);
        assert!(changeset.is_empty());
        assert!(changeset.params().is_empty());
    }

    #[test]
    fn update_writes_back_and_skips_blank_requests() {
        let mut current = node("edge", "edge-01");
        current.detail = Some("rack 4".to_string());
        let mut requested = node("edge-renamed", "");
        requested.detail = None;

        let changeset = diff(&mut current, &requested, DiffMode::Update);
        assert_eq!(changeset.columns(), ["name"]);
        assert_eq!(current.name, "edge-renamed");
        assert_eq!(current.code, "edge-01");
        assert_eq!(current.detail.as_deref(), Some("rack 4"));
    }

    #[test]
    fn update_params_reproduce_requested() {
        let mut current = node("edge", "edge-01");
        let mut requested = node("core", "core-01");
        requested.detail = Some("primary".to_string());
        requested.node_type = "master".to_string();

        let changeset = diff(&mut current, &requested, DiffMode::Update);
        let desc = <Node as Entity>::descriptor();
        let mut replay = node("edge", "edge-01");
        for (column, value) in changeset.params() {
            let field = desc.by_column(column).expect("known column");
            assert!(field.accessor.assign(&mut replay, value.clone()));
        }
        for change in &changeset.changes {
            let field = desc.field(change.field).expect("known field");
            assert!(field.accessor.same(&replay, &requested), "{}", change.field);
        }
        assert_eq!(current, replay);
    }

    #[test]
    fn insert_skips_identity_and_blank_fields() {
        let mut current = Node::default();
        let mut requested = node("edge", "edge-01");
        requested.id = 99;

        let changeset = diff(&mut current, &requested, DiffMode::Insert);
        assert!(!changeset.params().contains_key("id"));
        assert!(!changeset.params().contains_key("detail"));
        assert_eq!(changeset.columns(), ["name", "code", "type"]);
        assert_eq!(current.id, 0);
        assert_eq!(current.code, "edge-01");
    }

    #[test]
    fn insert_includes_false_booleans_and_update_only_changed_ones() {
        let mut current = JobDetail::default();
        let requested = JobDetail {
            job_id: 7,
            ..JobDetail::default()
        };
        let inserted = diff(&mut current, &requested, DiffMode::Insert);
        assert!(inserted.params().contains_key("run_before"));
        assert_eq!(inserted.params()["run_after"], Value::Bool(false));

        let mut toggled = current.clone();
        toggled.run_after = true;
        let updated = diff(&mut current, &toggled, DiffMode::Update);
        assert_eq!(updated.columns(), ["run_after"]);
        assert!(current.run_after);
    }

    #[test]
    fn plain_integers_may_be_updated_to_zero() {
        let mut current = Quota {
            slots: 30,
            ..Quota::default()
        };
        let requested = Quota {
            slots: 0,
            ..current.clone()
        };
        let changeset = diff(&mut current, &requested, DiffMode::Update);
        assert_eq!(changeset.columns(), ["slots"]);
        assert_eq!(changeset.params()["slots"], Value::Int(0));
    }

    #[test]
    fn decimals_compare_by_value() {
        let mut current = Quota {
            weight: Decimal::new(150, 2),
            ceiling: Some(Decimal::new(2, 0)),
            ..Quota::default()
        };
        let requested = Quota {
            weight: Decimal::new(1500, 3),
            ceiling: Some(Decimal::new(200, 2)),
            ..current.clone()
        };
        assert!(diff(&mut current, &requested, DiffMode::Update).is_empty());

        let raised = Quota {
            ceiling: Some(Decimal::new(3, 0)),
            ..current.clone()
        };
        let changeset = diff(&mut current, &raised, DiffMode::Update);
        assert_eq!(changeset.columns(), ["ceiling"]);
    }

    #[test]
    fn plain_decimals_are_never_blank_on_insert() {
        let mut current = Quota::default();
        let changeset = diff(&mut current, &Quota::default(), DiffMode::Insert);
        assert_eq!(changeset.columns(), ["weight"]);
    }
}
