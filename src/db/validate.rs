//! Declarative field rules and constraint-violation mapping.

use agentdb_schema::{Entity, Value};
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::warn;

use crate::db::dialect::{ConstraintRef, ErrorClass};

/// Field identifier -> message.
pub type FieldErrors = BTreeMap<String, String>;

/// A rule check: the field value and the rule parameter (the part after `=`).
pub type RuleFn = Box<dyn Fn(&Value, Option<&str>) -> bool + Send + Sync>;

pub const UNIQUE_MESSAGE: &str = "has already been taken";
pub const FOREIGN_MESSAGE: &str = "does not exist";

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
        .expect("email pattern compiles")
});

/// Rule registry, built once at start-up and shared by every handle.
pub struct Validator {
    rules: HashMap<String, RuleFn>,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.rules.keys().collect();
        names.sort();
        f.debug_struct("Validator").field("rules", &names).finish()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    /// Registry with the builtin rules.
    pub fn new() -> Self {
        let mut v = Self {
            rules: HashMap::new(),
        };
        v.register("required", |value, _| !value.is_blank());
        v.register("gte", |value, p| compare(value, p, |a, b| a >= b));
        v.register("min", |value, p| compare(value, p, |a, b| a >= b));
        v.register("lte", |value, p| compare(value, p, |a, b| a <= b));
        v.register("max", |value, p| compare(value, p, |a, b| a <= b));
        v.register("gt", |value, p| compare(value, p, |a, b| a > b));
        v.register("lt", |value, p| compare(value, p, |a, b| a < b));
        v.register("len", |value, p| compare(value, p, |a, b| a == b));
        v.register("email", |value, _| {
            value.as_str().is_some_and(|s| EMAIL.is_match(s))
        });
        v.register("oneof", |value, p| {
            let candidate = value.to_string();
            p.unwrap_or_default()
                .split_whitespace()
                .any(|option| option == candidate)
        });
        v
    }

    /// Adds or replaces a rule.
    pub fn register<F>(&mut self, name: &str, check: F)
    where
        F: Fn(&Value, Option<&str>) -> bool + Send + Sync + 'static,
    {
        self.rules.insert(name.to_string(), Box::new(check));
    }

    /// First failing rule of `rules` for `value`, rendered as `rule` or `rule: param`.
    ///
    /// Null values only answer to `required`.
    pub fn check(&self, rules: &str, value: &Value) -> Option<String> {
        for rule in rules.split(',').map(str::trim).filter(|r| !r.is_empty()) {
            let (name, param) = match rule.split_once('=') {
                Some((name, param)) => (name.trim(), Some(param.trim())),
                None => (rule, None),
            };
            if value.is_null() && name != "required" {
                continue;
            }
            let Some(check) = self.rules.get(name) else {
                warn!(rule = name, "unknown validation rule, skipping");
                continue;
            };
            if !check(value, param) {
                return Some(match param {
                    Some(param) => format!("{name}: {param}"),
                    None => name.to_string(),
                });
            }
        }
        None
    }

    /// Runs every field's rules, transient fields included.
    pub fn validate_struct<E: Entity>(&self, record: &E) -> FieldErrors {
        let mut errors = FieldErrors::new();
        for field in &E::descriptor().fields {
            let Some(rules) = field.rules else {
                continue;
            };
            if let Some(message) = self.check(rules, &field.accessor.value(record)) {
                errors.insert(field.name.to_string(), message);
            }
        }
        errors
    }

    /// Maps a classified constraint violation onto the fields of `E` that declare it.
    ///
    /// An empty map means the violation does not belong to `E` and the original error
    /// should be propagated.
    pub fn constraint_errors<E: Entity>(&self, class: &ErrorClass) -> FieldErrors {
        let mut errors = FieldErrors::new();
        let desc = E::descriptor();
        match class {
            ErrorClass::UniqueViolation(reported) => {
                for field in &desc.fields {
                    if field.unique.is_none() {
                        continue;
                    }
                    let by_name = reported
                        .name
                        .as_deref()
                        .is_some_and(|name| field.unique_constraints().any(|u| u == name));
                    if by_name || matches_columns(reported, field.column) {
                        errors.insert(field.name.to_string(), UNIQUE_MESSAGE.to_string());
                    }
                }
            }
            ErrorClass::ForeignKeyViolation(reported) => {
                for field in &desc.fields {
                    let Some(foreign) = field.foreign else {
                        continue;
                    };
                    let by_name = reported.name.as_deref() == Some(foreign);
                    if by_name || matches_columns(reported, field.column) {
                        errors.insert(field.name.to_string(), FOREIGN_MESSAGE.to_string());
                    }
                }
            }
            ErrorClass::RelationNotFound | ErrorClass::Other => {}
        }
        errors
    }
}

/// Column-based match, used when the backend reports no constraint name.
fn matches_columns(reported: &ConstraintRef, column: Option<&str>) -> bool {
    reported.name.is_none()
        && column.is_some_and(|col| reported.columns.iter().any(|c| c.eq_ignore_ascii_case(col)))
}

/// Text is measured in characters, numbers by value.
fn compare(value: &Value, param: Option<&str>, op: fn(Decimal, Decimal) -> bool) -> bool {
    let Some(bound) = param.and_then(|p| Decimal::from_str(p).ok()) else {
        return false;
    };
    let measured = match value {
        Value::Text(s) => Decimal::from(s.chars().count()),
        Value::Int(i) => Decimal::from(*i),
        Value::Decimal(d) => *d,
        Value::Null | Value::Bool(_) | Value::Timestamp(_) => return false,
    };
    op(measured, bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Job, Node, User, UserPassphrase};

    #[test]
    fn missing_required_fields_are_reported() {
        let validator = Validator::new();
        let errors = validator.validate_struct(&User::default());
        assert_eq!(errors.get("username").map(String::as_str), Some("required"));
        assert_eq!(errors.get("password").map(String::as_str), Some("required"));
        assert_eq!(errors.get("email").map(String::as_str), Some("required"));
    }

    #[test]
    fn first_failing_rule_wins_with_param() {
        let validator = Validator::new();
        let mut node = Node::new("ab", "edge-01");
        node.node_type = "gateway".to_string();
        let errors = validator.validate_struct(&node);
        assert_eq!(errors.get("name").map(String::as_str), Some("gte: 3"));
        assert_eq!(
            errors.get("node_type").map(String::as_str),
            Some("oneof: master worker")
        );
        assert!(!errors.contains_key("code"));
    }

    #[test]
    fn email_format() {
        let validator = Validator::new();
        assert_eq!(
            validator.check("required,email", &Value::from("not-an-email")),
            Some("email".to_string())
        );
        assert_eq!(validator.check("required,email", &Value::from("ops@example.com")), None);
    }

    #[test]
    fn nulls_only_fail_required() {
        let validator = Validator::new();
        assert_eq!(validator.check("gte=3,email", &Value::Null), None);
        assert_eq!(
            validator.check("required", &Value::Null),
            Some("required".to_string())
        );
    }

    #[test]
    fn custom_rules_and_unknown_rules() {
        let mut validator = Validator::new();
        validator.register("lowercase", |v, _| {
            v.as_str().is_some_and(|s| s == s.to_lowercase())
        });
        assert_eq!(
            validator.check("lowercase", &Value::from("Edge")),
            Some("lowercase".to_string())
        );
        assert_eq!(validator.check("no_such_rule,lowercase", &Value::from("edge")), None);
    }

    #[test]
    fn unique_violation_matches_by_name() {
        let validator = Validator::new();
        let class = ErrorClass::UniqueViolation(ConstraintRef {
            name: Some("ra_nodes_code_unique_index".to_string()),
            columns: vec![],
        });
        let errors = validator.constraint_errors::<Node>(&class);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors["code"], UNIQUE_MESSAGE);
    }

    #[test]
    fn unique_violation_matches_sqlite_columns() {
        let validator = Validator::new();
        let class = ErrorClass::UniqueViolation(ConstraintRef {
            name: None,
            columns: vec!["passphrase".to_string()],
        });
        let errors = validator.constraint_errors::<UserPassphrase>(&class);
        assert_eq!(errors["passphrase"], UNIQUE_MESSAGE);
    }

    #[test]
    fn unmatched_constraints_yield_empty_map() {
        let validator = Validator::new();
        let foreign_other = ErrorClass::ForeignKeyViolation(ConstraintRef {
            name: Some("fk_somewhere_else".to_string()),
            columns: vec![],
        });
        assert!(validator.constraint_errors::<Job>(&foreign_other).is_empty());
        let nameless = ErrorClass::ForeignKeyViolation(ConstraintRef::default());
        assert!(validator.constraint_errors::<Job>(&nameless).is_empty());
        assert!(validator.constraint_errors::<Job>(&ErrorClass::Other).is_empty());

        let foreign = ErrorClass::ForeignKeyViolation(ConstraintRef {
            name: Some("fk_ra_jobs_node_id".to_string()),
            columns: vec![],
        });
        assert_eq!(
            validator.constraint_errors::<Job>(&foreign)["node_id"],
            FOREIGN_MESSAGE
        );
    }
}
