//! Per-entity field metadata.
//!
//! Each record type builds one [`EntityDescriptor`] listing its fields in declaration order.
//! A field carries its column name (absent for transient state), an identity flag,
//! optional unique / foreign-key constraint identifiers, an optional rule expression and a
//! typed [`Accessor`] pair used to read and write the field without reflection.

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::value::Value;

pub type Getter<E, T> = fn(&E) -> &T;
pub type Setter<E, T> = fn(&mut E) -> &mut T;

/// Storage kind of a field, mirrored by the [`Accessor`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    OptInt,
    Text,
    OptText,
    Bool,
    OptBool,
    Decimal,
    OptDecimal,
    Timestamp,
}

pub enum Accessor<E> {
    Int(Getter<E, i64>, Setter<E, i64>),
    OptInt(Getter<E, Option<i64>>, Setter<E, Option<i64>>),
    Text(Getter<E, String>, Setter<E, String>),
    OptText(Getter<E, Option<String>>, Setter<E, Option<String>>),
    Bool(Getter<E, bool>, Setter<E, bool>),
    OptBool(Getter<E, Option<bool>>, Setter<E, Option<bool>>),
    Decimal(Getter<E, Decimal>, Setter<E, Decimal>),
    OptDecimal(Getter<E, Option<Decimal>>, Setter<E, Option<Decimal>>),
    Timestamp(
        Getter<E, Option<DateTime<Utc>>>,
        Setter<E, Option<DateTime<Utc>>>,
    ),
}

impl<E> Clone for Accessor<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for Accessor<E> {}

impl<E> std::fmt::Debug for Accessor<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Accessor::{:?}", self.kind())
    }
}

macro_rules! each_accessor {
    ($acc:expr, $get:ident, $set:ident => $body:expr) => {
        match $acc {
            Accessor::Int($get, $set) => $body,
            Accessor::OptInt($get, $set) => $body,
            Accessor::Text($get, $set) => $body,
            Accessor::OptText($get, $set) => $body,
            Accessor::Bool($get, $set) => $body,
            Accessor::OptBool($get, $set) => $body,
            Accessor::Decimal($get, $set) => $body,
            Accessor::OptDecimal($get, $set) => $body,
            Accessor::Timestamp($get, $set) => $body,
        }
    };
}

impl<E> Accessor<E> {
    pub fn kind(&self) -> FieldKind {
        match self {
            Accessor::Int(..) => FieldKind::Int,
            Accessor::OptInt(..) => FieldKind::OptInt,
            Accessor::Text(..) => FieldKind::Text,
            Accessor::OptText(..) => FieldKind::OptText,
            Accessor::Bool(..) => FieldKind::Bool,
            Accessor::OptBool(..) => FieldKind::OptBool,
            Accessor::Decimal(..) => FieldKind::Decimal,
            Accessor::OptDecimal(..) => FieldKind::OptDecimal,
            Accessor::Timestamp(..) => FieldKind::Timestamp,
        }
    }

    /// Reads the field as a [`Value`]; `None` becomes [`Value::Null`].
    pub fn value(&self, entity: &E) -> Value {
        match *self {
            Accessor::Int(get, _) => Value::Int(*get(entity)),
            Accessor::OptInt(get, _) => Value::from(*get(entity)),
            Accessor::Text(get, _) => Value::Text(get(entity).clone()),
            Accessor::OptText(get, _) => Value::from(get(entity).clone()),
            Accessor::Bool(get, _) => Value::Bool(*get(entity)),
            Accessor::OptBool(get, _) => Value::from(*get(entity)),
            Accessor::Decimal(get, _) => Value::Decimal(*get(entity)),
            Accessor::OptDecimal(get, _) => Value::from(*get(entity)),
            Accessor::Timestamp(get, _) => Value::from(*get(entity)),
        }
    }

    pub fn is_blank(&self, entity: &E) -> bool {
        self.value(entity).is_blank()
    }

    /// Typed equality of the field on two records.
    pub fn same(&self, a: &E, b: &E) -> bool {
        each_accessor!(*self, get, _set => get(a) == get(b))
    }

    /// Copies the field from `src` into `dst`.
    pub fn copy_from(&self, dst: &mut E, src: &E) {
        each_accessor!(*self, get, set => *set(dst) = get(src).clone());
    }

    /// Stores a decoded value into the field.
    ///
    /// Null resets the field to its empty state. Returns `false` when the value cannot be
    /// represented by the field's kind; the field is left untouched in that case.
    pub fn assign(&self, entity: &mut E, value: Value) -> bool {
        match *self {
            Accessor::Int(_, set) => put(set(entity), value, |v| v.as_int()),
            Accessor::OptInt(_, set) => put_opt(set(entity), value, |v| v.as_int()),
            Accessor::Text(_, set) => put(set(entity), value, text_of),
            Accessor::OptText(_, set) => put_opt(set(entity), value, text_of),
            Accessor::Bool(_, set) => put(set(entity), value, bool_of),
            Accessor::OptBool(_, set) => put_opt(set(entity), value, bool_of),
            Accessor::Decimal(_, set) => put(set(entity), value, decimal_of),
            Accessor::OptDecimal(_, set) => put_opt(set(entity), value, decimal_of),
            Accessor::Timestamp(_, set) => put_opt(set(entity), value, timestamp_of),
        }
    }
}

fn put<T: Default>(slot: &mut T, value: Value, convert: fn(Value) -> Option<T>) -> bool {
    if value.is_null() {
        *slot = T::default();
        return true;
    }
    match convert(value) {
        Some(v) => {
            *slot = v;
            true
        }
        None => false,
    }
}

fn put_opt<T>(slot: &mut Option<T>, value: Value, convert: fn(Value) -> Option<T>) -> bool {
    if value.is_null() {
        *slot = None;
        return true;
    }
    match convert(value) {
        Some(v) => {
            *slot = Some(v);
            true
        }
        None => false,
    }
}

fn text_of(value: Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn bool_of(value: Value) -> Option<bool> {
    match value {
        Value::Text(s) => match s.as_str() {
            "1" | "t" | "true" | "TRUE" => Some(true),
            "0" | "f" | "false" | "FALSE" => Some(false),
            _ => None,
        },
        other => other.as_bool(),
    }
}

fn decimal_of(value: Value) -> Option<Decimal> {
    match value {
        Value::Text(s) => Decimal::from_str(s.trim()).ok(),
        other => other.as_decimal(),
    }
}

fn timestamp_of(value: Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Text(s) => parse_timestamp(&s),
        other => other.as_timestamp(),
    }
}

/// Parses RFC3339 text, falling back to the `YYYY-MM-DD HH:MM:SS[.f]` form backends emit
/// for naive timestamps (read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug)]
pub struct FieldDescriptor<E> {
    /// Field identifier, also the key in field-error maps.
    pub name: &'static str,
    /// Column name; `None` marks transient state that is never persisted.
    pub column: Option<&'static str>,
    pub identity: bool,
    /// Comma-separated unique constraint identifiers.
    pub unique: Option<&'static str>,
    pub foreign: Option<&'static str>,
    pub rules: Option<&'static str>,
    pub accessor: Accessor<E>,
}

impl<E> FieldDescriptor<E> {
    pub fn is_persistable(&self) -> bool {
        self.column.is_some()
    }

    pub fn unique_constraints(&self) -> impl Iterator<Item = &'static str> {
        self.unique
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn kind(&self) -> FieldKind {
        self.accessor.kind()
    }
}

#[derive(Debug)]
pub struct EntityDescriptor<E> {
    pub table: &'static str,
    pub fields: Vec<FieldDescriptor<E>>,
}

impl<E> EntityDescriptor<E> {
    /// Fields that carry a column, in declaration order.
    pub fn persistable(&self) -> impl Iterator<Item = &FieldDescriptor<E>> {
        self.fields.iter().filter(|f| f.is_persistable())
    }

    pub fn identity(&self) -> Option<&FieldDescriptor<E>> {
        self.fields.iter().find(|f| f.identity && f.is_persistable())
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor<E>> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn by_column(&self, column: &str) -> Option<&FieldDescriptor<E>> {
        self.fields
            .iter()
            .find(|f| f.column.is_some_and(|c| c.eq_ignore_ascii_case(column)))
    }
}

/// Record types persisted through the data layer.
pub trait Entity: Sized + Send + Sync + 'static {
    fn descriptor() -> &'static EntityDescriptor<Self>;
}

/// Declarative construction of an [`EntityDescriptor`].
///
/// Field constructors push a field whose column defaults to the field name; the modifier
/// methods (`column`, `transient`, `unique`, `foreign`, `rules`) apply to the most recently
/// pushed field.
pub struct DescriptorBuilder<E> {
    table: &'static str,
    fields: Vec<FieldDescriptor<E>>,
}

impl<E> DescriptorBuilder<E> {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            fields: Vec::new(),
        }
    }

    fn push(mut self, name: &'static str, accessor: Accessor<E>) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            column: Some(name),
            identity: false,
            unique: None,
            foreign: None,
            rules: None,
            accessor,
        });
        self
    }

    fn last(mut self, apply: impl FnOnce(&mut FieldDescriptor<E>)) -> Self {
        if let Some(field) = self.fields.last_mut() {
            apply(field);
        }
        self
    }

    /// Backend-assigned integer primary key.
    pub fn identity(self, name: &'static str, get: Getter<E, i64>, set: Setter<E, i64>) -> Self {
        self.push(name, Accessor::Int(get, set))
            .last(|f| f.identity = true)
    }

    pub fn int(self, name: &'static str, get: Getter<E, i64>, set: Setter<E, i64>) -> Self {
        self.push(name, Accessor::Int(get, set))
    }

    pub fn opt_int(
        self,
        name: &'static str,
        get: Getter<E, Option<i64>>,
        set: Setter<E, Option<i64>>,
    ) -> Self {
        self.push(name, Accessor::OptInt(get, set))
    }

    pub fn text(self, name: &'static str, get: Getter<E, String>, set: Setter<E, String>) -> Self {
        self.push(name, Accessor::Text(get, set))
    }

    pub fn opt_text(
        self,
        name: &'static str,
        get: Getter<E, Option<String>>,
        set: Setter<E, Option<String>>,
    ) -> Self {
        self.push(name, Accessor::OptText(get, set))
    }

    pub fn bool(self, name: &'static str, get: Getter<E, bool>, set: Setter<E, bool>) -> Self {
        self.push(name, Accessor::Bool(get, set))
    }

    pub fn opt_bool(
        self,
        name: &'static str,
        get: Getter<E, Option<bool>>,
        set: Setter<E, Option<bool>>,
    ) -> Self {
        self.push(name, Accessor::OptBool(get, set))
    }

    pub fn decimal(
        self,
        name: &'static str,
        get: Getter<E, Decimal>,
        set: Setter<E, Decimal>,
    ) -> Self {
        self.push(name, Accessor::Decimal(get, set))
    }

    pub fn opt_decimal(
        self,
        name: &'static str,
        get: Getter<E, Option<Decimal>>,
        set: Setter<E, Option<Decimal>>,
    ) -> Self {
        self.push(name, Accessor::OptDecimal(get, set))
    }

    pub fn timestamp(
        self,
        name: &'static str,
        get: Getter<E, Option<DateTime<Utc>>>,
        set: Setter<E, Option<DateTime<Utc>>>,
    ) -> Self {
        self.push(name, Accessor::Timestamp(get, set))
    }

    pub fn column(self, column: &'static str) -> Self {
        self.last(|f| f.column = Some(column))
    }

    pub fn transient(self) -> Self {
        self.last(|f| f.column = None)
    }

    pub fn unique(self, constraints: &'static str) -> Self {
        self.last(|f| f.unique = Some(constraints))
    }

    pub fn foreign(self, constraint: &'static str) -> Self {
        self.last(|f| f.foreign = Some(constraint))
    }

    pub fn rules(self, rules: &'static str) -> Self {
        self.last(|f| f.rules = Some(rules))
    }

    pub fn build(self) -> EntityDescriptor<E> {
        EntityDescriptor {
            table: self.table,
            fields: self.fields,
        }
    }
}
