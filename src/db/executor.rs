//! Statement execution shared by the pool handle and transactions.
//!
//! [`Queryable`] has two required primitives (fetch rows, execute) and builds every public
//! operation on top of them, so [`Database`](crate::db::Database) and [`Tx`](crate::db::Tx)
//! expose the same surface.

use agentdb_schema::{Entity, Value};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::any::{AnyArguments, AnyQueryResult, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, Column, Row};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::db::change::{Changeset, DiffMode, diff};
use crate::db::statement::{build_insert, build_update, expand_named};
use crate::db::validate::Validator;
use crate::db::Dialect;
use crate::error::{AgentDbError, Result};
use crate::utils::logging::{sql_preview, with_pretty_json_debug};

/// Named statement parameters.
pub type Params = BTreeMap<String, Value>;

/// Builds [`Params`] from `(name, value)` pairs.
pub fn params<const N: usize>(pairs: [(&str, Value); N]) -> Params {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Per-handle settings shared by a pool handle and the transactions it opens.
#[derive(Debug, Clone)]
pub struct Context {
    pub dialect: Dialect,
    pub validator: Arc<Validator>,
    pub query_timeout: Option<Duration>,
}

/// Untyped rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Value of `column` in row `row`.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(idx)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InsertResult {
    pub rows_affected: u64,
    /// Identity assigned by the backend, also written back into the record.
    pub last_insert_id: Option<i64>,
}

#[async_trait]
pub trait Queryable: Send + Sync {
    fn context(&self) -> &Context;

    /// Runs a statement already in the dialect's positional form and returns its rows.
    async fn fetch_rows(&self, sql: &str, values: &[Value]) -> Result<Vec<AnyRow>>;

    /// Runs a statement already in the dialect's positional form.
    async fn execute_sql(&self, sql: &str, values: &[Value]) -> Result<AnyQueryResult>;

    fn dialect(&self) -> Dialect {
        self.context().dialect
    }

    async fn query(&self, sql: &str, params: &Params) -> Result<QueryResult> {
        let (sql, values) = expand_named(sql, params, self.dialect())?;
        let rows = self.fetch_rows(&sql, &values).await?;
        let mut result = QueryResult::default();
        if let Some(first) = rows.first() {
            result.columns = first.columns().iter().map(|c| c.name().to_string()).collect();
        }
        for row in &rows {
            result.rows.push(decode_row(row)?);
        }
        Ok(result)
    }

    /// Like [`query`](Self::query) but expects a row; an empty result is [`AgentDbError::NotFound`].
    async fn query_row(&self, sql: &str, params: &Params) -> Result<Vec<Value>> {
        let mut result = self.query(sql, params).await?;
        if result.rows.is_empty() {
            return Err(AgentDbError::NotFound);
        }
        Ok(result.rows.swap_remove(0))
    }

    async fn query_with_model<E>(&self, sql: &str, params: &Params) -> Result<Vec<E>>
    where
        E: Entity + Default,
    {
        let (sql, values) = expand_named(sql, params, self.dialect())?;
        let rows = self.fetch_rows(&sql, &values).await?;
        rows.iter().map(scan_into::<E>).collect()
    }

    async fn query_row_with_model<E>(&self, sql: &str, params: &Params) -> Result<E>
    where
        E: Entity + Default,
    {
        let (sql, values) = expand_named(sql, params, self.dialect())?;
        let rows = self.fetch_rows(&sql, &values).await?;
        rows.first().map_or(Err(AgentDbError::NotFound), scan_into::<E>)
    }

    /// Executes a statement and returns the affected row count.
    async fn execute(&self, sql: &str, params: &Params) -> Result<u64> {
        let (sql, values) = expand_named(sql, params, self.dialect())?;
        Ok(self.execute_sql(&sql, &values).await?.rows_affected())
    }

    /// Validates `requested`, writes its non-blank fields and back-fills the identity
    /// into `current`.
    async fn insert<E: Entity>(&self, current: &mut E, requested: &E) -> Result<InsertResult> {
        self.validate_struct(requested)?;

        let desc = E::descriptor();
        let changeset = diff(current, requested, DiffMode::Insert);
        if changeset.is_empty() {
            return Err(AgentDbError::EmptyChangeset(desc.table));
        }

        let identity = desc.identity();
        let returning = identity
            .filter(|_| self.dialect().supports_returning())
            .and_then(|f| f.column);
        let sql = build_insert(&changeset.columns(), desc.table, returning);
        log_changeset(desc.table, "insert", &changeset);

        let (sql, values) = expand_named(&sql, changeset.params(), self.dialect())?;
        let result = if returning.is_some() {
            let rows = self.fetch_rows(&sql, &values).await?;
            let id = rows
                .first()
                .map(|row| decode_column(row, 0))
                .transpose()?
                .and_then(|v| v.as_int());
            InsertResult {
                rows_affected: rows.len() as u64,
                last_insert_id: id,
            }
        } else {
            let done = self.execute_sql(&sql, &values).await?;
            InsertResult {
                rows_affected: done.rows_affected(),
                last_insert_id: done.last_insert_id(),
            }
        };

        if let (Some(field), Some(id)) = (identity, result.last_insert_id) {
            field.accessor.assign(current, Value::Int(id));
        }
        debug!(
            table = desc.table,
            rows_affected = result.rows_affected,
            last_insert_id = ?result.last_insert_id,
            "db insert applied"
        );
        Ok(result)
    }

    /// Writes the fields of `requested` that differ from `current`, keyed by `current`'s
    /// identity. Returns the applied changeset; an empty one means nothing was sent.
    async fn update<E: Entity>(&self, current: &mut E, requested: &E) -> Result<Changeset> {
        let desc = E::descriptor();
        let identity = desc
            .identity()
            .ok_or(AgentDbError::MissingIdentity(desc.table))?;
        let id_column = identity
            .column
            .ok_or(AgentDbError::MissingIdentity(desc.table))?;
        let id = identity.accessor.value(current);
        if id.is_blank() {
            return Err(AgentDbError::MissingIdentity(desc.table));
        }

        let changeset = diff(current, requested, DiffMode::Update);
        if changeset.is_empty() {
            debug!(table = desc.table, id = %id, "db update skipped, nothing changed");
            return Ok(changeset);
        }

        let where_clause = format!("{id_column} = :{id_column}");
        let sql = build_update(&changeset.columns(), desc.table, &where_clause, None);
        log_changeset(desc.table, "update", &changeset);

        let mut bound = changeset.params().clone();
        bound.insert(id_column.to_string(), id.clone());
        let (sql, values) = expand_named(&sql, &bound, self.dialect())?;
        let affected = self.execute_sql(&sql, &values).await?.rows_affected();
        debug!(table = desc.table, id = %id, affected, "db update applied");

        if affected == 0 {
            return Err(AgentDbError::NotFound);
        }
        Ok(changeset)
    }

    /// Deletes the record of type `E` with identity `id`.
    async fn delete<E: Entity>(&self, id: i64) -> Result<()> {
        let desc = E::descriptor();
        let id_column = desc
            .identity()
            .and_then(|f| f.column)
            .ok_or(AgentDbError::MissingIdentity(desc.table))?;
        let sql = format!("DELETE FROM {} WHERE {id_column} = :id", desc.table);
        let affected = self.execute(&sql, &params([("id", Value::Int(id))])).await?;
        debug!(table = desc.table, id, affected, "db delete applied");
        if affected == 0 {
            return Err(AgentDbError::NotFound);
        }
        Ok(())
    }

    /// Runs the declared field rules; failures come back as [`AgentDbError::Validation`].
    fn validate_struct<E: Entity>(&self, record: &E) -> Result<()> {
        let errors = self.context().validator.validate_struct(record);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AgentDbError::Validation(errors))
        }
    }

    /// Turns a unique / foreign-key violation on `E` into field errors.
    ///
    /// Errors that do not match any of `E`'s constraint tags are returned unchanged.
    fn validate_constraint<E: Entity>(&self, err: AgentDbError) -> AgentDbError {
        let AgentDbError::DatabaseError(db_err) = &err else {
            return err;
        };
        let class = self.dialect().classify(db_err);
        let errors = self.context().validator.constraint_errors::<E>(&class);
        if errors.is_empty() {
            err
        } else {
            AgentDbError::Validation(errors)
        }
    }
}

fn log_changeset(table: &str, op: &str, changeset: &Changeset) {
    with_pretty_json_debug(changeset, |pretty| {
        debug!(table, op, changes = changeset.len(), "db changeset:\n{pretty}");
    });
}

/// Binds values in order. Nulls bind as untyped text; decimals and timestamps as text.
pub(crate) fn bind_all<'q>(sql: &'q str, values: &'q [Value]) -> Query<'q, Any, AnyArguments<'q>> {
    debug!(sql = %sql_preview(sql), params = values.len(), "db statement");
    values.iter().fold(sqlx::query(sql), |query, value| match value {
        Value::Null => query.bind(None::<String>),
        Value::Text(s) => query.bind(s.as_str()),
        Value::Int(i) => query.bind(*i),
        Value::Bool(b) => query.bind(*b),
        Value::Decimal(d) => query.bind(d.to_string()),
        Value::Timestamp(t) => query.bind(t.to_rfc3339()),
    })
}

/// Applies the optional per-query deadline.
pub(crate) async fn timed<T, F>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| AgentDbError::Timeout(limit))?
            .map_err(AgentDbError::from),
        None => fut.await.map_err(AgentDbError::from),
    }
}

fn decode_row(row: &AnyRow) -> Result<Vec<Value>> {
    (0..row.columns().len())
        .map(|idx| decode_column(row, idx))
        .collect()
}

/// Decodes one column without knowing its declared type.
fn decode_column(row: &AnyRow, idx: usize) -> Result<Value> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return Ok(Value::from(v));
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return Ok(Value::from(v));
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return match v {
            None => Ok(Value::Null),
            Some(f) => Decimal::try_from(f)
                .map(Value::Decimal)
                .map_err(|e| decode_error(row, idx, e.to_string())),
        };
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return Ok(Value::from(v));
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return Ok(Value::from(
            v.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
        ));
    }
    Err(decode_error(row, idx, "unsupported column type".to_string()))
}

fn decode_error(row: &AnyRow, idx: usize, message: String) -> AgentDbError {
    let column = row
        .columns()
        .get(idx)
        .map_or_else(|| idx.to_string(), |c| c.name().to_string());
    AgentDbError::Decode { column, message }
}

/// Fills a default `E` from the row; columns without a matching field are ignored.
fn scan_into<E: Entity + Default>(row: &AnyRow) -> Result<E> {
    let desc = E::descriptor();
    let mut entity = E::default();
    for (idx, column) in row.columns().iter().enumerate() {
        let Some(field) = desc.by_column(column.name()) else {
            continue;
        };
        let value = decode_column(row, idx)?;
        if !field.accessor.assign(&mut entity, value) {
            return Err(AgentDbError::Decode {
                column: column.name().to_string(),
                message: format!("value does not fit a {:?} field", field.kind()),
            });
        }
    }
    Ok(entity)
}
