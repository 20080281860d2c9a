use agentdb_schema::Value;
use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::any::{AnyPoolOptions, AnyQueryResult, AnyRow};
use sqlx::{Any, AnyPool, Transaction};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::db::executor::{Context, Queryable, bind_all, timed};
use crate::db::validate::Validator;
use crate::error::{AgentDbError, Result};

/// Shared handle over one connection pool.
///
/// Cloning is cheap; every clone uses the same pool and rule registry.
#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
    ctx: Arc<Context>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("dialect", &self.ctx.dialect)
            .field("pool_size", &self.pool.size())
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Connects with the builtin validation rules.
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self> {
        Self::connect_with(cfg, Arc::new(Validator::new())).await
    }

    pub async fn connect_with(cfg: &DatabaseConfig, validator: Arc<Validator>) -> Result<Self> {
        let dialect = cfg.dialect()?;
        let url = cfg.connection_url()?;
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(cfg.acquire_timeout())
            .connect(&url)
            .await
            .map_err(|e| AgentDbError::Connection(format!("{dialect} connect failed: {e}")))?;

        info!(
            dialect = %dialect,
            max_connections = cfg.max_connections,
            query_timeout = ?cfg.query_timeout(),
            "Database connected"
        );
        Ok(Self {
            pool,
            ctx: Arc::new(Context {
                dialect,
                validator,
                query_timeout: cfg.query_timeout(),
            }),
        })
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Runs `f` inside a transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise and hands back `f`'s error. The
    /// [`Tx`] lives only for this call; its connection returns to the pool afterwards.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t Tx) -> BoxFuture<'t, Result<T>> + Send,
    {
        let inner = timed(self.ctx.query_timeout, self.pool.begin()).await?;
        let tx = Tx {
            inner: Mutex::new(inner),
            ctx: Arc::clone(&self.ctx),
        };

        let outcome = f(&tx).await;
        let inner = tx.inner.into_inner();
        match outcome {
            Ok(value) => {
                timed(self.ctx.query_timeout, inner.commit()).await?;
                debug!("db transaction committed");
                Ok(value)
            }
            Err(err) => {
                match inner.rollback().await {
                    Ok(()) => debug!(error = %err, "db transaction rolled back"),
                    Err(rollback) => {
                        warn!(error = %err, rollback_error = %rollback, "db transaction rollback failed");
                    }
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Queryable for Database {
    fn context(&self) -> &Context {
        &self.ctx
    }

    async fn fetch_rows(&self, sql: &str, values: &[Value]) -> Result<Vec<AnyRow>> {
        timed(self.ctx.query_timeout, bind_all(sql, values).fetch_all(&self.pool)).await
    }

    async fn execute_sql(&self, sql: &str, values: &[Value]) -> Result<AnyQueryResult> {
        timed(self.ctx.query_timeout, bind_all(sql, values).execute(&self.pool)).await
    }
}

/// An open transaction, handed to [`Database::transaction`] callbacks.
pub struct Tx {
    inner: Mutex<Transaction<'static, Any>>,
    ctx: Arc<Context>,
}

#[async_trait]
impl Queryable for Tx {
    fn context(&self) -> &Context {
        &self.ctx
    }

    async fn fetch_rows(&self, sql: &str, values: &[Value]) -> Result<Vec<AnyRow>> {
        let mut conn = self.inner.lock().await;
        timed(self.ctx.query_timeout, bind_all(sql, values).fetch_all(&mut **conn)).await
    }

    async fn execute_sql(&self, sql: &str, values: &[Value]) -> Result<AnyQueryResult> {
        let mut conn = self.inner.lock().await;
        timed(self.ctx.query_timeout, bind_all(sql, values).execute(&mut **conn)).await
    }
}
