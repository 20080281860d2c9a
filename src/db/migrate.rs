//! Versioned schema migrations.
//!
//! Files live in one directory per dialect and are named `<N>.<name>.<up|down>.sql`. The
//! lowest-numbered up file is the base schema: it creates the tracking table and is run
//! once, on a database where that table does not exist yet, without being recorded. Every
//! later file with a number above the highest recorded one is applied in ascending order
//! inside a single transaction and recorded right after it runs.

use agentdb_schema::{DescriptorBuilder, Entity, EntityDescriptor, Value};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use sqlx::{AnyConnection, Executor};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::db::dialect::{Dialect, ErrorClass};
use crate::db::executor::{Queryable, params};
use crate::db::statement::split_statements;
use crate::db::Database;
use crate::error::{AgentDbError, Result};
use crate::utils::logging::sql_preview;

pub const MIGRATION_TABLE: &str = "ra_migrations";

/// A row of the tracking table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationRecord {
    pub id: i64,
    pub number: i64,
    pub name: String,
    pub applied_at: Option<DateTime<Utc>>,
}

static MIGRATION_RECORD: LazyLock<EntityDescriptor<MigrationRecord>> = LazyLock::new(|| {
    DescriptorBuilder::<MigrationRecord>::new(MIGRATION_TABLE)
        .identity("id", |m| &m.id, |m| &mut m.id)
        .int("number", |m| &m.number, |m| &mut m.number)
        .text("name", |m| &m.name, |m| &mut m.name)
        .timestamp("applied_at", |m| &m.applied_at, |m| &mut m.applied_at)
        .build()
});

impl Entity for MigrationRecord {
    fn descriptor() -> &'static EntityDescriptor<Self> {
        &MIGRATION_RECORD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub number: i64,
    pub name: String,
    pub direction: Direction,
    pub file_name: String,
    pub path: PathBuf,
}

impl MigrationFile {
    pub async fn read_sql(&self) -> Result<String> {
        Ok(tokio::fs::read_to_string(&self.path).await?)
    }
}

/// `<N>.<name>.<up|down>.sql` -> `(N, name, direction)`.
pub fn parse_file_name(file_name: &str) -> Option<(i64, &str, Direction)> {
    let stem = file_name.strip_suffix(".sql")?;
    let (rest, direction) = stem.rsplit_once('.')?;
    let direction = match direction {
        "up" => Direction::Up,
        "down" => Direction::Down,
        _ => return None,
    };
    let (number, name) = rest.split_once('.')?;
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) || name.is_empty() {
        return None;
    }
    Some((number.parse().ok()?, name, direction))
}

/// Lists the `direction` files of `dir`, sorted by number then name.
///
/// Names that do not follow the pattern are logged and skipped.
pub async fn discover(dir: &Path, direction: Direction) -> Result<Vec<MigrationFile>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let Some((number, name, dir_of_file)) = parse_file_name(&file_name) else {
            warn!(file = %file_name, dir = %dir.display(), "Skipping migration file with unparsable name");
            continue;
        };
        if dir_of_file != direction {
            continue;
        }
        files.push(MigrationFile {
            number,
            name: name.to_string(),
            direction,
            file_name: file_name.clone(),
            path: entry.path(),
        });
    }
    files.sort_by(|a, b| (a.number, &a.name).cmp(&(b.number, &b.name)));
    Ok(files)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MigrationState {
    /// The tracking table does not exist.
    Unbootstrapped,
    /// Tracking table present, some files pending.
    Bootstrapped,
    UpToDate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// The base file ran during this install.
    pub bootstrapped: bool,
    pub base: Option<String>,
    /// Incremental files applied, in order.
    pub applied: Vec<String>,
}

pub struct Migrator {
    db: Database,
    dir: PathBuf,
    reset: bool,
}

impl Migrator {
    /// Migrator over `root/<dialect>/`.
    pub fn new(db: Database, root: &Path) -> Self {
        let dir = root.join(db.dialect().name());
        Self {
            db,
            dir,
            reset: false,
        }
    }

    pub fn from_config(db: Database, cfg: &DatabaseConfig) -> Self {
        let dir = cfg.migrations_path(db.dialect());
        Self {
            db,
            dir,
            reset: cfg.reset,
        }
    }

    /// Drop the whole schema before installing.
    #[must_use]
    pub fn with_reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Highest recorded number, or `None` when the tracking table is missing.
    async fn highest(&self) -> Result<Option<i64>> {
        let sql = format!("SELECT COALESCE(MAX(number), 0) AS highest FROM {MIGRATION_TABLE}");
        match self.db.query_row(&sql, &params([])).await {
            Ok(row) => Ok(Some(row.first().and_then(Value::as_int).unwrap_or(0))),
            Err(AgentDbError::DatabaseError(err))
                if self.db.dialect().classify(&err) == ErrorClass::RelationNotFound =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn base_file(&self) -> Result<(Vec<MigrationFile>, MigrationFile)> {
        let files = discover(&self.dir, Direction::Up).await?;
        let base = files
            .first()
            .cloned()
            .ok_or_else(|| AgentDbError::MissingBaseMigration(self.dir.clone()))?;
        Ok((files, base))
    }

    pub async fn state(&self) -> Result<MigrationState> {
        let (files, base) = self.base_file().await?;
        let Some(highest) = self.highest().await? else {
            return Ok(MigrationState::Unbootstrapped);
        };
        let floor = highest.max(base.number);
        if files.iter().any(|f| f.number > floor) {
            Ok(MigrationState::Bootstrapped)
        } else {
            Ok(MigrationState::UpToDate)
        }
    }

    /// Bootstraps when needed, then applies every pending file in one transaction.
    pub async fn install(&self) -> Result<MigrationReport> {
        if self.reset {
            self.reset().await?;
        }

        let (files, base) = self.base_file().await?;
        let mut report = MigrationReport {
            base: Some(base.file_name.clone()),
            ..MigrationReport::default()
        };

        let highest = match self.highest().await? {
            Some(highest) => highest,
            None => {
                info!(file = %base.file_name, dialect = %self.db.dialect(), "Bootstrapping schema");
                let sql = base.read_sql().await?;
                let file = base.clone();
                self.db
                    .transaction(move |tx| {
                        async move { run_script(tx, &file, &sql).await }.boxed()
                    })
                    .await?;
                report.bootstrapped = true;
                base.number
            }
        };

        let floor = highest.max(base.number);
        let mut pending = Vec::new();
        for file in files.into_iter().filter(|f| f.number > floor) {
            let sql = file.read_sql().await?;
            pending.push((file, sql));
        }
        if pending.is_empty() {
            info!(highest = floor, "Schema is up to date");
            return Ok(report);
        }

        report.applied = self
            .db
            .transaction(move |tx| {
                async move {
                    let mut applied = Vec::with_capacity(pending.len());
                    for (file, sql) in &pending {
                        run_script(tx, file, sql).await?;
                        let requested = MigrationRecord {
                            number: file.number,
                            name: file.file_name.clone(),
                            applied_at: Some(Utc::now()),
                            ..MigrationRecord::default()
                        };
                        tx.insert(&mut MigrationRecord::default(), &requested)
                            .await
                            .map_err(|e| migration_error(file, e))?;
                        info!(file = %file.file_name, "Migrate");
                        applied.push(file.file_name.clone());
                    }
                    Ok(applied)
                }
                .boxed()
            })
            .await?;
        Ok(report)
    }

    /// Runs the down files from the highest number to the lowest, stopping at the first
    /// failure. Records of reverted incremental files are removed when the tracking table
    /// exists.
    pub async fn drop_all(&self) -> Result<Vec<String>> {
        let mut files = discover(&self.dir, Direction::Down).await?;
        files.reverse();
        let lowest = files.last().map(|f| f.number);
        let tracked = self.highest().await?.is_some();

        let mut dropped = Vec::with_capacity(files.len());
        for file in files {
            let sql = file.read_sql().await?;
            let forget = tracked && Some(file.number) != lowest;
            let name = file.file_name.clone();
            self.db
                .transaction(move |tx| {
                    async move {
                        run_script(tx, &file, &sql).await?;
                        if forget {
                            let delete = format!("DELETE FROM {MIGRATION_TABLE} WHERE number = :number");
                            tx.execute(&delete, &params([("number", Value::Int(file.number))]))
                                .await
                                .map_err(|e| migration_error(&file, e))?;
                        }
                        Ok(())
                    }
                    .boxed()
                })
                .await?;
            info!(file = %name, "Migrate down");
            dropped.push(name);
        }
        Ok(dropped)
    }

    /// Recorded migrations in application order.
    pub async fn applied(&self) -> Result<Vec<MigrationRecord>> {
        let sql = format!("SELECT id, number, name, applied_at FROM {MIGRATION_TABLE} ORDER BY id ASC");
        self.db.query_with_model(&sql, &params([])).await
    }

    /// Drops every table (SQLite, MySQL) or the `public` schema (PostgreSQL).
    pub async fn reset(&self) -> Result<()> {
        let dialect = self.db.dialect();
        warn!(dialect = %dialect, "Resetting database schema");
        let mut pooled = self.db.pool().acquire().await?;
        let conn: &mut AnyConnection = &mut pooled;
        match dialect {
            Dialect::Postgres => {
                conn.execute("DROP SCHEMA IF EXISTS public CASCADE").await?;
                conn.execute("CREATE SCHEMA public").await?;
                conn.execute("GRANT ALL ON SCHEMA public TO public").await?;
            }
            Dialect::Sqlite => {
                let tables: Vec<String> = sqlx::query_scalar(
                    "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                )
                .fetch_all(&mut *conn)
                .await?;
                conn.execute("PRAGMA foreign_keys = OFF").await?;
                for table in &tables {
                    conn.execute(format!("DROP TABLE IF EXISTS \"{table}\"").as_str())
                        .await?;
                }
                conn.execute("PRAGMA foreign_keys = ON").await?;
            }
            Dialect::MySql => {
                let tables: Vec<String> = sqlx::query_scalar(
                    "SELECT CAST(table_name AS CHAR) FROM information_schema.tables WHERE table_schema = DATABASE()",
                )
                .fetch_all(&mut *conn)
                .await?;
                conn.execute("SET FOREIGN_KEY_CHECKS = 0").await?;
                for table in &tables {
                    conn.execute(format!("DROP TABLE IF EXISTS `{table}`").as_str())
                        .await?;
                }
                conn.execute("SET FOREIGN_KEY_CHECKS = 1").await?;
            }
        }
        Ok(())
    }
}

/// Executes every statement of a migration script in order.
async fn run_script<Q: Queryable>(q: &Q, file: &MigrationFile, sql: &str) -> Result<()> {
    for statement in split_statements(sql) {
        debug!(file = %file.file_name, sql = %sql_preview(&statement), "Migration statement");
        q.execute_sql(&statement, &[])
            .await
            .map_err(|e| migration_error(file, e))?;
    }
    Ok(())
}

fn migration_error(file: &MigrationFile, source: AgentDbError) -> AgentDbError {
    AgentDbError::Migration {
        file: file.file_name.clone(),
        source: Box::new(source),
    }
}

/// [`Migrator::install`] with the configured directory and reset flag.
pub async fn install_db(db: &Database, cfg: &DatabaseConfig) -> Result<MigrationReport> {
    Migrator::from_config(db.clone(), cfg).install().await
}

pub async fn drop_db(db: &Database, cfg: &DatabaseConfig) -> Result<Vec<String>> {
    Migrator::from_config(db.clone(), cfg).drop_all().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_migration_names() {
        assert_eq!(
            parse_file_name("02.jobs.up.sql"),
            Some((2, "jobs", Direction::Up))
        );
        assert_eq!(
            parse_file_name("10.add_files.table.down.sql"),
            Some((10, "add_files.table", Direction::Down))
        );
    }

    #[test]
    fn rejects_malformed_names() {
        for name in [
            "jobs.up.sql",
            "-1.jobs.up.sql",
            "x2.jobs.up.sql",
            "02.jobs.sideways.sql",
            "02.up.sql",
            "02.jobs.up.txt",
        ] {
            assert_eq!(parse_file_name(name), None, "{name}");
        }
    }

    #[tokio::test]
    async fn discover_sorts_and_filters() {
        let dir = std::env::temp_dir().join(format!(
            "agentdb_discover_{}",
            std::process::id()
        ));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        for name in [
            "03.files.up.sql",
            "01.base.up.sql",
            "02.jobs.up.sql",
            "02.jobs.down.sql",
            "notes.sql",
        ] {
            tokio::fs::write(dir.join(name), "SELECT 1;").await.unwrap();
        }

        let up = discover(&dir, Direction::Up).await.unwrap();
        let names: Vec<_> = up.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, ["01.base.up.sql", "02.jobs.up.sql", "03.files.up.sql"]);
        let down = discover(&dir, Direction::Down).await.unwrap();
        assert_eq!(down.len(), 1);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
