#![allow(dead_code)]

use agentdb::config::DatabaseConfig;
use agentdb::db::{Database, Migrator, Queryable, params};
use agentdb::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::fs;

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_suffix(prefix: &str) -> String {
    let mut hasher = DefaultHasher::new();
    SystemTime::now().hash(&mut hasher);
    std::process::id().hash(&mut hasher);
    COUNTER.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
    prefix.hash(&mut hasher);
    format!("{prefix}_{}", hasher.finish())
}

/// A throw-away SQLite database with its own copy of the shipped migrations.
pub struct TestDb {
    pub cfg: DatabaseConfig,
    pub db: Database,
    db_path: PathBuf,
    migrations_root: PathBuf,
}

impl TestDb {
    pub async fn new(prefix: &str) -> Self {
        let tmp_dir = std::env::temp_dir();
        let name = unique_suffix(prefix);
        let db_path = tmp_dir.join(format!("{name}.sqlite"));
        let migrations_root = tmp_dir.join(format!("{name}_migrations"));

        let source = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations/sqlite");
        let target = migrations_root.join("sqlite");
        fs::create_dir_all(&target).await.unwrap();
        let mut entries = fs::read_dir(&source).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            fs::copy(entry.path(), target.join(entry.file_name()))
                .await
                .unwrap();
        }

        let cfg = DatabaseConfig {
            migrations_dir: migrations_root.clone(),
            ..DatabaseConfig::sqlite(&db_path)
        };
        let db = Database::connect(&cfg).await.unwrap();
        Self {
            cfg,
            db,
            db_path,
            migrations_root,
        }
    }

    /// Connected and fully migrated.
    pub async fn installed(prefix: &str) -> Self {
        let test_db = Self::new(prefix).await;
        test_db.migrator().install().await.unwrap();
        test_db
    }

    pub fn migrator(&self) -> Migrator {
        Migrator::from_config(self.db.clone(), &self.cfg)
    }

    pub fn sqlite_dir(&self) -> PathBuf {
        self.migrations_root.join("sqlite")
    }

    pub async fn add_migration(&self, file_name: &str, sql: &str) {
        fs::write(self.sqlite_dir().join(file_name), sql)
            .await
            .unwrap();
    }

    pub async fn count(&self, table: &str) -> i64 {
        let row = self
            .db
            .query_row(&format!("SELECT COUNT(*) AS n FROM {table}"), &params([]))
            .await
            .unwrap();
        row[0].as_int().unwrap()
    }

    pub async fn table_exists(&self, table: &str) -> bool {
        let row = self
            .db
            .query_row(
                "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = :name",
                &params([("name", Value::from(table))]),
            )
            .await
            .unwrap();
        row[0].as_int() == Some(1)
    }

    pub async fn cleanup(self) {
        self.db.close().await;
        let wal_path = PathBuf::from(format!("{}-wal", self.db_path.to_string_lossy()));
        let shm_path = PathBuf::from(format!("{}-shm", self.db_path.to_string_lossy()));
        let _ = fs::remove_file(&wal_path).await;
        let _ = fs::remove_file(&shm_path).await;
        let _ = fs::remove_file(&self.db_path).await;
        let _ = fs::remove_dir_all(&self.migrations_root).await;
    }
}
