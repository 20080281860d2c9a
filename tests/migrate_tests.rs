mod common;

use agentdb::db::{MigrationState, Migrator, Queryable, drop_db, install_db, params};
use agentdb::error::AgentDbError;
use agentdb::db::models::Node;
use agentdb::Value;
use common::TestDb;

#[tokio::test]
async fn install_bootstraps_and_records_only_incremental_files() {
    let t = TestDb::new("migrate_install").await;
    let migrator = t.migrator();
    assert_eq!(migrator.state().await.unwrap(), MigrationState::Unbootstrapped);

    let report = migrator.install().await.unwrap();
    assert!(report.bootstrapped);
    assert_eq!(report.base.as_deref(), Some("01.base.up.sql"));
    assert_eq!(report.applied, ["02.jobs.up.sql", "03.files.up.sql"]);

    let records = migrator.applied().await.unwrap();
    let numbers: Vec<_> = records.iter().map(|r| r.number).collect();
    assert_eq!(numbers, [2, 3]);
    assert!(records.iter().all(|r| r.applied_at.is_some()));
    assert!(records[0].id < records[1].id);
    assert_eq!(migrator.state().await.unwrap(), MigrationState::UpToDate);

    t.cleanup().await;
}

#[tokio::test]
async fn second_install_is_a_no_op() {
    let t = TestDb::installed("migrate_idempotent").await;

    let report = install_db(&t.db, &t.cfg).await.unwrap();
    assert!(!report.bootstrapped);
    assert!(report.applied.is_empty());
    assert_eq!(t.count("ra_migrations").await, 2);

    t.cleanup().await;
}

#[tokio::test]
async fn files_at_or_below_the_highest_version_are_never_applied() {
    let t = TestDb::installed("migrate_order").await;

    t.add_migration("02.late_extra.up.sql", "CREATE TABLE ra_late_extra (id INTEGER);")
        .await;
    t.add_migration("04.tags.up.sql", "CREATE TABLE ra_tags (id INTEGER PRIMARY KEY, label TEXT);")
        .await;
    assert_eq!(
        t.migrator().state().await.unwrap(),
        MigrationState::Bootstrapped
    );

    let report = t.migrator().install().await.unwrap();
    assert_eq!(report.applied, ["04.tags.up.sql"]);
    assert!(t.table_exists("ra_tags").await);
    assert!(!t.table_exists("ra_late_extra").await);
    assert_eq!(t.migrator().state().await.unwrap(), MigrationState::UpToDate);

    t.cleanup().await;
}

#[tokio::test]
async fn a_failing_file_rolls_back_the_whole_run() {
    let t = TestDb::installed("migrate_rollback").await;

    t.add_migration("04.tags.up.sql", "CREATE TABLE ra_tags (id INTEGER PRIMARY KEY);")
        .await;
    t.add_migration("05.broken.up.sql", "CREATE TABLE ra_broken (id INTEGER,;")
        .await;

    let err = t.migrator().install().await.unwrap_err();
    match err {
        AgentDbError::Migration { file, source } => {
            assert_eq!(file, "05.broken.up.sql");
            assert!(matches!(*source, AgentDbError::DatabaseError(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!t.table_exists("ra_tags").await);
    assert_eq!(t.count("ra_migrations").await, 2);

    t.cleanup().await;
}

#[tokio::test]
async fn unparsable_file_names_are_skipped() {
    let t = TestDb::new("migrate_skip").await;
    t.add_migration("notes.up.sql", "this is not sql").await;
    t.add_migration("x9.bogus.up.sql", "this is not sql either").await;

    let report = t.migrator().install().await.unwrap();
    assert_eq!(report.applied.len(), 2);

    t.cleanup().await;
}

#[tokio::test]
async fn drop_runs_down_files_from_highest_to_lowest() {
    let t = TestDb::installed("migrate_drop").await;

    let dropped = drop_db(&t.db, &t.cfg).await.unwrap();
    assert_eq!(
        dropped,
        ["03.files.down.sql", "02.jobs.down.sql", "01.base.down.sql"]
    );
    assert!(!t.table_exists("ra_nodes").await);
    assert_eq!(
        t.migrator().state().await.unwrap(),
        MigrationState::Unbootstrapped
    );

    let report = t.migrator().install().await.unwrap();
    assert!(report.bootstrapped);
    assert_eq!(report.applied.len(), 2);

    t.cleanup().await;
}

#[tokio::test]
async fn reset_drops_existing_data_before_installing() {
    let t = TestDb::installed("migrate_reset").await;
    t.db
        .insert(&mut Node::default(), &Node::new("edge node", "edge-01"))
        .await
        .unwrap();
    assert_eq!(t.count("ra_nodes").await, 1);

    let report = t.migrator().with_reset(true).install().await.unwrap();
    assert!(report.bootstrapped);
    assert_eq!(t.count("ra_nodes").await, 0);
    assert_eq!(t.count("ra_migrations").await, 2);

    t.cleanup().await;
}

#[tokio::test]
async fn missing_base_migration_is_fatal() {
    let t = TestDb::new("migrate_empty").await;
    let empty = t.sqlite_dir().with_file_name("empty_root");
    tokio::fs::create_dir_all(empty.join("sqlite")).await.unwrap();

    let err = Migrator::new(t.db.clone(), &empty).install().await.unwrap_err();
    assert!(matches!(err, AgentDbError::MissingBaseMigration(_)));
    assert!(!t.table_exists("ra_migrations").await);

    tokio::fs::remove_dir_all(&empty).await.unwrap();
    t.cleanup().await;
}

#[tokio::test]
async fn query_on_missing_tracking_table_is_classified() {
    let t = TestDb::new("migrate_classify").await;
    let err = t
        .db
        .query("SELECT * FROM ra_migrations", &params([]))
        .await
        .unwrap_err();
    let AgentDbError::DatabaseError(db_err) = err else {
        panic!("expected a database error");
    };
    assert_eq!(
        t.db.dialect().classify(&db_err),
        agentdb::db::ErrorClass::RelationNotFound
    );

    t.cleanup().await;
}

#[tokio::test]
async fn drop_on_a_never_installed_database_succeeds() {
    let t = TestDb::new("migrate_drop_fresh").await;

    let dropped = drop_db(&t.db, &t.cfg).await.unwrap();
    assert_eq!(dropped.len(), 3);
    assert_eq!(
        t.migrator().state().await.unwrap(),
        MigrationState::Unbootstrapped
    );

    t.cleanup().await;
}

#[tokio::test]
async fn scripts_keep_semicolons_inside_literals_comments_and_triggers() {
    let t = TestDb::installed("migrate_script_text").await;
    t.add_migration(
        "04.seed.up.sql",
        "-- tags; used by jobs\n\
         CREATE TABLE ra_tags (id INTEGER PRIMARY KEY, label TEXT NOT NULL);\n\
         CREATE TRIGGER ra_tags_mark AFTER INSERT ON ra_tags BEGIN\n\
           UPDATE ra_tags SET label = label || '!' WHERE id = NEW.id;\n\
         END;\n\
         /* seed; one row */\n\
         INSERT INTO ra_tags (label) VALUES ('a;b');\n",
    )
    .await;

    let report = t.migrator().install().await.unwrap();
    assert_eq!(report.applied, ["04.seed.up.sql"]);
    let row = t
        .db
        .query_row("SELECT label FROM ra_tags", &params([]))
        .await
        .unwrap();
    assert_eq!(row[0], Value::from("a;b!"));

    t.cleanup().await;
}
