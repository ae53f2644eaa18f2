mod common;

use common::{PATH, eventually, wait_for_status};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use zk_datasource::db::{DbConnection, SqlxPool, SqlxPoolFactory};
use zk_datasource::store::MemoryConfigStore;
use zk_datasource::{ConnectionPool, DataSourceError, DataSourceOptions, DynamicDataSource};

/// Create a database file holding a single marker row.
async fn create_marked_db(path: &Path, marker: &str) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await.unwrap();
    sqlx::query("CREATE TABLE marker (name TEXT NOT NULL)")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO marker (name) VALUES (?)")
        .bind(marker)
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;
}

async fn read_marker(conn: &mut DbConnection) -> String {
    match conn {
        DbConnection::SQLite(conn) => sqlx::query_scalar::<_, String>("SELECT name FROM marker")
            .fetch_one(&mut **conn)
            .await
            .unwrap(),
        other => panic!("Expected SQLite connection, got {:?}", other.db_type()),
    }
}

fn jdbc_url(path: &Path) -> String {
    format!("jdbc:sqlite:{}", path.display())
}

struct Fixture {
    _dir: TempDir,
    store: Arc<MemoryConfigStore>,
    source: DynamicDataSource<SqlxPool>,
    db_b: String,
}

async fn setup() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db_a = dir.path().join("a.db");
    let db_b = dir.path().join("b.db");
    create_marked_db(&db_a, "a").await;
    create_marked_db(&db_b, "b").await;

    let store = Arc::new(MemoryConfigStore::with_entries(
        PATH,
        [
            ("driverClassName".to_string(), "org.sqlite.JDBC".to_string()),
            ("dbJDBCUrl".to_string(), jdbc_url(&db_a)),
            ("acquireTimeoutSecs".to_string(), "3".to_string()),
        ],
    ));
    let source = DynamicDataSource::connect(
        store.clone(),
        SqlxPoolFactory::new(),
        DataSourceOptions::new().with_config_path(PATH),
    )
    .await
    .unwrap();

    Fixture {
        _dir: dir,
        store,
        source,
        db_b: jdbc_url(&db_b),
    }
}

#[tokio::test]
async fn test_sqlite_url_change_switches_database() {
    let fixture = setup().await;
    let source = &fixture.source;

    let mut old_conn = source.get_connection().await.unwrap();
    assert_eq!(read_marker(&mut old_conn).await, "a");

    fixture.store.put(PATH, "dbJDBCUrl", fixture.db_b.clone());
    wait_for_status(source, |s| s.generation == 2).await;

    let mut new_conn = source.get_connection().await.unwrap();
    assert_eq!(read_marker(&mut new_conn).await, "b");

    // The connection checked out before the swap still works until released.
    assert_eq!(read_marker(&mut old_conn).await, "a");
    drop(old_conn);

    let published = source.current();
    assert!(!published.pool().status().closed);
    assert_eq!(published.pool().settings().url, fixture.db_b);
}

#[tokio::test]
async fn test_sqlite_retired_pool_is_closed() {
    let fixture = setup().await;
    let source = &fixture.source;
    let retired = source.current();

    fixture.store.put(PATH, "dbJDBCUrl", fixture.db_b.clone());
    wait_for_status(source, |s| s.generation == 2).await;

    eventually(|| retired.pool().status().closed).await;
    assert!(matches!(
        retired.pool().get_connection().await,
        Err(DataSourceError::PoolClosed)
    ));
    // The data source itself keeps serving from the new pool.
    let mut conn = source.get_connection().await.unwrap();
    assert_eq!(read_marker(&mut conn).await, "b");
}

#[tokio::test]
async fn test_sqlite_unopenable_database_keeps_old_pool() {
    let fixture = setup().await;
    let source = &fixture.source;

    let missing = fixture.db_b.replace("b.db", "missing/dir/c.db");
    fixture.store.put(PATH, "dbJDBCUrl", missing);
    let status = wait_for_status(source, |s| s.failures == 1).await;

    assert_eq!(status.generation, 1);
    assert!(status.is_stale());
    let mut conn = source.get_connection().await.unwrap();
    assert_eq!(read_marker(&mut conn).await, "a");
}
