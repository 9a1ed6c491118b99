#![cfg(all(feature = "test-utils", feature = "bb8", feature = "deadpool"))]

use sql_pooled::prelude::*;
use sql_pooled::test_utils::{MemoryBehavior, MemoryManager};

fn streaming_manager() -> MemoryManager {
    MemoryManager::new(MemoryBehavior {
        unbuffered: true,
        ..MemoryBehavior::default()
    })
}

#[tokio::test]
async fn bb8_connection_returns_after_cursor_drains() -> Result<(), SqlPoolError> {
    let manager = streaming_manager();
    let pool = bb8::Pool::builder()
        .max_size(1)
        .build(manager.clone())
        .await?;
    let db = DatabasePool::new(Bb8Pool::new(pool), PoolOptions::default());

    let mut cursor = db.query("SELECT 1").await?.into_cursor().expect("rows");
    assert_eq!(db.inner().inner().state().idle_connections, 0);

    cursor.fetch_all(FetchStyle::Assoc).await?;
    assert_eq!(db.inner().inner().state().idle_connections, 1);

    db.execute("UPDATE t SET x = 1", &[]).await?;
    assert_eq!(manager.connections_created(), 1);
    Ok(())
}

#[tokio::test]
async fn bb8_statements_and_transactions_reuse_the_connection() -> Result<(), SqlPoolError> {
    let manager = MemoryManager::new(MemoryBehavior::default());
    let pool = bb8::Pool::builder()
        .max_size(1)
        .build(manager.clone())
        .await?;
    let db = DatabasePool::new(Bb8Pool::new(pool), PoolOptions::default());

    let statement = db.prepare("DELETE FROM t").await?;
    statement.execute(&[]).await?;
    assert_eq!(statement.cached_connections().len(), 1);

    let mut tx = db.begin_transaction(IsolationLevel::Committed).await?;
    tx.execute("INSERT INTO t VALUES (1)", &[]).await?;
    tx.commit().await?;

    assert_eq!(db.inner().inner().state().idle_connections, 1);
    assert_eq!(manager.connections_created(), 1);
    Ok(())
}

#[tokio::test]
async fn bb8_adapter_refuses_checkouts_after_close() -> Result<(), SqlPoolError> {
    let pool = bb8::Pool::builder()
        .max_size(1)
        .build(MemoryManager::new(MemoryBehavior::default()))
        .await?;
    let db = DatabasePool::new(Bb8Pool::new(pool), PoolOptions::default());

    db.close().await;

    assert!(!db.is_alive());
    assert!(matches!(
        db.query("SELECT 1").await,
        Err(SqlPoolError::PoolError(_))
    ));
    Ok(())
}

#[tokio::test]
async fn deadpool_connection_returns_after_cursor_drains() -> Result<(), SqlPoolError> {
    let manager = streaming_manager();
    let pool = deadpool::managed::Pool::builder(manager.clone())
        .max_size(1)
        .build()
        .expect("deadpool pool");
    let db = DatabasePool::new(DeadpoolPool::new(pool), PoolOptions::default());

    let mut cursor = db.query("SELECT 1").await?.into_cursor().expect("rows");
    assert_eq!(db.inner().inner().status().available, 0);

    cursor.fetch_all(FetchStyle::Assoc).await?;
    assert_eq!(db.inner().inner().status().available, 1);

    let mut tx = db.begin_transaction(IsolationLevel::Serializable).await?;
    tx.rollback().await?;
    assert_eq!(manager.connections_created(), 1);
    Ok(())
}

#[tokio::test]
async fn deadpool_close_is_reported_as_pool_error() {
    let pool = deadpool::managed::Pool::builder(MemoryManager::new(MemoryBehavior::default()))
        .max_size(1)
        .build()
        .expect("deadpool pool");
    let db = DatabasePool::new(DeadpoolPool::new(pool), PoolOptions::default());

    db.close().await;

    assert!(!db.is_alive());
    assert!(matches!(
        db.execute("DELETE FROM t", &[]).await,
        Err(SqlPoolError::PoolError(_))
    ));
}
