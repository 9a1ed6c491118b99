#![cfg(feature = "test-utils")]

use std::time::Duration;

use sql_pooled::prelude::*;
use sql_pooled::test_utils::{MemoryBehavior, MemoryPool};
use tokio::task::yield_now;
use tokio::time::advance;

fn manual_sweep(pool: &MemoryPool, max_idle_secs: u64) -> DatabasePool<MemoryPool> {
    let options = PoolOptions::builder()
        .statement_max_idle_time(max_idle_secs)
        .statement_sweep_interval(0.0)
        .finish();
    DatabasePool::new(pool.clone(), options)
}

async fn let_background_run() {
    for _ in 0..10 {
        yield_now().await;
    }
}

#[tokio::test]
async fn same_connection_reuses_the_prepared_handle() -> Result<(), SqlPoolError> {
    let pool = MemoryPool::new(1);
    let db = manual_sweep(&pool, 60);
    let statement = db.prepare("SELECT * FROM t WHERE id = ?").await?;

    for id in 0..3 {
        let rows = statement
            .execute(&[RowValues::Int(id)])
            .await?
            .into_cursor()
            .expect("rows")
            .fetch_all(FetchStyle::Assoc)
            .await?;
        assert_eq!(rows.len(), 3);
    }

    assert_eq!(pool.prepares(), 1);
    assert_eq!(pool.executions(), 3);
    assert_eq!(statement.cached_connections().len(), 1);
    assert_eq!(pool.outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn other_connection_gets_its_own_handle() -> Result<(), SqlPoolError> {
    let pool = MemoryPool::new(2);
    let db = manual_sweep(&pool, 60);
    let statement = db.prepare("UPDATE t SET x = 1").await?;
    let first = statement.cached_connections();

    let busy = pool.acquire().await?;
    assert_eq!(vec![busy.connection_id()], first);
    statement.execute(&[]).await?;
    pool.release(busy);

    let cached = statement.cached_connections();
    assert_eq!(cached.len(), 2);
    assert!(cached.contains(&first[0]));
    assert_eq!(pool.prepares(), 2);

    let handles = pool.statements();
    assert_eq!(handles.len(), 2);
    assert_ne!(handles[0].connection(), handles[1].connection());
    Ok(())
}

#[tokio::test]
async fn dead_handle_is_replaced_on_lookup() -> Result<(), SqlPoolError> {
    let pool = MemoryPool::new(1);
    let db = manual_sweep(&pool, 60);
    let statement = db.prepare("DELETE FROM t").await?;
    let connection = statement.cached_connections()[0];

    pool.kill_statements_on(connection);
    statement.execute(&[]).await?;

    assert_eq!(pool.prepares(), 2);
    assert_eq!(statement.cached_connections(), vec![connection]);
    assert_eq!(pool.executions(), 1);
    Ok(())
}

#[tokio::test]
async fn prepare_failure_returns_connection() -> Result<(), SqlPoolError> {
    let pool = MemoryPool::new(1);
    let db = manual_sweep(&pool, 60);

    let err = db.prepare("SELECT FAIL").await.expect_err("cannot prepare");
    assert_eq!(err.query(), Some("SELECT FAIL"));
    assert_eq!(pool.outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn failed_execution_returns_connection_before_reporting() -> Result<(), SqlPoolError> {
    let pool = MemoryPool::new(1);
    let db = manual_sweep(&pool, 60);
    let statement = db.prepare("UPDATE t SET state = 'LOST'").await?;

    let err = statement.execute(&[]).await.expect_err("connection lost");
    assert!(err.is_connection_error());
    assert!(err.to_string().contains("UPDATE t SET state = 'LOST'"));
    assert_eq!(pool.outstanding(), 0);
    assert_eq!(pool.acquired_total(), pool.released_total());

    // The handle is still alive, so the next call reuses it on the same connection.
    let err = statement.execute(&[]).await.expect_err("still lost");
    assert!(err.is_connection_error());
    assert_eq!(pool.prepares(), 1);
    assert_eq!(pool.outstanding(), 0);
    Ok(())
}

#[tokio::test]
async fn failed_reprepare_returns_connection() -> Result<(), SqlPoolError> {
    let pool = MemoryPool::new(1);
    let db = manual_sweep(&pool, 60);
    let statement = db.prepare("DELETE FROM t").await?;
    let connection = statement.cached_connections()[0];

    pool.kill_statements_on(connection);
    pool.configure(|behavior| behavior.fail_prepare = true);

    let err = statement.execute(&[]).await.expect_err("cannot prepare");
    assert!(matches!(err, SqlPoolError::QueryError { .. }));
    assert_eq!(err.query(), Some("DELETE FROM t"));
    assert_eq!(pool.outstanding(), 0);
    assert!(statement.cached_connections().is_empty());

    pool.configure(|behavior| behavior.fail_prepare = false);
    statement.execute(&[]).await?;
    assert_eq!(statement.cached_connections(), vec![connection]);
    assert_eq!(pool.outstanding(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn sweep_evicts_only_entries_idle_past_threshold() -> Result<(), SqlPoolError> {
    let pool = MemoryPool::new(1);
    let db = manual_sweep(&pool, 60);
    let statement = db.prepare("DELETE FROM t").await?;

    advance(Duration::from_secs(59)).await;
    statement.execute(&[]).await?;
    advance(Duration::from_secs(1)).await;
    assert_eq!(statement.sweep_now(), 0);
    assert_eq!(statement.cached_connections().len(), 1);

    advance(Duration::from_secs(61)).await;
    assert_eq!(statement.sweep_now(), 1);
    let_background_run().await;

    assert!(statement.cached_connections().is_empty());
    assert!(statement.last_used_at().is_none());
    assert_eq!(pool.statements_closed(), 1);

    statement.execute(&[]).await?;
    assert_eq!(pool.prepares(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn zero_idle_threshold_keeps_idle_handles() -> Result<(), SqlPoolError> {
    let pool = MemoryPool::new(1);
    let db = manual_sweep(&pool, 0);
    let statement = db.prepare("DELETE FROM t").await?;

    advance(Duration::from_secs(3600)).await;
    assert_eq!(statement.sweep_now(), 0);

    pool.kill_statements_on(statement.cached_connections()[0]);
    assert_eq!(statement.sweep_now(), 1);
    assert_eq!(pool.statements_closed(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn background_sweep_closes_idle_handles() -> Result<(), SqlPoolError> {
    let pool = MemoryPool::new(1);
    let db = DatabasePool::new(pool.clone(), PoolOptions::default());
    let statement = db.prepare("SELECT * FROM t").await?;
    assert_eq!(statement.sweep_interval(), Duration::from_secs(5));

    advance(Duration::from_secs(30)).await;
    let_background_run().await;
    assert_eq!(statement.cached_connections().len(), 1);

    advance(Duration::from_secs(31)).await;
    let_background_run().await;
    assert!(statement.cached_connections().is_empty());
    assert_eq!(pool.statements_closed(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn close_errors_during_eviction_are_swallowed() -> Result<(), SqlPoolError> {
    let pool = MemoryPool::with_behavior(
        1,
        MemoryBehavior {
            fail_close: true,
            ..MemoryBehavior::default()
        },
    );
    let db = manual_sweep(&pool, 10);
    let statement = db.prepare("DELETE FROM t").await?;

    advance(Duration::from_secs(11)).await;
    assert_eq!(statement.sweep_now(), 1);
    let_background_run().await;

    assert_eq!(pool.statements_closed(), 1);
    statement.execute(&[]).await?;
    assert_eq!(statement.cached_connections().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn threshold_and_interval_can_change_after_prepare() -> Result<(), SqlPoolError> {
    let pool = MemoryPool::new(1);
    let db = DatabasePool::new(pool.clone(), PoolOptions::default());
    let mut statement = db.prepare("DELETE FROM t").await?;

    statement.set_sweep_interval(Duration::ZERO);
    advance(Duration::from_secs(600)).await;
    let_background_run().await;
    assert_eq!(statement.cached_connections().len(), 1);

    statement.set_max_idle_time(Duration::from_secs(1000));
    assert_eq!(statement.max_idle_time(), Duration::from_secs(1000));
    statement.set_sweep_interval(Duration::from_secs(1));
    advance(Duration::from_secs(2)).await;
    let_background_run().await;
    assert_eq!(statement.cached_connections().len(), 1);

    statement.set_max_idle_time(Duration::from_secs(100));
    advance(Duration::from_secs(2)).await;
    let_background_run().await;
    assert!(statement.cached_connections().is_empty());
    Ok(())
}
