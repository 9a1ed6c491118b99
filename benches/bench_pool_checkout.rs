//! Criterion benchmark for the pooled proxies over the in-memory driver.
//!
//! Each iteration fans a batch of calls out across workers sharing a small pool, so the
//! numbers reflect checkout, release bookkeeping, and statement affinity lookups rather
//! than any database work.

use std::hint::black_box;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use sql_pooled::prelude::*;
use sql_pooled::test_utils::{MemoryBehavior, MemoryPool};
use tokio::runtime::Runtime;
use tokio::task::JoinSet;

static TOKIO_RUNTIME: LazyLock<Runtime> =
    LazyLock::new(|| Runtime::new().expect("create tokio runtime"));

// Number of concurrent workers to launch per iteration.
static BENCH_CONCURRENCY: LazyLock<usize> = LazyLock::new(|| {
    std::env::var("BENCH_CONCURRENCY")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8_usize)
        .max(1)
});

const CALLS_PER_WORKER: usize = 64;
const POOL_SIZE: usize = 4;

fn memory_database(unbuffered: bool) -> DatabasePool<MemoryPool> {
    let pool = MemoryPool::with_behavior(
        POOL_SIZE,
        MemoryBehavior {
            unbuffered,
            rows_per_select: 1,
            ..MemoryBehavior::default()
        },
    );
    DatabasePool::new(pool, PoolOptions::default())
}

async fn parallel_execute(
    db: &Arc<DatabasePool<MemoryPool>>,
    concurrency: usize,
) -> Result<(), SqlPoolError> {
    let mut join_set = JoinSet::new();
    for _ in 0..concurrency {
        let db = Arc::clone(db);
        join_set.spawn(async move {
            for _ in 0..CALLS_PER_WORKER {
                black_box(db.execute("UPDATE t SET x = 1", &[]).await?);
            }
            Ok::<(), SqlPoolError>(())
        });
    }
    while let Some(outcome) = join_set.join_next().await {
        outcome.expect("execute worker panicked")?;
    }
    Ok(())
}

async fn parallel_streaming_select(
    db: &Arc<DatabasePool<MemoryPool>>,
    concurrency: usize,
) -> Result<(), SqlPoolError> {
    let mut join_set = JoinSet::new();
    for _ in 0..concurrency {
        let db = Arc::clone(db);
        join_set.spawn(async move {
            for _ in 0..CALLS_PER_WORKER {
                if let Some(mut cursor) = db.query("SELECT id FROM t").await?.into_cursor() {
                    black_box(cursor.fetch_all(FetchStyle::Assoc).await?);
                }
            }
            Ok::<(), SqlPoolError>(())
        });
    }
    while let Some(outcome) = join_set.join_next().await {
        outcome.expect("select worker panicked")?;
    }
    Ok(())
}

async fn parallel_prepared(
    statement: &Arc<StatementPool<MemoryPool>>,
    concurrency: usize,
) -> Result<(), SqlPoolError> {
    let mut join_set = JoinSet::new();
    for worker in 0..concurrency {
        let statement = Arc::clone(statement);
        join_set.spawn(async move {
            let params = [RowValues::Int(i64::try_from(worker).unwrap_or_default())];
            for _ in 0..CALLS_PER_WORKER {
                black_box(statement.execute(&params).await?);
            }
            Ok::<(), SqlPoolError>(())
        });
    }
    while let Some(outcome) = join_set.join_next().await {
        outcome.expect("prepared worker panicked")?;
    }
    Ok(())
}

fn benchmark_execute(group: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>) {
    let runtime = &*TOKIO_RUNTIME;
    let concurrency = *BENCH_CONCURRENCY;
    let db = Arc::new(memory_database(false));

    group.bench_function(BenchmarkId::new("execute_command", concurrency), |b| {
        let db = Arc::clone(&db);
        b.to_async(runtime).iter_custom(move |iters| {
            let db = Arc::clone(&db);
            async move {
                let mut total = Duration::default();
                for _ in 0..iters {
                    let start = Instant::now();
                    parallel_execute(&db, concurrency)
                        .await
                        .expect("parallel execute");
                    total += start.elapsed();
                }
                total
            }
        });
    });
}

fn benchmark_streaming_select(
    group: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>,
) {
    let runtime = &*TOKIO_RUNTIME;
    let concurrency = *BENCH_CONCURRENCY;
    let db = Arc::new(memory_database(true));

    group.bench_function(BenchmarkId::new("streaming_select", concurrency), |b| {
        let db = Arc::clone(&db);
        b.to_async(runtime).iter_custom(move |iters| {
            let db = Arc::clone(&db);
            async move {
                let mut total = Duration::default();
                for _ in 0..iters {
                    let start = Instant::now();
                    parallel_streaming_select(&db, concurrency)
                        .await
                        .expect("parallel streaming select");
                    total += start.elapsed();
                }
                total
            }
        });
    });
}

fn benchmark_prepared(group: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>) {
    let runtime = &*TOKIO_RUNTIME;
    let concurrency = *BENCH_CONCURRENCY;
    let db = memory_database(false);
    let statement = Arc::new(
        runtime
            .block_on(db.prepare("UPDATE t SET x = ?"))
            .expect("prepare statement"),
    );

    group.bench_function(BenchmarkId::new("prepared_affinity", concurrency), |b| {
        let statement = Arc::clone(&statement);
        b.to_async(runtime).iter_custom(move |iters| {
            let statement = Arc::clone(&statement);
            async move {
                let mut total = Duration::default();
                for _ in 0..iters {
                    let start = Instant::now();
                    parallel_prepared(&statement, concurrency)
                        .await
                        .expect("parallel prepared execute");
                    total += start.elapsed();
                }
                total
            }
        });
    });
}

fn pool_checkout(c: &mut Criterion) {
    let calls = (*BENCH_CONCURRENCY * CALLS_PER_WORKER) as u64;

    let mut group = c.benchmark_group("pool_checkout");
    group.throughput(Throughput::Elements(calls));

    benchmark_execute(&mut group);
    benchmark_streaming_select(&mut group);
    benchmark_prepared(&mut group);

    group.finish();
}

criterion_group!(benches, pool_checkout);
criterion_main!(benches);
