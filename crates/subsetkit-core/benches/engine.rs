//! Benchmarks for the propagator — the core hot path (§4.4). Measures
//! throughput of `propagate()` over a batch of parent/child candidate rows
//! at increasing source table sizes.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use subsetkit_core::coordinator::CoordinatorConfig;
use subsetkit_core::event::EventBus;
use subsetkit_core::propagator::{CopyState, Propagator};
use subsetkit_core::schema::sqlite::SqliteDriver;
use subsetkit_core::Driver;
use subsetkit_testutil::{memory_pool, parent_child_fixture};

async fn target_pool() -> sqlx::SqlitePool {
    use sqlx::Executor;
    let pool = memory_pool().await;
    pool.execute(
        "CREATE TABLE parent (id INTEGER PRIMARY KEY, name TEXT);
         CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER NOT NULL);",
    )
    .await
    .expect("create target schema");
    pool
}

fn bench_propagate_batch(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("propagate_batch");

    for &rows in &[100i64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            b.iter_batched(
                || {
                    rt.block_on(async move {
                        let source_pool = parent_child_fixture(rows).await;
                        let target_pool = target_pool().await;
                        let source = SqliteDriver::new(source_pool);
                        let target = SqliteDriver::new(target_pool);
                        let schema = source.introspect(&[]).await.expect("introspect");
                        (source, target, schema)
                    })
                },
                |(source, target, mut schema)| {
                    rt.block_on(async {
                        for table in schema.tables.values_mut() {
                            table.selected = true;
                            table.target_row_count = table.source_row_count;
                        }
                        let events = EventBus::new();
                        let config = CoordinatorConfig::default();
                        let propagator = Propagator {
                            source: &source,
                            target: &target,
                            schema: &schema,
                            children_cap: config.children_cap,
                            flush_size: config.flush_size,
                            events: &events,
                        };
                        let mut state = CopyState::new();
                        let child_table = schema.tables.get("child").unwrap();
                        let candidates = source.sample(child_table, rows).await.expect("sample");
                        for row in candidates {
                            propagator
                                .propagate(&mut state, "child".to_string(), row, false, 3)
                                .await
                                .expect("propagate");
                        }
                        propagator.flush_all(&mut state).await.expect("flush");
                    })
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_propagate_batch);
criterion_main!(benches);
