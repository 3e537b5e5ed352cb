//! End-to-end coverage of the full copy engine against in-memory SQLite
//! pairs, exercising spec §8's three concrete scenarios plus forced rows,
//! full-table priority, and idempotence — all without a live server.

use std::sync::atomic::AtomicBool;

use sqlx::Executor;

use subsetkit_core::coordinator::{Coordinator, CoordinatorConfig, ForceDirective};
use subsetkit_core::event::EventBus;
use subsetkit_core::propagator::{CopyState, Propagator};
use subsetkit_core::schema::introspect::{build_schema_model, ModelOptions};
use subsetkit_core::schema::sqlite::SqliteDriver;
use subsetkit_core::value::Value;

use subsetkit_testutil::{cycle_fixture, memory_pool, parent_child_fixture, self_reference_fixture};

async fn empty_target(ddl: &str) -> sqlx::SqlitePool {
    let pool = memory_pool().await;
    pool.execute(ddl).await.expect("create target schema");
    pool
}

fn parent_child_ddl() -> &'static str {
    "CREATE TABLE parent (id INTEGER PRIMARY KEY, name TEXT);
     CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER NOT NULL, \
        FOREIGN KEY(parent_id) REFERENCES parent(id));"
}

fn node_ddl() -> &'static str {
    "CREATE TABLE node (id INTEGER PRIMARY KEY, parent_id INTEGER, \
        FOREIGN KEY(parent_id) REFERENCES node(id));"
}

fn cycle_ddl() -> &'static str {
    "CREATE TABLE a (id INTEGER PRIMARY KEY, b_id INTEGER REFERENCES b(id));
     CREATE TABLE b (id INTEGER PRIMARY KEY, a_id INTEGER REFERENCES a(id));"
}

/// Scenario 1 (§8): `parent(id)` 1..=10, `child` 1:N referencing them.
/// Every copied child must have its parent present, and the target must
/// stay under the full source size.
#[tokio::test]
async fn scenario_one_to_many_closes_over_parents() {
    let source_pool = parent_child_fixture(1000).await;
    let target_pool = empty_target(parent_child_ddl()).await;

    let source = SqliteDriver::new(source_pool);
    let target = SqliteDriver::new(target_pool.clone());

    let opts = ModelOptions {
        fraction: 0.1,
        ..Default::default()
    };
    let schema = build_schema_model(&source, &opts).await.unwrap();

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
    let coordinator = Coordinator::new(&schema, propagator, config);
    let interrupted = AtomicBool::new(false);
    let mut state = CopyState::new();
    let summary = coordinator.run(&mut state, &[], &[], &interrupted).await.unwrap();

    let child_summary = summary.tables.iter().find(|t| t.table == "child").unwrap();
    assert!(child_summary.copied > 0, "should have copied some child rows");
    assert!(child_summary.copied <= 1000, "must not exceed source size");

    // Every copied child's parent_id must exist in the target's parent table.
    let orphans: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM child c WHERE NOT EXISTS (SELECT 1 FROM parent p WHERE p.id = c.parent_id)",
    )
    .fetch_one(&target_pool)
    .await
    .unwrap();
    assert_eq!(orphans, 0, "no orphaned child rows in target");
}

/// Scenario 2 (§8): a self-referencing tree. Every copied node whose
/// `parent_id` is non-null must have that parent present in the target too.
#[tokio::test]
async fn scenario_self_reference_closes_transitively() {
    let source_pool = self_reference_fixture(500).await;
    let target_pool = empty_target(node_ddl()).await;

    let source = SqliteDriver::new(source_pool);
    let target = SqliteDriver::new(target_pool.clone());

    let opts = ModelOptions {
        fraction: 0.2,
        ..Default::default()
    };
    let schema = build_schema_model(&source, &opts).await.unwrap();

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
    let coordinator = Coordinator::new(&schema, propagator, config);
    let interrupted = AtomicBool::new(false);
    let mut state = CopyState::new();
    coordinator.run(&mut state, &[], &[], &interrupted).await.unwrap();

    let orphans: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM node n WHERE n.parent_id IS NOT NULL \
            AND NOT EXISTS (SELECT 1 FROM node p WHERE p.id = n.parent_id)",
    )
    .fetch_one(&target_pool)
    .await
    .unwrap();
    assert_eq!(orphans, 0, "every non-root node's parent must also be copied");
}

/// Scenario 3 (§8): a two-table FK cycle. The run must terminate (P8) and
/// every non-null cross-reference must resolve inside the target.
#[tokio::test]
async fn scenario_cycle_terminates_and_stays_consistent() {
    let source_pool = cycle_fixture(200).await;
    let target_pool = empty_target(cycle_ddl()).await;

    let source = SqliteDriver::new(source_pool);
    let target = SqliteDriver::new(target_pool.clone());

    let opts = ModelOptions {
        fraction: 0.3,
        ..Default::default()
    };
    let schema = build_schema_model(&source, &opts).await.unwrap();

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
    let coordinator = Coordinator::new(&schema, propagator, config);
    let interrupted = AtomicBool::new(false);
    let mut state = CopyState::new();
    // Termination alone is the primary assertion here: a cyclic schema with
    // a broken budget guarantee would hang this test indefinitely.
    let summary = coordinator.run(&mut state, &[], &[], &interrupted).await.unwrap();
    assert!(summary.tables.iter().any(|t| t.copied > 0));

    let bad_a: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM a WHERE b_id IS NOT NULL AND NOT EXISTS (SELECT 1 FROM b WHERE b.id = a.b_id)",
    )
    .fetch_one(&target_pool)
    .await
    .unwrap();
    let bad_b: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM b WHERE a_id IS NOT NULL AND NOT EXISTS (SELECT 1 FROM a WHERE a.id = b.a_id)",
    )
    .fetch_one(&target_pool)
    .await
    .unwrap();
    assert_eq!(bad_a, 0);
    assert_eq!(bad_b, 0);
}

/// `--force=TABLE:PK` pulls a specific row and its parent closure in
/// regardless of random sampling, even at fraction values that would
/// otherwise likely miss it.
#[tokio::test]
async fn forced_row_is_always_present() {
    let source_pool = parent_child_fixture(1000).await;
    let target_pool = empty_target(parent_child_ddl()).await;

    let source = SqliteDriver::new(source_pool);
    let target = SqliteDriver::new(target_pool.clone());

    let opts = ModelOptions {
        fraction: 0.01,
        ..Default::default()
    };
    let schema = build_schema_model(&source, &opts).await.unwrap();

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
    let coordinator = Coordinator::new(&schema, propagator, config);
    let interrupted = AtomicBool::new(false);
    let mut state = CopyState::new();
    let forced = vec![ForceDirective {
        table: "child".to_string(),
        pk: Value::Int(777),
    }];
    coordinator.run(&mut state, &forced, &[], &interrupted).await.unwrap();

    let present: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM child WHERE id = 777")
        .fetch_one(&target_pool)
        .await
        .unwrap();
    assert_eq!(present, 1, "forced row must be present regardless of sampling fraction");
}

/// `--force` for a table's primary key that doesn't exist in the source is
/// a fatal, named error rather than a silent no-op (§7).
#[tokio::test]
async fn forced_row_missing_from_source_is_an_error() {
    let source_pool = parent_child_fixture(50).await;
    let target_pool = empty_target(parent_child_ddl()).await;

    let source = SqliteDriver::new(source_pool);
    let target = SqliteDriver::new(target_pool.clone());

    let opts = ModelOptions {
        fraction: 0.1,
        ..Default::default()
    };
    let schema = build_schema_model(&source, &opts).await.unwrap();

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
    let coordinator = Coordinator::new(&schema, propagator, config);
    let interrupted = AtomicBool::new(false);
    let mut state = CopyState::new();
    let forced = vec![ForceDirective {
        table: "child".to_string(),
        pk: Value::Int(999_999),
    }];
    let result = coordinator.run(&mut state, &forced, &[], &interrupted).await;
    assert!(matches!(result, Err(subsetkit_core::SubsetError::ForcedRowNotFound { .. })));
}

/// `--full-table=parent` copies every parent row, ignoring `fraction`.
#[tokio::test]
async fn full_table_copies_everything() {
    let source_pool = parent_child_fixture(100).await;
    let target_pool = empty_target(parent_child_ddl()).await;

    let source = SqliteDriver::new(source_pool);
    let target = SqliteDriver::new(target_pool.clone());

    let opts = ModelOptions {
        fraction: 0.05,
        full_tables: vec!["parent".to_string()],
        ..Default::default()
    };
    let schema = build_schema_model(&source, &opts).await.unwrap();

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
    let coordinator = Coordinator::new(&schema, propagator, config);
    let interrupted = AtomicBool::new(false);
    let mut state = CopyState::new();
    let summary = coordinator
        .run(&mut state, &[], &["parent".to_string()], &interrupted)
        .await
        .unwrap();

    let parent_summary = summary.tables.iter().find(|t| t.table == "parent").unwrap();
    assert_eq!(parent_summary.copied, 10, "all 10 parent rows must be copied");
}

/// Running the engine twice against the same (re-created) empty target
/// with the same seed data and forced rows reaches the same forced-row
/// membership both times (P9 idempotence of forced inclusion).
#[tokio::test]
async fn repeated_runs_forced_membership_is_idempotent() {
    let forced = vec![ForceDirective {
        table: "child".to_string(),
        pk: Value::Int(5),
    }];

    for _ in 0..2 {
        let source_pool = parent_child_fixture(200).await;
        let target_pool = empty_target(parent_child_ddl()).await;
        let source = SqliteDriver::new(source_pool);
        let target = SqliteDriver::new(target_pool.clone());

        let opts = ModelOptions {
            fraction: 0.05,
            ..Default::default()
        };
        let schema = build_schema_model(&source, &opts).await.unwrap();
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
        let coordinator = Coordinator::new(&schema, propagator, config);
        let interrupted = AtomicBool::new(false);
        let mut state = CopyState::new();
        coordinator.run(&mut state, &forced, &[], &interrupted).await.unwrap();

        let present: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM child WHERE id = 5")
            .fetch_one(&target_pool)
            .await
            .unwrap();
        assert_eq!(present, 1);
    }
}

/// Scenario 4 (§8): forcing a row pulls its *entire* descendant set in,
/// exempt from `--children`, bounded only by the depth budget. A parent
/// with ~100 children under a `children_cap` of 1 must still bring all of
/// them in when the parent itself is forced.
#[tokio::test]
async fn forced_row_descendants_are_exempt_from_children_cap() {
    let source_pool = parent_child_fixture(1000).await;
    let target_pool = empty_target(parent_child_ddl()).await;

    let source_children: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM child WHERE parent_id = 1")
        .fetch_one(&source_pool)
        .await
        .unwrap();

    let source = SqliteDriver::new(source_pool);
    let target = SqliteDriver::new(target_pool.clone());

    let opts = ModelOptions {
        fraction: 0.01,
        ..Default::default()
    };
    let schema = build_schema_model(&source, &opts).await.unwrap();

    let events = EventBus::new();
    let children_cap = 1;
    let config = CoordinatorConfig {
        children_cap,
        ..CoordinatorConfig::default()
    };
    let propagator = Propagator {
        source: &source,
        target: &target,
        schema: &schema,
        children_cap: config.children_cap,
        flush_size: config.flush_size,
        events: &events,
    };
    let coordinator = Coordinator::new(&schema, propagator, config);
    let interrupted = AtomicBool::new(false);
    let mut state = CopyState::new();
    let forced = vec![ForceDirective {
        table: "parent".to_string(),
        pk: Value::Int(1),
    }];
    coordinator.run(&mut state, &forced, &[], &interrupted).await.unwrap();

    let copied_children: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM child WHERE parent_id = 1")
        .fetch_one(&target_pool)
        .await
        .unwrap();
    assert!(source_children > children_cap, "fixture must actually exceed the cap to be a meaningful test");
    assert_eq!(
        copied_children, source_children,
        "a forced parent's full child set must be copied despite a low --children cap"
    );
}
