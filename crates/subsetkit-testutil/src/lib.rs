//! Shared test fixtures for subsetkit: in-memory schema models plus scratch
//! SQLite databases seeded with the shapes described in spec §8's concrete
//! scenarios (1:N, self-reference, cycle).

use sqlx::sqlite::SqlitePool;
use sqlx::Executor;
use subsetkit_core::schema::types::*;

/// A small e-commerce schema: `users`, `categories` (self-referencing),
/// `products`, `orders`, `order_items`. Used for schema-model unit tests
/// (target sizing, pattern matching, completeness score) that don't need a
/// live database.
pub fn ecommerce_schema() -> DatabaseSchema {
    let mut schema = DatabaseSchema::new(DatabaseType::PostgreSQL, "test_ecommerce".to_string());

    let mut users = Table::new("users".to_string());
    let mut id = Column::new("id".to_string(), DataType::Serial, "serial".to_string());
    id.is_auto_increment = true;
    id.nullable = false;
    users.columns.insert("id".to_string(), id);
    let mut email = Column::new("email".to_string(), DataType::VarChar, "character varying".to_string());
    email.nullable = false;
    users.columns.insert("email".to_string(), email);
    users.primary_key = Some(PrimaryKey { columns: vec!["id".to_string()], name: Some("users_pkey".to_string()) });
    users.source_row_count = 1000;
    schema.tables.insert("users".to_string(), users);

    let mut categories = Table::new("categories".to_string());
    let mut cat_id = Column::new("id".to_string(), DataType::Serial, "serial".to_string());
    cat_id.is_auto_increment = true;
    cat_id.nullable = false;
    categories.columns.insert("id".to_string(), cat_id);
    let mut parent_id = Column::new("parent_id".to_string(), DataType::Integer, "integer".to_string());
    parent_id.nullable = true;
    categories.columns.insert("parent_id".to_string(), parent_id);
    categories.primary_key = Some(PrimaryKey { columns: vec!["id".to_string()], name: Some("categories_pkey".to_string()) });
    categories.foreign_keys.push(ForeignKey {
        name: Some("categories_parent_id_fkey".to_string()),
        source_columns: vec!["parent_id".to_string()],
        referred_schema: None,
        referenced_table: "categories".to_string(),
        referenced_columns: vec!["id".to_string()],
        on_delete: ForeignKeyAction::SetNull,
        on_update: ForeignKeyAction::NoAction,
        is_deferrable: false,
        is_logical: false,
    });
    categories.source_row_count = 50;
    schema.tables.insert("categories".to_string(), categories);

    let mut orders = Table::new("orders".to_string());
    let mut ord_id = Column::new("id".to_string(), DataType::Serial, "serial".to_string());
    ord_id.is_auto_increment = true;
    ord_id.nullable = false;
    orders.columns.insert("id".to_string(), ord_id);
    let mut ord_user_id = Column::new("user_id".to_string(), DataType::Integer, "integer".to_string());
    ord_user_id.nullable = false;
    orders.columns.insert("user_id".to_string(), ord_user_id);
    orders.primary_key = Some(PrimaryKey { columns: vec!["id".to_string()], name: Some("orders_pkey".to_string()) });
    orders.foreign_keys.push(ForeignKey {
        name: Some("orders_user_id_fkey".to_string()),
        source_columns: vec!["user_id".to_string()],
        referred_schema: None,
        referenced_table: "users".to_string(),
        referenced_columns: vec!["id".to_string()],
        on_delete: ForeignKeyAction::Cascade,
        on_update: ForeignKeyAction::NoAction,
        is_deferrable: false,
        is_logical: false,
    });
    orders.source_row_count = 5000;
    schema.tables.insert("orders".to_string(), orders);

    let mut order_items = Table::new("order_items".to_string());
    let mut oi_id = Column::new("id".to_string(), DataType::Serial, "serial".to_string());
    oi_id.is_auto_increment = true;
    oi_id.nullable = false;
    order_items.columns.insert("id".to_string(), oi_id);
    let mut oi_order_id = Column::new("order_id".to_string(), DataType::Integer, "integer".to_string());
    oi_order_id.nullable = false;
    order_items.columns.insert("order_id".to_string(), oi_order_id);
    order_items.primary_key = Some(PrimaryKey { columns: vec!["id".to_string()], name: Some("order_items_pkey".to_string()) });
    order_items.foreign_keys.push(ForeignKey {
        name: Some("order_items_order_id_fkey".to_string()),
        source_columns: vec!["order_id".to_string()],
        referred_schema: None,
        referenced_table: "orders".to_string(),
        referenced_columns: vec!["id".to_string()],
        on_delete: ForeignKeyAction::Cascade,
        on_update: ForeignKeyAction::NoAction,
        is_deferrable: false,
        is_logical: false,
    });
    order_items.source_row_count = 20000;
    schema.tables.insert("order_items".to_string(), order_items);

    schema
}

/// A schema with a two-table FK cycle (`a.b_id -> b`, `b.a_id -> a`),
/// both nullable, per spec §8 scenario 3.
pub fn circular_schema() -> DatabaseSchema {
    let mut schema = DatabaseSchema::new(DatabaseType::SQLite, "test_circular".to_string());

    let mut a = Table::new("a".to_string());
    let mut a_id = Column::new("id".to_string(), DataType::Integer, "integer".to_string());
    a_id.nullable = false;
    a.columns.insert("id".to_string(), a_id);
    let mut b_id = Column::new("b_id".to_string(), DataType::Integer, "integer".to_string());
    b_id.nullable = true;
    a.columns.insert("b_id".to_string(), b_id);
    a.primary_key = Some(PrimaryKey { columns: vec!["id".to_string()], name: None });
    a.foreign_keys.push(ForeignKey {
        name: Some("a_b_id_fkey".to_string()),
        source_columns: vec!["b_id".to_string()],
        referred_schema: None,
        referenced_table: "b".to_string(),
        referenced_columns: vec!["id".to_string()],
        on_delete: ForeignKeyAction::SetNull,
        on_update: ForeignKeyAction::NoAction,
        is_deferrable: false,
        is_logical: false,
    });
    a.source_row_count = 500;
    schema.tables.insert("a".to_string(), a);

    let mut b = Table::new("b".to_string());
    let mut b_id_col = Column::new("id".to_string(), DataType::Integer, "integer".to_string());
    b_id_col.nullable = false;
    b.columns.insert("id".to_string(), b_id_col);
    let mut a_id_col = Column::new("a_id".to_string(), DataType::Integer, "integer".to_string());
    a_id_col.nullable = true;
    b.columns.insert("a_id".to_string(), a_id_col);
    b.primary_key = Some(PrimaryKey { columns: vec!["id".to_string()], name: None });
    b.foreign_keys.push(ForeignKey {
        name: Some("b_a_id_fkey".to_string()),
        source_columns: vec!["a_id".to_string()],
        referred_schema: None,
        referenced_table: "a".to_string(),
        referenced_columns: vec!["id".to_string()],
        on_delete: ForeignKeyAction::SetNull,
        on_update: ForeignKeyAction::NoAction,
        is_deferrable: false,
        is_logical: false,
    });
    b.source_row_count = 500;
    schema.tables.insert("b".to_string(), b);

    schema
}

/// Open two independent in-memory SQLite pools (source, target) so the
/// copy engine's real coordinator/driver path can run without touching
/// disk. Each pool gets its own private in-memory database (SQLite's
/// `:memory:` is per-connection, so both sides use a single-connection
/// pool to keep schema/data visible across statements).
pub async fn memory_pool() -> SqlitePool {
    SqlitePool::connect("sqlite::memory:").await.expect("open in-memory sqlite")
}

/// Scenario 1 (spec §8): `parent(id)` with ids 1..=10; `child(id, parent_id)`
/// with `rows` rows uniformly referencing parents. Returns a pool with both
/// tables created and seeded.
pub async fn parent_child_fixture(rows: i64) -> SqlitePool {
    let pool = memory_pool().await;
    pool.execute(
        "CREATE TABLE parent (id INTEGER PRIMARY KEY, name TEXT);
         CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER NOT NULL, \
            FOREIGN KEY(parent_id) REFERENCES parent(id));",
    )
    .await
    .expect("create parent/child schema");

    for i in 1..=10i64 {
        sqlx::query("INSERT INTO parent (id, name) VALUES (?1, ?2)")
            .bind(i)
            .bind(format!("parent-{i}"))
            .execute(&pool)
            .await
            .unwrap();
    }
    for i in 1..=rows {
        let parent_id = (i % 10) + 1;
        sqlx::query("INSERT INTO child (id, parent_id) VALUES (?1, ?2)")
            .bind(i)
            .bind(parent_id)
            .execute(&pool)
            .await
            .unwrap();
    }
    pool
}

/// Scenario 2 (spec §8): `node(id, parent_id)` forming a tree of `count`
/// nodes, root nullable.
pub async fn self_reference_fixture(count: i64) -> SqlitePool {
    let pool = memory_pool().await;
    pool.execute(
        "CREATE TABLE node (id INTEGER PRIMARY KEY, parent_id INTEGER, \
            FOREIGN KEY(parent_id) REFERENCES node(id));",
    )
    .await
    .expect("create node schema");

    sqlx::query("INSERT INTO node (id, parent_id) VALUES (1, NULL)")
        .execute(&pool)
        .await
        .unwrap();
    for i in 2..=count {
        let parent_id = i / 2;
        sqlx::query("INSERT INTO node (id, parent_id) VALUES (?1, ?2)")
            .bind(i)
            .bind(parent_id)
            .execute(&pool)
            .await
            .unwrap();
    }
    pool
}

/// Scenario 3 (spec §8): `a(id, b_id) <-> b(id, a_id)`, both nullable, each
/// with `count` rows, `b_id`/`a_id` cycling through the other table.
pub async fn cycle_fixture(count: i64) -> SqlitePool {
    let pool = memory_pool().await;
    pool.execute(
        "CREATE TABLE a (id INTEGER PRIMARY KEY, b_id INTEGER REFERENCES b(id));
         CREATE TABLE b (id INTEGER PRIMARY KEY, a_id INTEGER REFERENCES a(id));",
    )
    .await
    .expect("create a/b schema");

    for i in 1..=count {
        sqlx::query("INSERT INTO a (id, b_id) VALUES (?1, NULL)").bind(i).execute(&pool).await.unwrap();
        sqlx::query("INSERT INTO b (id, a_id) VALUES (?1, NULL)").bind(i).execute(&pool).await.unwrap();
    }
    for i in 1..=count {
        let other = (i % count) + 1;
        sqlx::query("UPDATE a SET b_id = ?1 WHERE id = ?2").bind(other).bind(i).execute(&pool).await.unwrap();
        sqlx::query("UPDATE b SET a_id = ?1 WHERE id = ?2").bind(other).bind(i).execute(&pool).await.unwrap();
    }
    pool
}
