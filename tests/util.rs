#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{params, Connection};
use stoner_backup::db::ensure_target_schema;
use stoner_backup::{MemoryAuditSink, PipelineConfig, PipelineContext, TargetStore};

/// Source-side DDL as the application's own SQLite databases define it.
pub const SOURCE_SCHEMA: &str = r#"
CREATE TABLE stores (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    code TEXT NOT NULL UNIQUE,
    address TEXT,
    phone TEXT,
    manager TEXT,
    is_active BOOLEAN DEFAULT 1,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'user',
    permissions TEXT DEFAULT '[]',
    store_id INTEGER,
    accessible_stores TEXT DEFAULT '[]',
    is_active BOOLEAN DEFAULT 1,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE payments (
    uuid TEXT PRIMARY KEY,
    last_five TEXT,
    paid_at DATETIME,
    amount INTEGER,
    note TEXT,
    status TEXT,
    store_id INTEGER,
    payment_method TEXT,
    processed_by TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE customer_orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_date TEXT NOT NULL,
    products TEXT NOT NULL,
    customer_name TEXT NOT NULL,
    customer_phone TEXT NOT NULL,
    payment_status TEXT,
    logistics TEXT,
    remarks TEXT,
    amount INTEGER DEFAULT 0,
    status TEXT,
    store_id INTEGER,
    created_by TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE audit_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER,
    username TEXT NOT NULL,
    action TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id TEXT,
    details TEXT,
    ip_address TEXT,
    user_agent TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Row counts written by [`seed_source`].
pub const SEEDED_STORES: i64 = 5;
pub const SEEDED_USERS: i64 = 10;
pub const SEEDED_PAYMENTS: i64 = 20;
pub const SEEDED_ORDERS: i64 = 10;
pub const SEEDED_AUDIT_LOGS: i64 = 5;
/// Customer order ids start here so the reconciled cursor is visibly ahead.
pub const FIRST_ORDER_ID: i64 = 100;

pub struct Harness {
    pub root: tempfile::TempDir,
    pub ctx: PipelineContext,
    pub audit: Arc<MemoryAuditSink>,
}

impl Harness {
    pub fn config(&self) -> &PipelineConfig {
        &self.ctx.config
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }
}

/// A SQLite target with the application schema, under a fresh temp root.
pub async fn sqlite_harness() -> Harness {
    let root = tempfile::tempdir().expect("tempdir");
    let config = PipelineConfig::sqlite(&root.path().join("target.sqlite3"), root.path());
    harness_with(root, config).await
}

pub async fn harness_with(root: tempfile::TempDir, config: PipelineConfig) -> Harness {
    let store = TargetStore::connect(&config).await.expect("connect target");
    ensure_target_schema(&store).await.expect("target schema");
    let audit = Arc::new(MemoryAuditSink::new());
    let ctx = PipelineContext::with_audit(store, config, audit.clone());
    Harness { root, ctx, audit }
}

pub fn create_source(path: &Path) -> Connection {
    let conn = Connection::open(path).expect("open source");
    conn.execute_batch(SOURCE_SCHEMA).expect("source schema");
    conn
}

/// Fifty rows across all five tables, parents before children.
pub fn seed_source(conn: &Connection) {
    for i in 1..=SEEDED_STORES {
        conn.execute(
            "INSERT INTO stores (id, name, code, address, is_active, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, '2024-01-0' || ?1 || ' 09:00:00')",
            params![i, format!("Store {i}"), format!("S{i:03}"), "Taipei", i % 2],
        )
        .unwrap();
    }
    for i in 1..=SEEDED_USERS {
        conn.execute(
            "INSERT INTO users (id, username, password_hash, role, permissions, store_id, \
             accessible_stores, is_active) VALUES (?1, ?2, 'hash', ?3, '[\"payments\"]', ?4, ?5, 1)",
            params![
                i,
                format!("user{i}"),
                if i == 1 { "admin" } else { "user" },
                (i % SEEDED_STORES) + 1,
                format!("[{}]", (i % SEEDED_STORES) + 1),
            ],
        )
        .unwrap();
    }
    for i in 1..=SEEDED_PAYMENTS {
        conn.execute(
            "INSERT INTO payments (uuid, last_five, paid_at, amount, status, store_id, \
             payment_method, processed_by) VALUES (?1, ?2, ?3, ?4, '已入帳', ?5, 'transfer', 'user1')",
            params![
                format!("pay-{i:04}"),
                format!("{:05}", i * 7),
                format!("2024-05-{:02} 10:30:00", (i % 28) + 1),
                i * 100,
                (i % SEEDED_STORES) + 1,
            ],
        )
        .unwrap();
    }
    for i in 0..SEEDED_ORDERS {
        conn.execute(
            "INSERT INTO customer_orders (id, order_date, products, customer_name, \
             customer_phone, amount, store_id, created_by) \
             VALUES (?1, '2024-06-01', 'Tea x2', ?2, '0912345678', ?3, 1, 'user2')",
            params![FIRST_ORDER_ID + i, format!("Customer {i}"), 250 + i],
        )
        .unwrap();
    }
    for i in 1..=SEEDED_AUDIT_LOGS {
        conn.execute(
            "INSERT INTO audit_logs (id, user_id, username, action, resource_type, details) \
             VALUES (?1, 1, 'user1', 'create', 'payment', 'seed')",
            params![i],
        )
        .unwrap();
    }
}

/// A seeded source database at `root/<name>`.
pub fn seeded_source(root: &Path, name: &str) -> PathBuf {
    let path = root.join(name);
    let conn = create_source(&path);
    seed_source(&conn);
    drop(conn);
    path
}

pub fn files_in(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = std::fs::metadata(path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).expect("chmod script");
}
