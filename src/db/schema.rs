use super::{StoreEngine, TargetStore};

const POSTGRES_TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS stores (
        id SERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        code TEXT NOT NULL UNIQUE,
        address TEXT,
        phone TEXT,
        manager TEXT,
        is_active BOOLEAN DEFAULT true,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )"#,
    r#"CREATE TABLE IF NOT EXISTS users (
        id SERIAL PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'user',
        permissions JSONB DEFAULT '[]'::jsonb,
        store_id INTEGER REFERENCES stores(id),
        accessible_stores JSONB DEFAULT '[]'::jsonb,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        is_active BOOLEAN DEFAULT true
    )"#,
    r#"CREATE TABLE IF NOT EXISTS payments (
        uuid TEXT PRIMARY KEY,
        paid_at TIMESTAMP NOT NULL,
        payment_method TEXT NOT NULL,
        last_five TEXT,
        amount INTEGER NOT NULL,
        note TEXT,
        status TEXT NOT NULL DEFAULT '已入帳',
        store_id INTEGER REFERENCES stores(id),
        processed_by TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )"#,
    r#"CREATE TABLE IF NOT EXISTS audit_logs (
        id SERIAL PRIMARY KEY,
        user_id INTEGER,
        username TEXT NOT NULL,
        action TEXT NOT NULL,
        resource_type TEXT NOT NULL,
        resource_id TEXT,
        details TEXT,
        ip_address TEXT,
        user_agent TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )"#,
    r#"CREATE TABLE IF NOT EXISTS customer_orders (
        id SERIAL PRIMARY KEY,
        order_date TEXT NOT NULL,
        products TEXT NOT NULL,
        customer_name TEXT NOT NULL,
        customer_phone TEXT NOT NULL,
        payment_status TEXT NOT NULL DEFAULT '未付款',
        logistics TEXT,
        remarks TEXT,
        amount INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT '進行中',
        store_id INTEGER REFERENCES stores(id),
        created_by TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )"#,
];

const SQLITE_TABLES: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS stores (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        code TEXT NOT NULL UNIQUE,
        address TEXT,
        phone TEXT,
        manager TEXT,
        is_active BOOLEAN DEFAULT 1,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )"#,
    r#"CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        role TEXT NOT NULL DEFAULT 'user',
        permissions TEXT DEFAULT '[]',
        store_id INTEGER REFERENCES stores(id),
        accessible_stores TEXT DEFAULT '[]',
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        is_active BOOLEAN DEFAULT 1
    )"#,
    r#"CREATE TABLE IF NOT EXISTS payments (
        uuid TEXT PRIMARY KEY,
        paid_at TIMESTAMP NOT NULL,
        payment_method TEXT NOT NULL,
        last_five TEXT,
        amount INTEGER NOT NULL,
        note TEXT,
        status TEXT NOT NULL DEFAULT '已入帳',
        store_id INTEGER REFERENCES stores(id),
        processed_by TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )"#,
    r#"CREATE TABLE IF NOT EXISTS audit_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER,
        username TEXT NOT NULL,
        action TEXT NOT NULL,
        resource_type TEXT NOT NULL,
        resource_id TEXT,
        details TEXT,
        ip_address TEXT,
        user_agent TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )"#,
    r#"CREATE TABLE IF NOT EXISTS customer_orders (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        order_date TEXT NOT NULL,
        products TEXT NOT NULL,
        customer_name TEXT NOT NULL,
        customer_phone TEXT NOT NULL,
        payment_status TEXT NOT NULL DEFAULT '未付款',
        logistics TEXT,
        remarks TEXT,
        amount INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL DEFAULT '進行中',
        store_id INTEGER REFERENCES stores(id),
        created_by TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )"#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_stores_code ON stores(code)",
    "CREATE INDEX IF NOT EXISTS idx_stores_is_active ON stores(is_active)",
    "CREATE INDEX IF NOT EXISTS idx_users_username ON users(username)",
    "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
    "CREATE INDEX IF NOT EXISTS idx_users_store_id ON users(store_id)",
    "CREATE INDEX IF NOT EXISTS idx_users_is_active ON users(is_active)",
    "CREATE INDEX IF NOT EXISTS idx_payments_paid_at ON payments(paid_at)",
    "CREATE INDEX IF NOT EXISTS idx_payments_store_id ON payments(store_id)",
    "CREATE INDEX IF NOT EXISTS idx_payments_status ON payments(status)",
    "CREATE INDEX IF NOT EXISTS idx_payments_created_at ON payments(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_payments_store_paid_at ON payments(store_id, paid_at)",
    "CREATE INDEX IF NOT EXISTS idx_audit_logs_user_id ON audit_logs(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_audit_logs_created_at ON audit_logs(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_audit_logs_action ON audit_logs(action)",
    "CREATE INDEX IF NOT EXISTS idx_customer_orders_store_id ON customer_orders(store_id)",
    "CREATE INDEX IF NOT EXISTS idx_customer_orders_status ON customer_orders(status)",
    "CREATE INDEX IF NOT EXISTS idx_customer_orders_created_at ON customer_orders(created_at)",
];

/// Create the five persisted tables and their indexes if absent.
pub async fn ensure_target_schema(store: &TargetStore) -> Result<(), sqlx::Error> {
    let tables = match store.engine() {
        StoreEngine::Postgres => POSTGRES_TABLES,
        StoreEngine::Sqlite => SQLITE_TABLES,
    };
    let mut tx = store.pool().begin().await?;
    for ddl in tables.iter().chain(INDEXES) {
        sqlx::query(ddl).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    tracing::info!(
        target: "stoner_backup",
        event = "target_schema_ready",
        engine = store.engine().slug()
    );
    Ok(())
}
