use std::fmt;

use serde::Serialize;

/// The five persisted tables, in the order parents precede children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Stores,
    Users,
    Payments,
    CustomerOrders,
    AuditLogs,
}

pub const IMPORT_ORDER: [TableKind; 5] = [
    TableKind::Stores,
    TableKind::Users,
    TableKind::Payments,
    TableKind::CustomerOrders,
    TableKind::AuditLogs,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Text,
    Boolean,
    Timestamp,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: ColumnKind,
    /// Left untouched when an upsert hits an existing key.
    pub preserve_on_conflict: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Auto-increment integer with a sequence to reconcile.
    Synthetic,
    /// Application-supplied text key.
    Natural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Overwrite,
    Ignore,
}

#[derive(Debug)]
pub struct TableSchema {
    pub table: TableKind,
    pub key: &'static str,
    pub key_kind: KeyKind,
    pub conflict: ConflictPolicy,
    pub columns: &'static [ColumnSpec],
}

const fn col(name: &'static str, kind: ColumnKind) -> ColumnSpec {
    ColumnSpec {
        name,
        kind,
        preserve_on_conflict: false,
    }
}

const fn created(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        kind: ColumnKind::Timestamp,
        preserve_on_conflict: true,
    }
}

use ColumnKind::{Boolean, Integer, Json, Text, Timestamp};

static STORES: TableSchema = TableSchema {
    table: TableKind::Stores,
    key: "id",
    key_kind: KeyKind::Synthetic,
    conflict: ConflictPolicy::Overwrite,
    columns: &[
        col("id", Integer),
        col("name", Text),
        col("code", Text),
        col("address", Text),
        col("phone", Text),
        col("manager", Text),
        col("is_active", Boolean),
        created("created_at"),
    ],
};

static USERS: TableSchema = TableSchema {
    table: TableKind::Users,
    key: "id",
    key_kind: KeyKind::Synthetic,
    conflict: ConflictPolicy::Overwrite,
    columns: &[
        col("id", Integer),
        col("username", Text),
        col("password_hash", Text),
        col("role", Text),
        col("permissions", Json),
        col("store_id", Integer),
        col("accessible_stores", Json),
        col("is_active", Boolean),
        created("created_at"),
        col("updated_at", Timestamp),
    ],
};

static PAYMENTS: TableSchema = TableSchema {
    table: TableKind::Payments,
    key: "uuid",
    key_kind: KeyKind::Natural,
    conflict: ConflictPolicy::Overwrite,
    columns: &[
        col("uuid", Text),
        col("last_five", Text),
        col("paid_at", Timestamp),
        col("amount", Integer),
        col("note", Text),
        col("status", Text),
        col("store_id", Integer),
        col("payment_method", Text),
        col("processed_by", Text),
        created("created_at"),
    ],
};

static AUDIT_LOGS: TableSchema = TableSchema {
    table: TableKind::AuditLogs,
    key: "id",
    key_kind: KeyKind::Synthetic,
    conflict: ConflictPolicy::Ignore,
    columns: &[
        col("id", Integer),
        col("user_id", Integer),
        col("username", Text),
        col("action", Text),
        col("resource_type", Text),
        col("resource_id", Text),
        col("details", Text),
        col("ip_address", Text),
        col("user_agent", Text),
        created("created_at"),
    ],
};

static CUSTOMER_ORDERS: TableSchema = TableSchema {
    table: TableKind::CustomerOrders,
    key: "id",
    key_kind: KeyKind::Synthetic,
    conflict: ConflictPolicy::Overwrite,
    columns: &[
        col("id", Integer),
        col("order_date", Text),
        col("products", Text),
        col("customer_name", Text),
        col("customer_phone", Text),
        col("payment_status", Text),
        col("logistics", Text),
        col("remarks", Text),
        col("amount", Integer),
        col("status", Text),
        col("store_id", Integer),
        col("created_by", Text),
        created("created_at"),
        col("updated_at", Timestamp),
    ],
};

impl TableKind {
    pub fn name(self) -> &'static str {
        match self {
            TableKind::Stores => "stores",
            TableKind::Users => "users",
            TableKind::Payments => "payments",
            TableKind::CustomerOrders => "customer_orders",
            TableKind::AuditLogs => "audit_logs",
        }
    }

    /// Exact, case-sensitive lookup.
    pub fn from_name(name: &str) -> Option<Self> {
        IMPORT_ORDER.into_iter().find(|table| table.name() == name)
    }

    pub fn schema(self) -> &'static TableSchema {
        match self {
            TableKind::Stores => &STORES,
            TableKind::Users => &USERS,
            TableKind::Payments => &PAYMENTS,
            TableKind::CustomerOrders => &CUSTOMER_ORDERS,
            TableKind::AuditLogs => &AUDIT_LOGS,
        }
    }

    /// Position in [`IMPORT_ORDER`].
    pub fn rank(self) -> usize {
        IMPORT_ORDER
            .iter()
            .position(|table| *table == self)
            .unwrap_or(IMPORT_ORDER.len())
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TableSchema {
    pub fn name(&self) -> &'static str {
        self.table.name()
    }

    pub fn permits(&self, column: &str) -> bool {
        self.columns.iter().any(|spec| spec.name == column)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|spec| spec.name)
    }

    /// Columns rewritten by an overwrite upsert.
    pub fn updatable_columns(&self) -> impl Iterator<Item = &'static ColumnSpec> + '_ {
        let key = self.key;
        self.columns
            .iter()
            .filter(move |spec| spec.name != key && !spec.preserve_on_conflict)
    }

    pub fn has_sequence(&self) -> bool {
        self.key_kind == KeyKind::Synthetic
    }
}

/// Tables with an auto-increment key, in import order.
pub fn sequenced_tables() -> impl Iterator<Item = TableKind> {
    IMPORT_ORDER
        .into_iter()
        .filter(|table| table.schema().has_sequence())
}
