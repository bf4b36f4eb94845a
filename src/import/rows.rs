//! Typed records for the whitelisted tables.
//!
//! Source rows are untyped; each table gets an explicit field mapping that
//! reads exactly its whitelisted columns, applies the defaults the target
//! schema expects and yields bind values in schema column order.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

use super::source::{SourceRow, SourceValue};
use super::whitelist::TableKind;

pub const DEFAULT_ROLE: &str = "user";
pub const DEFAULT_PAYMENT_STATUS: &str = "已入帳";
pub const DEFAULT_ORDER_PAYMENT_STATUS: &str = "未付款";
pub const DEFAULT_ORDER_STATUS: &str = "進行中";
const EMPTY_JSON_ARRAY: &str = "[]";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
/// Epoch values above this are treated as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 10_000_000_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowError {
    #[error("missing required value for column {column}")]
    Missing { column: &'static str },
    #[error("invalid value for column {column}: {reason}")]
    Invalid { column: &'static str, reason: String },
}

/// A parameter ready to be bound; the variant fixes the SQL type even for NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindValue {
    Int(Option<i64>),
    Text(Option<String>),
    Bool(Option<bool>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRow {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub manager: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub permissions: String,
    pub store_id: Option<i64>,
    pub accessible_stores: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRow {
    pub uuid: String,
    pub last_five: Option<String>,
    pub paid_at: String,
    pub amount: i64,
    pub note: Option<String>,
    pub status: String,
    pub store_id: Option<i64>,
    pub payment_method: String,
    pub processed_by: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLogRow {
    pub id: i64,
    pub user_id: Option<i64>,
    pub username: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerOrderRow {
    pub id: i64,
    pub order_date: String,
    pub products: String,
    pub customer_name: String,
    pub customer_phone: String,
    pub payment_status: String,
    pub logistics: Option<String>,
    pub remarks: Option<String>,
    pub amount: i64,
    pub status: String,
    pub store_id: Option<i64>,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableRecord {
    Store(StoreRow),
    User(UserRow),
    Payment(PaymentRow),
    AuditLog(AuditLogRow),
    CustomerOrder(CustomerOrderRow),
}

impl TableRecord {
    /// Map one source row. `imported_at` fills absent creation and update
    /// timestamps.
    pub fn from_source(
        table: TableKind,
        row: &SourceRow,
        imported_at: &str,
    ) -> Result<Self, RowError> {
        let f = Fields { row, imported_at };
        let record = match table {
            TableKind::Stores => TableRecord::Store(StoreRow {
                id: f.required_int("id")?,
                name: f.required_text("name")?,
                code: f.required_text("code")?,
                address: f.text("address")?,
                phone: f.text("phone")?,
                manager: f.text("manager")?,
                is_active: f.boolean("is_active")?,
                created_at: f.timestamp_or_now("created_at")?,
            }),
            TableKind::Users => TableRecord::User(UserRow {
                id: f.required_int("id")?,
                username: f.required_text("username")?,
                password_hash: f.required_text("password_hash")?,
                role: f.text_or("role", DEFAULT_ROLE)?,
                permissions: f.json_array("permissions")?,
                store_id: f.int("store_id")?,
                accessible_stores: f.json_array("accessible_stores")?,
                is_active: f.boolean("is_active")?,
                created_at: f.timestamp_or_now("created_at")?,
                updated_at: f.timestamp_or_now("updated_at")?,
            }),
            TableKind::Payments => TableRecord::Payment(PaymentRow {
                uuid: f.required_text("uuid")?,
                last_five: f.text("last_five")?,
                paid_at: f
                    .timestamp("paid_at")?
                    .ok_or(RowError::Missing { column: "paid_at" })?,
                amount: f.int("amount")?.unwrap_or(0),
                note: f.text("note")?,
                status: f.text_or("status", DEFAULT_PAYMENT_STATUS)?,
                store_id: f.int("store_id")?,
                payment_method: f.required_text("payment_method")?,
                processed_by: f.text("processed_by")?,
                created_at: f.timestamp_or_now("created_at")?,
            }),
            TableKind::AuditLogs => TableRecord::AuditLog(AuditLogRow {
                id: f.required_int("id")?,
                user_id: f.int("user_id")?,
                username: f.required_text("username")?,
                action: f.required_text("action")?,
                resource_type: f.required_text("resource_type")?,
                resource_id: f.text("resource_id")?,
                details: f.text("details")?,
                ip_address: f.text("ip_address")?,
                user_agent: f.text("user_agent")?,
                created_at: f.timestamp_or_now("created_at")?,
            }),
            TableKind::CustomerOrders => TableRecord::CustomerOrder(CustomerOrderRow {
                id: f.required_int("id")?,
                order_date: f.required_text("order_date")?,
                products: f.required_text("products")?,
                customer_name: f.required_text("customer_name")?,
                customer_phone: f.required_text("customer_phone")?,
                payment_status: f.text_or("payment_status", DEFAULT_ORDER_PAYMENT_STATUS)?,
                logistics: f.text("logistics")?,
                remarks: f.text("remarks")?,
                amount: f.int("amount")?.unwrap_or(0),
                status: f.text_or("status", DEFAULT_ORDER_STATUS)?,
                store_id: f.int("store_id")?,
                created_by: f.text("created_by")?,
                created_at: f.timestamp_or_now("created_at")?,
                updated_at: f.timestamp_or_now("updated_at")?,
            }),
        };
        Ok(record)
    }

    pub fn table(&self) -> TableKind {
        match self {
            TableRecord::Store(_) => TableKind::Stores,
            TableRecord::User(_) => TableKind::Users,
            TableRecord::Payment(_) => TableKind::Payments,
            TableRecord::AuditLog(_) => TableKind::AuditLogs,
            TableRecord::CustomerOrder(_) => TableKind::CustomerOrders,
        }
    }

    /// Bind values in the column order of the table's whitelist schema.
    pub fn into_values(self) -> Vec<BindValue> {
        use BindValue::{Bool, Int, Text};
        match self {
            TableRecord::Store(r) => vec![
                Int(Some(r.id)),
                Text(Some(r.name)),
                Text(Some(r.code)),
                Text(r.address),
                Text(r.phone),
                Text(r.manager),
                Bool(Some(r.is_active)),
                Text(Some(r.created_at)),
            ],
            TableRecord::User(r) => vec![
                Int(Some(r.id)),
                Text(Some(r.username)),
                Text(Some(r.password_hash)),
                Text(Some(r.role)),
                Text(Some(r.permissions)),
                Int(r.store_id),
                Text(Some(r.accessible_stores)),
                Bool(Some(r.is_active)),
                Text(Some(r.created_at)),
                Text(Some(r.updated_at)),
            ],
            TableRecord::Payment(r) => vec![
                Text(Some(r.uuid)),
                Text(r.last_five),
                Text(Some(r.paid_at)),
                Int(Some(r.amount)),
                Text(r.note),
                Text(Some(r.status)),
                Int(r.store_id),
                Text(Some(r.payment_method)),
                Text(r.processed_by),
                Text(Some(r.created_at)),
            ],
            TableRecord::AuditLog(r) => vec![
                Int(Some(r.id)),
                Int(r.user_id),
                Text(Some(r.username)),
                Text(Some(r.action)),
                Text(Some(r.resource_type)),
                Text(r.resource_id),
                Text(r.details),
                Text(r.ip_address),
                Text(r.user_agent),
                Text(Some(r.created_at)),
            ],
            TableRecord::CustomerOrder(r) => vec![
                Int(Some(r.id)),
                Text(Some(r.order_date)),
                Text(Some(r.products)),
                Text(Some(r.customer_name)),
                Text(Some(r.customer_phone)),
                Text(Some(r.payment_status)),
                Text(r.logistics),
                Text(r.remarks),
                Int(Some(r.amount)),
                Text(Some(r.status)),
                Int(r.store_id),
                Text(r.created_by),
                Text(Some(r.created_at)),
                Text(Some(r.updated_at)),
            ],
        }
    }
}

/// Render a timestamp the way both target engines accept it.
pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

struct Fields<'a> {
    row: &'a SourceRow,
    imported_at: &'a str,
}

impl Fields<'_> {
    fn value(&self, column: &'static str) -> &SourceValue {
        self.row.get(column)
    }

    fn int(&self, column: &'static str) -> Result<Option<i64>, RowError> {
        let invalid = |reason: String| RowError::Invalid { column, reason };
        match self.value(column) {
            SourceValue::Null => Ok(None),
            SourceValue::Integer(v) => Ok(Some(*v)),
            SourceValue::Real(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
                Ok(Some(*v as i64))
            }
            SourceValue::Real(v) => Err(invalid(format!("{v} is not a whole number"))),
            SourceValue::Text(s) if s.trim().is_empty() => Ok(None),
            SourceValue::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| invalid(format!("{s:?} is not an integer"))),
            SourceValue::Blob(_) => Err(invalid("binary data where an integer is expected".into())),
        }
    }

    fn required_int(&self, column: &'static str) -> Result<i64, RowError> {
        self.int(column)?.ok_or(RowError::Missing { column })
    }

    fn text(&self, column: &'static str) -> Result<Option<String>, RowError> {
        match self.value(column) {
            SourceValue::Null => Ok(None),
            SourceValue::Text(s) => Ok(Some(s.clone())),
            SourceValue::Integer(v) => Ok(Some(v.to_string())),
            SourceValue::Real(v) => Ok(Some(v.to_string())),
            SourceValue::Blob(bytes) => String::from_utf8(bytes.clone())
                .map(Some)
                .map_err(|_| RowError::Invalid {
                    column,
                    reason: "binary data is not valid UTF-8".into(),
                }),
        }
    }

    fn required_text(&self, column: &'static str) -> Result<String, RowError> {
        self.text(column)?.ok_or(RowError::Missing { column })
    }

    fn text_or(&self, column: &'static str, default: &str) -> Result<String, RowError> {
        Ok(self
            .text(column)?
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| default.to_string()))
    }

    fn boolean(&self, column: &'static str) -> Result<bool, RowError> {
        match self.value(column) {
            SourceValue::Null => Ok(false),
            SourceValue::Integer(v) => Ok(*v != 0),
            SourceValue::Real(v) => Ok(*v != 0.0),
            SourceValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "t" | "yes" | "y" => Ok(true),
                "0" | "false" | "f" | "no" | "n" | "" => Ok(false),
                _ => Err(RowError::Invalid {
                    column,
                    reason: format!("{s:?} is not a boolean"),
                }),
            },
            SourceValue::Blob(_) => Err(RowError::Invalid {
                column,
                reason: "binary data where a boolean is expected".into(),
            }),
        }
    }

    /// JSON array text; absent values become `[]`.
    fn json_array(&self, column: &'static str) -> Result<String, RowError> {
        let Some(raw) = self.text(column)? else {
            return Ok(EMPTY_JSON_ARRAY.to_string());
        };
        if raw.trim().is_empty() {
            return Ok(EMPTY_JSON_ARRAY.to_string());
        }
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(serde_json::Value::Array(_)) => Ok(raw),
            Ok(serde_json::Value::Null) => Ok(EMPTY_JSON_ARRAY.to_string()),
            Ok(other) => Err(RowError::Invalid {
                column,
                reason: format!("expected a JSON array, found {}", json_kind(&other)),
            }),
            Err(err) => Err(RowError::Invalid {
                column,
                reason: format!("malformed JSON: {err}"),
            }),
        }
    }

    fn timestamp(&self, column: &'static str) -> Result<Option<String>, RowError> {
        parse_timestamp(self.value(column))
            .map(|parsed| parsed.as_ref().map(format_timestamp))
            .map_err(|reason| RowError::Invalid { column, reason })
    }

    fn timestamp_or_now(&self, column: &'static str) -> Result<String, RowError> {
        Ok(self
            .timestamp(column)?
            .unwrap_or_else(|| self.imported_at.to_string()))
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

fn from_epoch(value: i64) -> Result<NaiveDateTime, String> {
    let parsed = if value.unsigned_abs() > EPOCH_MILLIS_THRESHOLD.unsigned_abs() {
        DateTime::<Utc>::from_timestamp_millis(value)
    } else {
        DateTime::<Utc>::from_timestamp(value, 0)
    };
    parsed
        .map(|dt| dt.naive_utc())
        .ok_or_else(|| format!("epoch value {value} is out of range"))
}

/// Accepts RFC 3339, SQLite `CURRENT_TIMESTAMP` text, bare dates and epoch
/// seconds or milliseconds.
fn parse_timestamp(value: &SourceValue) -> Result<Option<NaiveDateTime>, String> {
    const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];

    match value {
        SourceValue::Null => Ok(None),
        SourceValue::Integer(v) => from_epoch(*v).map(Some),
        SourceValue::Real(v) => {
            let whole = v.trunc();
            if !whole.is_finite() || whole < i64::MIN as f64 || whole >= i64::MAX as f64 {
                return Err(format!("epoch value {v} is out of range"));
            }
            from_epoch(whole as i64).map(Some)
        }
        SourceValue::Blob(_) => Err("binary data where a timestamp is expected".into()),
        SourceValue::Text(raw) => {
            let s = raw.trim();
            if s.is_empty() {
                return Ok(None);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(Some(dt.with_timezone(&Utc).naive_utc()));
            }
            for format in NAIVE_FORMATS {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
                    return Ok(Some(dt));
                }
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                    return Ok(Some(dt));
                }
            }
            if let Ok(epoch) = s.parse::<i64>() {
                return from_epoch(epoch).map(Some);
            }
            Err(format!("{s:?} is not a recognized timestamp"))
        }
    }
}
