use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;

use super::whitelist::{TableKind, IMPORT_ORDER};
use crate::artifact::ArtifactKind;
use crate::db::SequenceState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCounts {
    /// Source rows read and mapped.
    pub attempted: u64,
    /// Rows the target reported as inserted or updated.
    pub written: u64,
}

/// In-memory record of one import attempt. Never persisted.
#[derive(Debug)]
pub struct ImportJob {
    format: ArtifactKind,
    size_bytes: u64,
    started: Instant,
    tables: BTreeMap<TableKind, TableCounts>,
}

impl ImportJob {
    pub fn new(format: ArtifactKind, size_bytes: u64) -> Self {
        let tables = IMPORT_ORDER
            .into_iter()
            .map(|table| (table, TableCounts::default()))
            .collect();
        Self {
            format,
            size_bytes,
            started: Instant::now(),
            tables,
        }
    }

    pub fn record_attempt(&mut self, table: TableKind) {
        self.tables.entry(table).or_default().attempted += 1;
    }

    pub fn record_written(&mut self, table: TableKind, rows: u64) {
        self.tables.entry(table).or_default().written += rows;
    }

    pub fn counts(&self, table: TableKind) -> TableCounts {
        self.tables.get(&table).copied().unwrap_or_default()
    }

    pub fn tables(&self) -> &BTreeMap<TableKind, TableCounts> {
        &self.tables
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn finish(self, sequences: Vec<SequenceState>) -> ImportReport {
        let total_rows = self.tables.values().map(|counts| counts.attempted).sum();
        ImportReport {
            format: self.format,
            size_bytes: self.size_bytes,
            total_rows,
            elapsed_ms: self.elapsed_ms(),
            tables: self.tables,
            sequences,
        }
    }
}

/// Returned to the caller after a successful import.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub format: ArtifactKind,
    pub size_bytes: u64,
    pub total_rows: u64,
    pub elapsed_ms: u64,
    /// Empty for text dumps, which report no per-table counts.
    pub tables: BTreeMap<TableKind, TableCounts>,
    pub sequences: Vec<SequenceState>,
}
