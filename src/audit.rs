//! Audit events for backup and import attempts.
//!
//! The pipeline only emits events; storing and querying them belongs to the
//! audit subsystem behind the [`AuditSink`] it is given.

use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::error::PipelineError;

/// Authenticated administrator on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub username: String,
}

impl Actor {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }

    /// Actor for operations started from the command line.
    pub fn cli() -> Self {
        Self::new("cli")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    DatabaseBackup,
    DatabaseImport,
    BackupDownload,
    BackupDelete,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::DatabaseBackup => "database_backup",
            AuditAction::DatabaseImport => "database_import",
            AuditAction::BackupDownload => "backup_download",
            AuditAction::BackupDelete => "backup_delete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// Never carries file-system paths or credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub actor: String,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    pub bytes: Option<u64>,
    pub artifact: Option<String>,
    /// Sanitized client file name of an upload.
    pub original_name: Option<String>,
    pub error_code: Option<String>,
    pub at: String,
}

impl AuditEvent {
    pub fn success(actor: &Actor, action: AuditAction) -> Self {
        Self {
            actor: actor.username.clone(),
            action,
            outcome: AuditOutcome::Success,
            bytes: None,
            artifact: None,
            original_name: None,
            error_code: None,
            at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn failure(actor: &Actor, action: AuditAction, err: &PipelineError) -> Self {
        Self {
            outcome: AuditOutcome::Failure,
            error_code: Some(err.code().to_string()),
            ..Self::success(actor, action)
        }
    }

    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    pub fn with_original_name(mut self, name: impl Into<String>) -> Self {
        self.original_name = Some(name.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Writes each event as one structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        tracing::info!(
            target: "stoner_backup::audit",
            event = "audit",
            actor = %event.actor,
            action = event.action.as_str(),
            outcome = ?event.outcome,
            bytes = event.bytes,
            artifact = event.artifact.as_deref(),
            original_name = event.original_name.as_deref(),
            error_code = event.error_code.as_deref(),
            at = %event.at
        );
    }
}

/// Keeps events in memory for inspection.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_events_carry_the_error_code() {
        let actor = Actor::new("admin");
        let err = PipelineError::Busy;
        let event = AuditEvent::failure(&actor, AuditAction::DatabaseImport, &err)
            .with_original_name("stoner.db");
        assert_eq!(event.outcome, AuditOutcome::Failure);
        assert_eq!(event.error_code.as_deref(), Some("BACKUP/BUSY"));
        assert_eq!(event.actor, "admin");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "database_import");
        assert_eq!(json["originalName"], "stoner.db");
    }

    #[test]
    fn memory_sink_records_in_order() {
        let sink = MemoryAuditSink::new();
        let actor = Actor::cli();
        sink.emit(AuditEvent::success(&actor, AuditAction::DatabaseBackup).with_bytes(10));
        sink.emit(AuditEvent::success(&actor, AuditAction::BackupDelete));
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].bytes, Some(10));
        assert_eq!(events[1].action, AuditAction::BackupDelete);
    }
}
