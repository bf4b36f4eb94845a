use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::config::PipelineConfig;
use crate::db::TargetStore;
use crate::error::PipelineError;

/// Everything a pipeline operation needs, passed explicitly to each call.
#[derive(Clone)]
pub struct PipelineContext {
    pub store: TargetStore,
    pub config: Arc<PipelineConfig>,
    pub audit: Arc<dyn AuditSink>,
    busy: Arc<AtomicBool>,
}

impl PipelineContext {
    pub fn new(store: TargetStore, config: PipelineConfig) -> Self {
        Self::with_audit(store, config, Arc::new(TracingAuditSink))
    }

    pub fn with_audit(store: TargetStore, config: PipelineConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            store,
            config: Arc::new(config),
            audit,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Claim the store for one export or import. Fails with `Busy` while
    /// another operation holds it.
    pub fn begin_operation(&self) -> Result<OperationGuard, PipelineError> {
        OperationGuard::begin(self.busy.clone())
    }
}

pub struct OperationGuard {
    flag: Arc<AtomicBool>,
}

impl OperationGuard {
    fn begin(flag: Arc<AtomicBool>) -> Result<Self, PipelineError> {
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(target: "stoner_backup", event = "operation_busy");
            return Err(PipelineError::Busy);
        }
        Ok(Self { flag })
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
