//! Text dump restore through `psql`.
//!
//! The dump is applied by the native tool with `ON_ERROR_STOP`, so the first
//! failing statement ends the run. Statements already applied are not rolled
//! back; the pipeline reports such failures as not safe to retry.

use std::path::Path;

use crate::artifact::ValidationError;
use crate::config::PipelineConfig;
use crate::db::StoreEngine;
use crate::error::PipelineError;
use crate::native::{run_tool, NativeToolError, ToolInvocation};

pub fn psql_invocation(
    config: &PipelineConfig,
    dump: &Path,
) -> Result<ToolInvocation, PipelineError> {
    if config.engine != StoreEngine::Postgres {
        return Err(ValidationError::EngineMismatch.into());
    }
    let params = config.postgres.checked()?;
    let mut args = params.connection_args();
    args.extend([
        "-f".to_string(),
        dump.to_string_lossy().into_owned(),
        "--quiet".to_string(),
        "--no-password".to_string(),
        "--set=ON_ERROR_STOP=1".to_string(),
    ]);
    Ok(ToolInvocation {
        tool: "psql",
        program: config.psql_bin.clone(),
        args,
        password: config.postgres.password.clone(),
        timeout: Some(config.restore_timeout),
    })
}

/// Apply a sniffed text dump to the PostgreSQL target, killing `psql` once
/// the restore timeout elapses. `label` stands in for the dump's path in
/// any diagnostics that reach the caller.
pub async fn restore_text_dump(
    config: &PipelineConfig,
    dump: &Path,
    label: &str,
) -> Result<u64, PipelineError> {
    let invocation = psql_invocation(config, dump)?;
    match run_tool(invocation).await.map_err(|err| err.redact_path(dump, label)) {
        Ok(output) => {
            let elapsed_ms = output.elapsed.as_millis() as u64;
            tracing::info!(target: "stoner_backup", event = "restore_finished", elapsed_ms);
            Ok(elapsed_ms)
        }
        Err(err) => {
            if let NativeToolError::Timeout { timeout_ms, .. } = &err {
                tracing::error!(
                    target: "stoner_backup",
                    event = "restore_timeout",
                    timeout_ms = *timeout_ms
                );
            }
            Err(err.into())
        }
    }
}
