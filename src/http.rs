//! HTTP routes under `/backup`.
//!
//! Authentication happens upstream; the authenticated administrator arrives
//! in the `x-authenticated-user` header.

use std::net::SocketAddr;

use axum::async_trait;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::artifact::{sanitize_display_name, StagedUpload, StagingWriter, ValidationError};
use crate::audit::Actor;
use crate::error::{AppError, PipelineError};
use crate::pipeline;
use crate::state::PipelineContext;

pub const ACTOR_HEADER: &str = "x-authenticated-user";
pub const UPLOAD_FIELD: &str = "database";
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;
const DOWNLOAD_CHUNK_BYTES: usize = 64 * 1024;
const MAX_ACTOR_CHARS: usize = 128;

#[derive(Debug)]
pub enum ApiError {
    Unauthenticated,
    Pipeline(PipelineError),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Pipeline(err)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Pipeline(err) => match err {
                PipelineError::Validation(_)
                | PipelineError::Format(_)
                | PipelineError::Schema(_) => StatusCode::BAD_REQUEST,
                PipelineError::NotFound => StatusCode::NOT_FOUND,
                PipelineError::Busy => StatusCode::CONFLICT,
                PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                PipelineError::Subprocess { .. }
                | PipelineError::Transaction(_)
                | PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: AppError,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = match self {
            ApiError::Unauthenticated => {
                AppError::new("BACKUP/UNAUTHENTICATED", "authentication required")
            }
            ApiError::Pipeline(PipelineError::Internal(detail)) => {
                // Internal details can name server paths; they stay in the log.
                tracing::error!(target: "stoner_backup", event = "internal_error", error = %detail);
                AppError::from(PipelineError::Internal("operation failed".into()))
            }
            ApiError::Pipeline(err) => AppError::from(err),
        };
        (
            status,
            Json(ErrorBody {
                success: false,
                error,
            }),
        )
            .into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let username = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty() && value.chars().count() <= MAX_ACTOR_CHARS)
            .ok_or(ApiError::Unauthenticated)?;
        Ok(Actor::new(username))
    }
}

pub fn router(ctx: PipelineContext) -> Router {
    let body_limit = usize::try_from(ctx.config.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    Router::new()
        .nest("/backup", backup_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

fn backup_routes() -> Router<PipelineContext> {
    Router::new()
        .route("/database", post(create_backup))
        .route("/list", get(list_backups))
        .route("/download/:filename", get(download_backup))
        .route("/import", post(import_database))
        .route("/:filename", delete(delete_backup))
}

pub async fn serve(ctx: PipelineContext, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(target: "stoner_backup", event = "http_listening", addr = %addr);
    axum::serve(listener, router(ctx))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!(target: "stoner_backup", event = "http_shutdown");
        })
        .await
}

async fn create_backup(
    State(ctx): State<PipelineContext>,
    actor: Actor,
) -> Result<Json<Value>, ApiError> {
    let outcome = pipeline::export_database(&ctx, &actor).await?;
    Ok(Json(json!({
        "success": true,
        "message": "database backup completed",
        "backup": outcome,
    })))
}

async fn list_backups(
    State(ctx): State<PipelineContext>,
    _actor: Actor,
) -> Result<Json<Value>, ApiError> {
    let backups = pipeline::list_artifacts(&ctx).await?;
    Ok(Json(json!({
        "success": true,
        "backups": backups,
    })))
}

async fn download_backup(
    State(ctx): State<PipelineContext>,
    actor: Actor,
    Path(filename): Path<String>,
) -> Result<Response, ApiError> {
    let download = pipeline::open_artifact(&ctx, &actor, &filename).await?;
    let disposition = format!("attachment; filename=\"{}\"", download.name);
    let stream = futures::stream::try_unfold(download.file, |mut file| async move {
        let mut buf = vec![0_u8; DOWNLOAD_CHUNK_BYTES];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok::<_, std::io::Error>(None);
        }
        buf.truncate(n);
        Ok(Some((buf, file)))
    });
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, download.size.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

async fn delete_backup(
    State(ctx): State<PipelineContext>,
    actor: Actor,
    Path(filename): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let deleted = pipeline::delete_artifact(&ctx, &actor, &filename).await?;
    Ok(Json(json!({
        "success": true,
        "deleted": deleted,
    })))
}

async fn import_database(
    State(ctx): State<PipelineContext>,
    actor: Actor,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let guard = match ctx.begin_operation() {
        Ok(guard) => guard,
        Err(err) => {
            pipeline::audit_import_failure(&ctx, &actor, None, &err);
            return Err(err.into());
        }
    };
    let staged = match receive_upload(&ctx, &mut multipart).await {
        Ok(staged) => staged,
        Err((display_name, err)) => {
            pipeline::audit_import_failure(&ctx, &actor, display_name.as_deref(), &err);
            return Err(err.into());
        }
    };
    let report = pipeline::import_staged(&ctx, &guard, &actor, staged).await?;
    Ok(Json(json!({
        "success": true,
        "message": "database import completed",
        "import": report,
    })))
}

/// Stream the `database` field into the staging area, enforcing the byte
/// ceiling chunk by chunk. Other fields are skipped.
async fn receive_upload(
    ctx: &PipelineContext,
    multipart: &mut Multipart,
) -> Result<StagedUpload, (Option<String>, PipelineError)> {
    let malformed =
        |err: axum::extract::multipart::MultipartError| -> PipelineError {
            ValidationError::MalformedUpload(err.body_text()).into()
        };

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| (None, malformed(err)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let client_name = field.file_name().unwrap_or_default().to_string();
        let display_name = Some(sanitize_display_name(&client_name));

        let mut writer = StagingWriter::create(
            &ctx.config.upload_dir,
            &client_name,
            ctx.config.staging_limits(),
        )
        .await
        .map_err(|err| (display_name.clone(), err))?;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| (display_name.clone(), malformed(err)))?
        {
            writer
                .write_chunk(&chunk)
                .await
                .map_err(|err| (display_name.clone(), err))?;
        }
        return writer.finish().await.map_err(|err| (display_name, err));
    }
    Err((None, ValidationError::MissingFile.into()))
}
