#![allow(clippy::unwrap_used, clippy::expect_used)]

mod util;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use stoner_backup::http::{router, ACTOR_HEADER};
use stoner_backup::import::TableKind;
use tower::ServiceExt;
use util::*;

const BOUNDARY: &str = "stoner-test-boundary";

async fn send(h: &Harness, request: Request<Body>) -> (StatusCode, Value) {
    let response = router(h.ctx.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header(ACTOR_HEADER, "admin")
        .body(Body::empty())
        .unwrap()
}

fn multipart_upload(filename: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"database\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    Request::post("/backup/import")
        .header(ACTOR_HEADER, "admin")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn requests_without_an_actor_are_unauthorized() {
    let h = sqlite_harness().await;
    let request = Request::get("/backup/list").body(Body::empty()).unwrap();
    let (status, body) = send(&h, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn list_starts_empty() {
    let h = sqlite_harness().await;
    let (status, body) = send(&h, get("/backup/list")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["backups"], Value::Array(Vec::new()));
}

#[tokio::test]
async fn traversal_names_are_rejected_before_the_filesystem() {
    let h = sqlite_harness().await;
    let (status, body) = send(
        &h,
        get("/backup/download/backup-postgresql-..%2F..%2Fetc-passwd.sql"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BACKUP/VALIDATION");
    assert_eq!(
        body["error"]["context"]["phase"],
        "rejected_before_change"
    );

    let (status, _) = send(&h, get("/backup/download/notes.txt")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn well_formed_but_missing_artifact_is_not_found() {
    let h = sqlite_harness().await;
    let (status, body) = send(
        &h,
        get("/backup/download/backup-sqlite-2024-06-10T06-13-20-123Z.db"),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "BACKUP/NOT_FOUND");
}

#[tokio::test]
async fn backup_download_and_delete_round_trip() {
    let h = sqlite_harness().await;
    let request = Request::post("/backup/database")
        .header(ACTOR_HEADER, "admin")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h, request).await;
    assert_eq!(status, StatusCode::OK);
    let filename = body["backup"]["filename"].as_str().unwrap().to_string();
    assert!(filename.starts_with("backup-sqlite-"));

    let (_, listed) = send(&h, get("/backup/list")).await;
    assert_eq!(listed["backups"][0]["filename"], filename.as_str());

    let response = router(h.ctx.clone())
        .oneshot(get(&format!("/backup/download/{filename}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.contains(&filename));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(bytes.starts_with(b"SQLite format 3"));

    let request = Request::delete(format!("/backup/{filename}"))
        .header(ACTOR_HEADER, "admin")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], filename.as_str());
    assert!(files_in(&h.config().backup_dir).is_empty());

    let actions: Vec<_> = h
        .audit
        .events()
        .iter()
        .map(|event| event.action.as_str())
        .collect();
    assert_eq!(
        actions,
        vec!["database_backup", "backup_download", "backup_delete"]
    );
}

#[tokio::test]
async fn multipart_import_applies_the_upload() {
    let h = sqlite_harness().await;
    let source = seeded_source(h.root.path(), "upload.db");
    let content = std::fs::read(&source).unwrap();

    let (status, body) = send(&h, multipart_upload("stoner.db", &content)).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["import"]["totalRows"], 50);
    assert_eq!(
        h.ctx.store.count_rows(TableKind::Payments).await.unwrap(),
        SEEDED_PAYMENTS
    );
    assert!(files_in(&h.config().upload_dir).is_empty());
}

#[tokio::test]
async fn import_without_the_database_field_is_a_validation_error() {
    let h = sqlite_harness().await;
    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--{BOUNDARY}--\r\n"
    );
    let request = Request::post("/backup/import")
        .header(ACTOR_HEADER, "admin")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, body) = send(&h, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BACKUP/VALIDATION");
    assert_eq!(h.audit.events().len(), 1);
}

#[tokio::test]
async fn busy_store_answers_conflict() {
    let h = sqlite_harness().await;
    let _held = h.ctx.begin_operation().unwrap();
    let request = Request::post("/backup/database")
        .header(ACTOR_HEADER, "admin")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&h, request).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "BACKUP/BUSY");
    assert_eq!(body["error"]["context"]["retry_safe"], "true");
}
