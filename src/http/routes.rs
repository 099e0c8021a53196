//! HTTP routes.
//!
//! - POST   /generate           multipart upload; starts a job
//! - GET    /events/{job_id}    SSE stream of progress snapshots
//! - GET    /jobs/{job_id}      one progress snapshot
//! - GET    /download/{job_id}  the assembled book, once completed
//! - GET    /source/{name}      a stored upload
//! - DELETE /source/{name}      remove a stored upload
//! - DELETE /books/{job_id}     remove a book and its illustrations
//! - GET    /health

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::job::{BookSpecs, JobSnapshot, Segmentation};
use crate::progress::ProgressEvent;
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;

/// Humor level when the form omits it.
const DEFAULT_HUMOR: i64 = 5;
/// Age group when the form omits it.
const DEFAULT_AGE_GROUP: &str = "6-8";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    job_id: String,
    status: &'static str,
    source: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteResponse {
    job_id: String,
    removed: usize,
}

/// Fields of the generate form.
#[derive(Debug, Default)]
struct GenerateForm {
    file: Option<(String, Vec<u8>)>,
    theme: Option<String>,
    humor: Option<i64>,
    age_group: Option<String>,
    segmentation: Segmentation,
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

fn parse_int<T: std::str::FromStr>(field: &str, value: &str) -> ApiResult<Option<T>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| ApiError::BadRequest(format!("{field} must be an integer, got '{value}'")))
}

async fn read_form(mut multipart: Multipart) -> ApiResult<GenerateForm> {
    let mut form = GenerateForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let filename = field.file_name().unwrap_or("upload.pdf").to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            form.file = Some((filename, data.to_vec()));
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        match name.as_str() {
            "theme" => form.theme = non_empty(value),
            "humor" => form.humor = parse_int("humor", &value)?,
            "ageGroup" => form.age_group = non_empty(value),
            "sectionDescription" => form.segmentation.section_description = non_empty(value),
            "additionalContext" => form.segmentation.additional_context = non_empty(value),
            "pageStart" => form.segmentation.page_start = parse_int("pageStart", &value)?,
            "pageEnd" => form.segmentation.page_end = parse_int("pageEnd", &value)?,
            other => tracing::debug!(field = other, "Ignoring unknown form field"),
        }
    }
    Ok(form)
}

/// POST /generate: store the upload and start a job.
async fn generate(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ApiResult<Json<SubmitResponse>> {
    let form = read_form(multipart).await?;
    let (filename, bytes) = form
        .file
        .filter(|(_, bytes)| !bytes.is_empty())
        .ok_or_else(|| ApiError::BadRequest("file is required".into()))?;
    let theme = form
        .theme
        .ok_or_else(|| ApiError::BadRequest("theme is required".into()))?;
    let specs = BookSpecs::new(
        theme,
        form.humor.unwrap_or(DEFAULT_HUMOR),
        form.age_group.unwrap_or_else(|| DEFAULT_AGE_GROUP.to_string()),
    );

    let submission = state
        .manager
        .submit_upload(&filename, &bytes, specs, form.segmentation)
        .await?;
    Ok(Json(SubmitResponse {
        job_id: submission.job_id,
        status: "submitted",
        source: submission.source_name,
    }))
}

/// GET /events/{job_id}: progress as server-sent events.
async fn events(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = state
        .manager
        .watch(&job_id)
        .map(move |event| Ok(sse_event(&job_id, &event)));
    Sse::new(stream)
}

fn sse_event(job_id: &str, event: &ProgressEvent) -> Event {
    Event::default().json_data(event).unwrap_or_else(|e| {
        tracing::error!(job_id, "Failed to serialise progress event: {e}");
        Event::default().event("error").data("progress unavailable")
    })
}

/// GET /jobs/{job_id}
async fn job_snapshot(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(state.manager.snapshot(&job_id)?))
}

/// GET /download/{job_id}
async fn download(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let (path, filename) = state.manager.download(&job_id).await?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::Internal(format!("{}: {e}", path.display())))?;
    let headers = [
        (header::CONTENT_TYPE, "application/pdf".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    Ok((headers, bytes))
}

fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// GET /source/{name}
async fn get_source(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let path = state.manager.source_path(&name).await?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::Internal(format!("{}: {e}", path.display())))?;
    Ok(([(header::CONTENT_TYPE, content_type_for(&name))], bytes))
}

/// DELETE /source/{name}
async fn delete_source(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.manager.delete_source(&name).await?;
    Ok(Json(serde_json::json!({ "source": name, "status": "deleted" })))
}

/// DELETE /books/{job_id}
async fn delete_book(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<DeleteResponse>> {
    let removed = state.manager.delete_book(&job_id).await?;
    Ok(Json(DeleteResponse {
        job_id,
        removed: removed.len(),
    }))
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/generate", post(generate))
        .route("/events/{job_id}", get(events))
        .route("/jobs/{job_id}", get(job_snapshot))
        .route("/download/{job_id}", get(download))
        .route("/source/{name}", get(get_source).delete(delete_source))
        .route("/books/{job_id}", delete(delete_book))
        .route("/health", get(health))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_int_accepts_blank() {
        assert_eq!(parse_int::<u32>("pageStart", "  ").unwrap(), None);
        assert_eq!(parse_int::<u32>("pageStart", "3").unwrap(), Some(3));
        assert!(parse_int::<u32>("pageStart", "three").is_err());
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("a.PDF"), "application/pdf");
        assert_eq!(content_type_for("notes.md"), "text/markdown; charset=utf-8");
        assert_eq!(content_type_for("blob"), "application/octet-stream");
    }
}
