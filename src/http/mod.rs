//! HTTP surface over the [`JobManager`].
//!
//! Routes live in [`routes`]; [`create_app`] adds the middleware (body limit
//! for uploads, permissive CORS, request tracing) and [`serve`] binds it.

pub mod error;
pub mod routes;

pub use error::{ApiError, ApiResult, ErrorResponse};

use crate::error::BookError;
use crate::manager::JobManager;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared state handed to every handler.
pub struct AppState {
    pub manager: JobManager,
}

/// Create the application router with all routes and middleware.
pub fn create_app(manager: JobManager) -> Router {
    let state = Arc::new(AppState { manager });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::router()
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(manager: JobManager, addr: SocketAddr) -> Result<(), BookError> {
    manager.config().ensure_dirs().await?;
    let app = create_app(manager);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BookError::Internal(format!("cannot bind {addr}: {e}")))?;
    info!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .map_err(|e| BookError::Internal(format!("server error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForgeConfig;
    use crate::driver::Collaborators;
    use crate::error::IllustrationError;
    use crate::job::Page;
    use crate::pipeline::assemble::BookAssembler;
    use crate::pipeline::draft::StoryWriter;
    use crate::pipeline::illustrate::Illustrator;
    use crate::pipeline::ingest::TextExtractor;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tower::ServiceExt;

    struct ReadFile;

    #[async_trait]
    impl TextExtractor for ReadFile {
        async fn extract(&self, path: &Path, _: Option<u32>, _: Option<u32>) -> Result<String, BookError> {
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| BookError::io(path, e))
        }
    }

    struct OnePage;

    #[async_trait]
    impl StoryWriter for OnePage {
        async fn write(&self, _: &str, _: &str) -> Result<String, BookError> {
            Ok("TITLE: The Kind Fox!\nText: The fox shared.\nImage: a fox".into())
        }
    }

    struct NoImages;

    #[async_trait]
    impl Illustrator for NoImages {
        async fn illustrate(&self, _: &str) -> Result<PathBuf, IllustrationError> {
            Err(IllustrationError::NotConfigured)
        }
    }

    struct WriteStub(PathBuf);

    #[async_trait]
    impl BookAssembler for WriteStub {
        async fn assemble(&self, job_id: &str, _: &str, _: &[Page]) -> Result<PathBuf, BookError> {
            let path = self.0.join(format!("book_{job_id}.pdf"));
            tokio::fs::create_dir_all(&self.0).await.unwrap();
            tokio::fs::write(&path, b"%PDF-1.5 stub").await.unwrap();
            Ok(path)
        }
    }

    fn app(root: &Path) -> Router {
        let config = ForgeConfig::builder()
            .data_dir(root)
            .poll_interval_ms(5)
            .build()
            .unwrap();
        let collaborators = Collaborators {
            extractor: Arc::new(ReadFile),
            writer: Arc::new(OnePage),
            illustrator: Arc::new(NoImages),
            assembler: Arc::new(WriteStub(config.output_dir.clone())),
        };
        create_app(JobManager::new(config, collaborators))
    }

    const BOUNDARY: &str = "storyforge-test-boundary";

    fn multipart(fields: &[(&str, &str)], file: Option<(&str, &str)>) -> Body {
        let mut body = String::new();
        for (name, value) in fields {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        if let Some((filename, content)) = file {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
                 Content-Type: text/plain\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        Body::from(body)
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.oneshot(req).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_form(body: Body) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/generate")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(app(dir.path()), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, br#"{"status":"ok"}"#);
    }

    #[tokio::test]
    async fn generate_requires_theme() {
        let dir = tempfile::tempdir().unwrap();
        let body = multipart(&[("humor", "3")], Some(("story.txt", "A fox.")));
        let (status, _) = send(app(dir.path()), post_form(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn generate_requires_file() {
        let dir = tempfile::tempdir().unwrap();
        let body = multipart(&[("theme", "Kindness")], None);
        let (status, _) = send(app(dir.path()), post_form(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn generate_rejects_bad_page_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let body = multipart(
            &[("theme", "Kindness"), ("pageStart", "first")],
            Some(("story.txt", "A fox.")),
        );
        let (status, _) = send(app(dir.path()), post_form(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_job_routes_are_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());
        for uri in ["/jobs/nope", "/download/nope", "/source/nope.pdf"] {
            let (status, _) = send(app.clone(), get(uri)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }
        let delete = Request::builder()
            .method("DELETE")
            .uri("/books/nope")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(app, delete).await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_job_event_stream_sends_one_error() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(app(dir.path()), get("/events/nope")).await;
        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(body).unwrap();
        assert_eq!(text.matches("data:").count(), 1);
        assert!(text.contains(r#"{"error":"Job not found"}"#));
    }

    #[tokio::test]
    async fn full_round_trip_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let body = multipart(
            &[("theme", "Kindness"), ("humor", "4"), ("ageGroup", "4-6")],
            Some(("../fox story.txt", "A fox shares berries.")),
        );
        let (status, body) = send(app.clone(), post_form(body)).await;
        assert_eq!(status, StatusCode::OK);
        let submitted: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(submitted["status"], "submitted");
        let job_id = submitted["jobId"].as_str().unwrap().to_string();
        assert!(submitted["source"].as_str().unwrap().ends_with("-fox story.txt"));

        // the event stream ends once the job is terminal
        let (_, events) = tokio::time::timeout(
            Duration::from_secs(10),
            send(app.clone(), get(&format!("/events/{job_id}"))),
        )
        .await
        .unwrap();
        let events = String::from_utf8(events).unwrap();
        assert!(events.contains(r#""status":"completed""#), "{events}");
        assert!(events.contains(&format!(r#""resultRef":"/download/{job_id}""#)));

        let response = app
            .clone()
            .oneshot(get(&format!("/download/{job_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[axum::http::header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(disposition, "attachment; filename=\"The Kind Fox.pdf\"");

        let delete = Request::builder()
            .method("DELETE")
            .uri(format!("/books/{job_id}"))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(app.clone(), delete).await.0, StatusCode::OK);
    }
}
