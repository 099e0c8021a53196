//! Error types for the storyforge library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BookError`]: **Fatal.** The job cannot proceed (the source yielded no
//!   text, the story model failed, the PDF could not be written). The driver
//!   records its message on the job and marks it `Failed`.
//!
//! * [`IllustrationError`]: **Non-fatal.** A single page could not be
//!   illustrated. The driver logs it and stores an empty image path on the
//!   page; the book is still assembled.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stage names used in error messages and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ingest,
    Draft,
    Illustrate,
    Assemble,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Ingest => "text extraction",
            Stage::Draft => "story generation",
            Stage::Illustrate => "illustration",
            Stage::Assemble => "book assembly",
        };
        f.write_str(name)
    }
}

/// All fatal errors returned by the storyforge library.
#[derive(Debug, Error)]
pub enum BookError {
    // ── Pipeline errors ───────────────────────────────────────────────────
    /// Ingestion succeeded but produced no usable text.
    #[error("extraction produced no text")]
    ExtractionEmpty,

    /// An external collaborator (extractor, story model, assembler) raised.
    #[error("{stage} failed: {detail}")]
    CollaboratorFailure { stage: Stage, detail: String },

    /// A collaborator call did not return within the configured timeout.
    #[error("{stage} timed out after {limit:?}")]
    Timeout { stage: Stage, limit: Duration },

    // ── Lookup errors ─────────────────────────────────────────────────────
    /// Unknown job id, unknown file, or artifact not ready yet.
    #[error("{what} not found")]
    NotFound { what: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading or writing a file under one of the data directories failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BookError {
    pub fn collaborator(stage: Stage, detail: impl std::fmt::Display) -> Self {
        BookError::CollaboratorFailure {
            stage,
            detail: detail.to_string(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        BookError::NotFound { what: what.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BookError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A non-fatal error for a single page illustration.
#[derive(Debug, Clone, Error)]
pub enum IllustrationError {
    /// No image endpoint is configured.
    #[error("image generation is not configured")]
    NotConfigured,

    /// The image service returned an error or an unusable payload.
    #[error("image generation failed: {0}")]
    Failed(String),

    /// The image service did not answer in time.
    #[error("image generation timed out after {limit:?}")]
    Timeout { limit: Duration },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_empty_display() {
        assert_eq!(
            BookError::ExtractionEmpty.to_string(),
            "extraction produced no text"
        );
    }

    #[test]
    fn collaborator_failure_names_stage() {
        let e = BookError::collaborator(Stage::Draft, "model offline");
        let msg = e.to_string();
        assert!(msg.contains("story generation"), "got: {msg}");
        assert!(msg.contains("model offline"), "got: {msg}");
    }

    #[test]
    fn timeout_display() {
        let e = BookError::Timeout {
            stage: Stage::Assemble,
            limit: Duration::from_secs(600),
        };
        assert_eq!(e.to_string(), "book assembly timed out after 600s");

        let e = BookError::Timeout {
            stage: Stage::Draft,
            limit: Duration::from_millis(50),
        };
        assert_eq!(e.to_string(), "story generation timed out after 50ms");
    }

    #[test]
    fn not_found_display() {
        assert_eq!(BookError::not_found("Job abc").to_string(), "Job abc not found");
    }

    #[test]
    fn illustration_timeout_display() {
        let e = IllustrationError::Timeout {
            limit: Duration::from_secs(30),
        };
        assert!(e.to_string().contains("30s"));
    }
}
