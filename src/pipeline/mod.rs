//! Pipeline stages for source-to-book generation.
//!
//! Each submodule owns exactly one step and the collaborator trait that step
//! delegates to, so the driver only ever sees trait objects and tests can
//! swap any collaborator for an in-process fake.
//!
//! ## Data Flow
//!
//! ```text
//! ingest ──▶ draft ──▶ parse ──▶ illustrate ──▶ assemble
//! (pdfium)   (LLM)     (rules)   (txt2img)      (lopdf)
//! ```
//!
//! 1. [`ingest`]       extract plain text from the upload over the requested page range
//! 2. [`draft`]        ask the story model for a titled, page-delimited story
//! 3. [`parse`]        turn free-form model output into a title and pages
//! 4. [`illustrate`]   one image per page, best-effort
//! 5. [`assemble`]     lay out title page and story pages into a PDF
//!
//! Every stage function bounds its collaborator call with
//! [`with_timeout`]; a stalled collaborator turns into
//! [`BookError::Timeout`] instead of a frozen job.

pub mod assemble;
pub mod draft;
pub mod illustrate;
pub mod ingest;
pub mod parse;

use crate::error::{BookError, Stage};
use std::future::Future;
use std::time::Duration;

/// Run a fallible collaborator future under a deadline.
pub(crate) async fn with_timeout<T, F>(stage: Stage, limit: Duration, fut: F) -> Result<T, BookError>
where
    F: Future<Output = Result<T, BookError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(BookError::Timeout {
            stage,
            limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn timeout_maps_to_stage_error() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, BookError>(())
        };
        let err = with_timeout(Stage::Draft, Duration::from_millis(10), slow)
            .await
            .unwrap_err();
        assert!(matches!(err, BookError::Timeout { stage: Stage::Draft, .. }));
    }

    #[test]
    fn fast_future_passes_through() {
        let out = tokio_test::block_on(with_timeout(
            Stage::Ingest,
            Duration::from_secs(1),
            async { Ok::<_, BookError>(7) },
        ));
        assert_eq!(out.unwrap(), 7);
    }
}
