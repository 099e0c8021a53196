//! Text extraction: turn an uploaded source document into plain text.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state; calling it from a Tokio
//! worker would stall every other job's progress stream while a large PDF is
//! parsed. Extraction runs on the blocking pool instead.
//!
//! ## Page range
//!
//! Bounds are 1-indexed and inclusive. `start` is clamped to ≥ 1 and `end` to
//! the document's page count, so an over-long range simply reads to the end.
//! A range that selects nothing yields empty text, which the stage turns into
//! [`BookError::ExtractionEmpty`].

use crate::error::{BookError, Stage};
use crate::job::Segmentation;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Collaborator that reads plain text out of a stored upload.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(
        &self,
        path: &Path,
        page_start: Option<u32>,
        page_end: Option<u32>,
    ) -> Result<String, BookError>;
}

/// Ingest stage: extract, reject empty output, then apply section hints.
pub async fn ingest(
    extractor: &dyn TextExtractor,
    path: &Path,
    segmentation: &Segmentation,
    limit: Duration,
) -> Result<String, BookError> {
    let text = super::with_timeout(
        Stage::Ingest,
        limit,
        extractor.extract(path, segmentation.page_start, segmentation.page_end),
    )
    .await?;

    if text.trim().is_empty() {
        return Err(BookError::ExtractionEmpty);
    }
    debug!(chars = text.chars().count(), "Extracted source text");
    Ok(apply_section_hints(text, segmentation))
}

/// Prefix the text with the caller's section and context hints.
///
/// Context is only meaningful alongside a section description.
pub fn apply_section_hints(text: String, segmentation: &Segmentation) -> String {
    let section = segmentation
        .section_description
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let Some(section) = section else {
        return text;
    };

    let mut out = format!("[Section: {section}]\n\n{text}");
    if let Some(ctx) = segmentation
        .additional_context
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        out = format!("[Context: {ctx}]\n{out}");
    }
    out
}

/// Convert 1-indexed inclusive bounds into a 0-indexed half-open range.
pub fn page_range(total: usize, start: Option<u32>, end: Option<u32>) -> std::ops::Range<usize> {
    let from = start.map_or(0, |s| (s.max(1) - 1) as usize);
    let to = end.map_or(total, |e| (e as usize).min(total));
    from..to.max(from)
}

// ── pdfium implementation ────────────────────────────────────────────────

/// Extracts text with pdfium; `.txt` and `.md` uploads are read as-is.
///
/// The pdfium library is located via `PDFIUM_LIB_PATH` (a file or the
/// directory containing it), falling back to the system library.
#[derive(Debug, Clone, Default)]
pub struct PdfTextExtractor {
    library_path: Option<PathBuf>,
}

impl PdfTextExtractor {
    pub fn new() -> Self {
        Self {
            library_path: std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from),
        }
    }

    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }
}

fn is_plain_text(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("txt") | Some("md")
    )
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(
        &self,
        path: &Path,
        page_start: Option<u32>,
        page_end: Option<u32>,
    ) -> Result<String, BookError> {
        if is_plain_text(path) {
            return tokio::fs::read_to_string(path)
                .await
                .map_err(|e| BookError::io(path, e));
        }

        let path = path.to_path_buf();
        let library = self.library_path.clone();
        tokio::task::spawn_blocking(move || {
            extract_pdf_blocking(&path, library.as_deref(), page_start, page_end)
        })
        .await
        .map_err(|e| BookError::Internal(format!("Extraction task panicked: {e}")))?
    }
}

fn bind_pdfium(library: Option<&Path>) -> Result<Pdfium, BookError> {
    let bindings = match library {
        Some(p) if p.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(p))
        }
        Some(p) => Pdfium::bind_to_library(p),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| BookError::collaborator(Stage::Ingest, format!("pdfium unavailable: {e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn extract_pdf_blocking(
    path: &Path,
    library: Option<&Path>,
    page_start: Option<u32>,
    page_end: Option<u32>,
) -> Result<String, BookError> {
    let pdfium = bind_pdfium(library)?;
    let document = pdfium.load_pdf_from_file(path, None).map_err(|e| {
        BookError::collaborator(
            Stage::Ingest,
            format!("cannot open '{}': {e:?}", path.display()),
        )
    })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    let range = page_range(total, page_start, page_end);
    info!(total_pages = total, from = range.start + 1, to = range.end, "PDF loaded");

    let mut text = String::new();
    for idx in range {
        let page = pages.get(idx as u16).map_err(|e| {
            BookError::collaborator(Stage::Ingest, format!("page {}: {e:?}", idx + 1))
        })?;
        let page_text = page.text().map_err(|e| {
            BookError::collaborator(Stage::Ingest, format!("page {} text: {e:?}", idx + 1))
        })?;
        text.push_str(&page_text.all());
        text.push('\n');
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(&'static str);

    #[async_trait]
    impl TextExtractor for Canned {
        async fn extract(
            &self,
            _path: &Path,
            _start: Option<u32>,
            _end: Option<u32>,
        ) -> Result<String, BookError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn page_range_clamps() {
        assert_eq!(page_range(10, None, None), 0..10);
        assert_eq!(page_range(10, Some(0), Some(3)), 0..3);
        assert_eq!(page_range(10, Some(4), Some(50)), 3..10);
        assert_eq!(page_range(10, Some(8), Some(2)), 7..7);
        assert_eq!(page_range(3, Some(9), None), 8..8);
    }

    #[test]
    fn hints_need_a_section() {
        let seg = Segmentation {
            additional_context: Some("ctx".into()),
            ..Default::default()
        };
        assert_eq!(apply_section_hints("body".into(), &seg), "body");
    }

    #[test]
    fn hints_prefix_section_then_context() {
        let seg = Segmentation {
            section_description: Some("Chapter 2".into()),
            additional_context: Some("the journey".into()),
            ..Default::default()
        };
        assert_eq!(
            apply_section_hints("body".into(), &seg),
            "[Context: the journey]\n[Section: Chapter 2]\n\nbody"
        );
    }

    #[tokio::test]
    async fn whitespace_only_text_is_extraction_empty() {
        let err = ingest(
            &Canned("  \n\t "),
            Path::new("x.pdf"),
            &Segmentation::default(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BookError::ExtractionEmpty));
    }

    #[tokio::test]
    async fn plain_text_upload_is_read_directly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.TXT");
        std::fs::write(&path, "A fox learns to share.").unwrap();
        let text = PdfTextExtractor::default()
            .extract(&path, None, None)
            .await
            .unwrap();
        assert_eq!(text, "A fox learns to share.");
    }

    #[tokio::test]
    async fn missing_plain_text_is_io_error() {
        let err = PdfTextExtractor::default()
            .extract(Path::new("/nonexistent/notes.md"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BookError::Io { .. }));
    }
}
