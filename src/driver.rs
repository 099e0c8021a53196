//! Pipeline driver: runs the four stages for one job.
//!
//! ## Lifecycle
//!
//! ```text
//! Pending ─claim─▶ Ingesting ─▶ Drafting ─▶ Illustrating ─▶ Assembling ─▶ Completed
//!                      │            │             │               │
//!                      └────────────┴──── error ──┴───────────────┴──────▶ Failed
//! ```
//!
//! Every state is entered with a single store update carrying status,
//! progress and message together. Progress allocation per stage:
//!
//! | Stage        | Progress |
//! |--------------|----------|
//! | ingest       | 10       |
//! | draft        | 25 → 40  |
//! | illustrate   | 40 → 85, proportional per page |
//! | assemble     | 90       |
//! | completed    | 100      |
//!
//! ## Failure handling
//!
//! Stage results are plain `Result`s propagated with `?` to the driver
//! boundary, where the error text is recorded on the job. Illustration errors
//! never propagate: the page keeps an empty image path. A panic inside a
//! stage is caught and recorded like any other failure. Cleanup (upload
//! removal, manifest) runs on every exit path.

use crate::config::ForgeConfig;
use crate::error::BookError;
use crate::job::{Job, JobStatus, Page};
use crate::manifest::Manifest;
use crate::pipeline::assemble::{self, BookAssembler, PdfBookAssembler};
use crate::pipeline::draft::{self, LlmStoryWriter, StoryWriter};
use crate::pipeline::illustrate::{illustrate_page, HttpIllustrator, Illustrator};
use crate::pipeline::ingest::{self, PdfTextExtractor, TextExtractor};
use crate::store::JobStore;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const INGEST_PROGRESS: u8 = 10;
const DRAFT_PROGRESS: u8 = 25;
const ILLUSTRATE_START: u8 = 40;
const ILLUSTRATE_END: u8 = 85;
const ASSEMBLE_PROGRESS: u8 = 90;

pub const SUCCESS_MESSAGE: &str = "Book generated successfully!";

/// The four external collaborators a driver delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn TextExtractor>,
    pub writer: Arc<dyn StoryWriter>,
    pub illustrator: Arc<dyn Illustrator>,
    pub assembler: Arc<dyn BookAssembler>,
}

impl Collaborators {
    /// Production collaborators: pdfium, edgequake-llm, txt2img over HTTP, lopdf.
    pub fn from_config(config: &ForgeConfig) -> Result<Self, BookError> {
        Ok(Self {
            extractor: Arc::new(PdfTextExtractor::new()),
            writer: Arc::new(LlmStoryWriter::from_config(config)?),
            illustrator: Arc::new(HttpIllustrator::from_config(config)),
            assembler: Arc::new(PdfBookAssembler::new(&config.output_dir)),
        })
    }
}

/// Files a run produced, collected for the manifest.
#[derive(Debug, Default)]
struct Artifacts {
    book: Option<PathBuf>,
    images: Vec<PathBuf>,
}

/// What a successful run hands back for the final store update.
struct Finished {
    book: PathBuf,
    skipped_illustrations: usize,
}

/// Runs the pipeline for jobs held in a [`JobStore`].
#[derive(Clone)]
pub struct PipelineDriver {
    store: Arc<dyn JobStore>,
    collaborators: Collaborators,
    config: Arc<ForgeConfig>,
}

impl PipelineDriver {
    pub fn new(store: Arc<dyn JobStore>, collaborators: Collaborators, config: Arc<ForgeConfig>) -> Self {
        Self {
            store,
            collaborators,
            config,
        }
    }

    /// Run the pipeline for `job_id` to completion or failure.
    ///
    /// Only the first call for a given job does anything: the job is claimed
    /// by moving it out of `Pending`, and any later call finds it already
    /// claimed and returns.
    pub async fn run(&self, job_id: &str) {
        let Some(job) = self.claim(job_id) else {
            debug!(job_id, "Job already claimed or unknown; not running");
            return;
        };
        info!(job_id, theme = %job.specs.theme, "Pipeline started");

        let mut artifacts = Artifacts::default();
        let outcome = AssertUnwindSafe(self.execute(&job, &mut artifacts))
            .catch_unwind()
            .await;

        // The manifest must exist before the terminal status is visible.
        self.cleanup(&job, artifacts).await;

        match outcome {
            Ok(Ok(done)) => {
                let message = success_message(done.skipped_illustrations);
                let book = done.book;
                self.store.update(job_id, &mut |j| {
                    j.complete(book.clone(), message.clone());
                });
                info!(job_id, "Pipeline completed");
            }
            Ok(Err(e)) => {
                warn!(job_id, "Pipeline failed: {e}");
                self.record_failure(job_id, e.to_string());
            }
            Err(_) => {
                error!(job_id, "Pipeline panicked");
                self.record_failure(job_id, "internal error during generation".to_string());
            }
        }
    }

    fn claim(&self, job_id: &str) -> Option<Job> {
        let mut claimed = None;
        self.store.update(job_id, &mut |j| {
            if j.status == JobStatus::Pending && j.advance(0, "Starting...") {
                claimed = Some(j.clone());
            }
        });
        claimed
    }

    fn set_step(&self, job_id: &str, progress: u8, message: impl Into<String>) {
        let message = message.into();
        debug!(job_id, progress, "{message}");
        self.store.update(job_id, &mut |j| {
            j.advance(progress, message.clone());
        });
    }

    fn record_failure(&self, job_id: &str, error: String) {
        self.store.update(job_id, &mut |j| {
            j.fail(error.clone());
        });
    }

    async fn execute(&self, job: &Job, artifacts: &mut Artifacts) -> Result<Finished, BookError> {
        let id = job.id.as_str();
        let limit = self.config.collaborator_timeout();

        // ── Ingest ───────────────────────────────────────────────────────
        self.set_step(id, INGEST_PROGRESS, "Extracting text...");
        let source = ingest::ingest(
            self.collaborators.extractor.as_ref(),
            &job.upload,
            &job.segmentation,
            limit,
        )
        .await?;

        // ── Draft ────────────────────────────────────────────────────────
        self.set_step(id, DRAFT_PROGRESS, "Writing story...");
        let story = draft::draft(
            self.collaborators.writer.as_ref(),
            &source,
            &job.specs,
            &self.config,
        )
        .await?;
        let mut pages = story.pages;
        let total = pages.len();
        {
            let title = story.title.clone();
            let drafted = pages.clone();
            self.store.update(id, &mut |j| {
                j.title = Some(title.clone());
                j.pages = drafted.clone();
                j.advance(ILLUSTRATE_START, format!("Story drafted: {total} pages"));
            });
        }

        // ── Illustrate ───────────────────────────────────────────────────
        let mut skipped = 0;
        for (idx, page) in pages.iter_mut().enumerate() {
            self.set_step(
                id,
                illustrate_progress(idx, total),
                format!("Illustrating page {}/{}...", idx + 1, total),
            );
            if page.image_prompt.trim().is_empty() {
                continue;
            }
            let image_path = self.illustrate(job, idx, page, limit, &mut skipped).await;
            page.image_path = image_path;
            if !page.image_path.is_empty() {
                artifacts.images.push(PathBuf::from(&page.image_path));
            }

            let image_path = page.image_path.clone();
            let done = illustrate_progress(idx + 1, total);
            self.store.update(id, &mut |j| {
                if let Some(p) = j.pages.get_mut(idx) {
                    p.image_path = image_path.clone();
                }
                j.advance(done, format!("Illustrated page {}/{}", idx + 1, total));
            });
        }

        // ── Assemble ─────────────────────────────────────────────────────
        self.set_step(id, ASSEMBLE_PROGRESS, "Assembling book...");
        let book = assemble::assemble(
            self.collaborators.assembler.as_ref(),
            id,
            &story.title,
            &pages,
            limit,
        )
        .await?;
        artifacts.book = Some(book.clone());

        Ok(Finished {
            book,
            skipped_illustrations: skipped,
        })
    }

    /// Illustrate one page; failures become an empty path.
    async fn illustrate(
        &self,
        job: &Job,
        idx: usize,
        page: &Page,
        limit: std::time::Duration,
        skipped: &mut usize,
    ) -> String {
        match illustrate_page(
            self.collaborators.illustrator.as_ref(),
            &job.specs.theme,
            &job.specs.age_group,
            &page.image_prompt,
            limit,
        )
        .await
        {
            Ok(path) => path.to_string_lossy().into_owned(),
            Err(e) => {
                warn!(job_id = %job.id, page = idx + 1, "Illustration skipped: {e}");
                *skipped += 1;
                String::new()
            }
        }
    }

    /// Remove the upload and record the manifest. Never fails the job.
    async fn cleanup(&self, job: &Job, artifacts: Artifacts) {
        if !self.config.keep_sources {
            match tokio::fs::remove_file(&job.upload).await {
                Ok(()) => debug!(job_id = %job.id, path = %job.upload.display(), "Upload removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(job_id = %job.id, "Failed to remove upload: {e}"),
            }
        }

        let manifest = Manifest::new(job.id.clone(), artifacts.book, artifacts.images);
        if manifest.has_artifacts() {
            if let Err(e) = manifest.write(&self.config.manifest_dir).await {
                warn!(job_id = %job.id, "Failed to write manifest: {e}");
            }
        }
    }
}

fn illustrate_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return ILLUSTRATE_END;
    }
    let span = (ILLUSTRATE_END - ILLUSTRATE_START) as usize;
    ILLUSTRATE_START + (span * done.min(total) / total) as u8
}

fn success_message(skipped: usize) -> String {
    match skipped {
        0 => SUCCESS_MESSAGE.to_string(),
        1 => format!("{SUCCESS_MESSAGE} (1 illustration skipped)"),
        n => format!("{SUCCESS_MESSAGE} ({n} illustrations skipped)"),
    }
}
