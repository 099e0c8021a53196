//! # storyforge
//!
//! Turn an uploaded source document into an illustrated, multi-page book.
//!
//! ## Why this crate?
//!
//! Generating a book is slow (a story model call, then one image per page),
//! and the models involved return loosely formatted text. This crate runs the
//! work as a background job per upload, reports progress that never moves
//! backwards, and turns whatever the story model produced into a title and a
//! bounded list of pages rather than failing on unexpected formatting.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Ingest      extract text over the requested page range (pdfium)
//!  ├─ 2. Draft       story model call, then page parsing with fallbacks
//!  ├─ 3. Illustrate  one image per page, best-effort (txt2img over HTTP)
//!  ├─ 4. Assemble    title page + story pages (lopdf)
//!  └─ 5. Cleanup     remove upload, write manifest (always runs)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use storyforge::{BookSpecs, Collaborators, ForgeConfig, JobManager, Segmentation};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Story provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / ...
//!     let config = ForgeConfig::builder().data_dir("./data").build()?;
//!     config.ensure_dirs().await?;
//!     let collaborators = Collaborators::from_config(&config)?;
//!     let manager = JobManager::new(config, collaborators);
//!
//!     let job_id = manager.submit(
//!         "source.pdf".into(),
//!         BookSpecs::new("Kindness", 5, "6-8"),
//!         Segmentation::default(),
//!     );
//!     let mut events = Box::pin(manager.watch(&job_id));
//!     while let Some(event) = events.next().await {
//!         println!("{}", serde_json::to_string(&event)?);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `storyforge` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod driver;
pub mod error;
pub mod http;
pub mod job;
pub mod manager;
pub mod manifest;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ForgeConfig, ForgeConfigBuilder};
pub use driver::{Collaborators, PipelineDriver};
pub use error::{BookError, IllustrationError, Stage};
pub use job::{BookSpecs, Job, JobId, JobSnapshot, JobStatus, Page, Segmentation};
pub use manager::{JobManager, Submission};
pub use manifest::{delete_book, Manifest};
pub use pipeline::parse::{parse_story, ParseResult};
pub use progress::{ProgressEvent, ProgressNotifier};
pub use store::{JobStore, MemoryJobStore};
