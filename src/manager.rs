//! Job manager: the façade the HTTP layer and the CLI talk to.
//!
//! Submitting a job inserts it as `Pending` and spawns exactly one
//! [`PipelineDriver`] task for it; the call returns as soon as the task is
//! scheduled. Everything else is a read of the store or of files the
//! pipeline left on disk.

use crate::config::ForgeConfig;
use crate::driver::{Collaborators, PipelineDriver};
use crate::error::BookError;
use crate::job::{new_job_id, BookSpecs, Job, JobId, JobSnapshot, JobStatus, Segmentation};
use crate::manifest;
use crate::progress::{ProgressEvent, ProgressNotifier};
use crate::store::{JobStore, MemoryJobStore};
use futures::Stream;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};

/// Result of accepting an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub job_id: JobId,
    /// Name under which the upload is stored (see [`JobManager::source_path`]).
    pub source_name: String,
}

#[derive(Clone)]
pub struct JobManager {
    store: Arc<dyn JobStore>,
    driver: PipelineDriver,
    notifier: ProgressNotifier,
    config: Arc<ForgeConfig>,
}

impl JobManager {
    /// A manager over a fresh in-memory store.
    pub fn new(config: ForgeConfig, collaborators: Collaborators) -> Self {
        Self::with_store(config, collaborators, Arc::new(MemoryJobStore::new()))
    }

    pub fn with_store(
        config: ForgeConfig,
        collaborators: Collaborators,
        store: Arc<dyn JobStore>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            driver: PipelineDriver::new(Arc::clone(&store), collaborators, Arc::clone(&config)),
            notifier: ProgressNotifier::new(Arc::clone(&store), config.poll_interval()),
            store,
            config,
        }
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    /// Register a job for an upload already on disk and start its pipeline.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, upload: PathBuf, specs: BookSpecs, segmentation: Segmentation) -> JobId {
        self.submit_with_id(new_job_id(), upload, specs, segmentation)
    }

    fn submit_with_id(
        &self,
        job_id: JobId,
        upload: PathBuf,
        specs: BookSpecs,
        segmentation: Segmentation,
    ) -> JobId {
        self.store
            .insert(Job::new(job_id.clone(), upload, specs, segmentation));
        info!(job_id = %job_id, "Job submitted");

        let driver = self.driver.clone();
        let id = job_id.clone();
        let span = info_span!("job", job_id = %id);
        tokio::spawn(async move { driver.run(&id).await }.instrument(span));
        job_id
    }

    /// Store an uploaded file under `upload_dir` and submit a job for it.
    ///
    /// The stored name is prefixed with the job id so concurrent uploads
    /// of the same file never collide.
    pub async fn submit_upload(
        &self,
        file_name: &str,
        bytes: &[u8],
        specs: BookSpecs,
        segmentation: Segmentation,
    ) -> Result<Submission, BookError> {
        let job_id = new_job_id();
        let name = sanitize_upload_name(file_name).unwrap_or_else(|| "upload.pdf".to_string());
        let source_name = format!("{job_id}-{name}");

        let dir = &self.config.upload_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| BookError::io(dir, e))?;
        let path = dir.join(&source_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| BookError::io(&path, e))?;

        let job_id = self.submit_with_id(job_id, path, specs, segmentation);
        Ok(Submission {
            job_id,
            source_name,
        })
    }

    pub fn get(&self, job_id: &str) -> Result<Job, BookError> {
        self.store
            .get(job_id)
            .ok_or_else(|| BookError::not_found(format!("Job {job_id}")))
    }

    pub fn snapshot(&self, job_id: &str) -> Result<JobSnapshot, BookError> {
        self.get(job_id).map(|j| j.snapshot())
    }

    /// Live progress for a job; see [`ProgressNotifier::watch`].
    pub fn watch(&self, job_id: &str) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        self.notifier.watch(job_id)
    }

    /// Path and download file name of a completed job's book.
    pub async fn download(&self, job_id: &str) -> Result<(PathBuf, String), BookError> {
        let not_ready = || BookError::not_found(format!("Book {job_id}"));
        let job = self.store.get(job_id).ok_or_else(not_ready)?;
        if job.status != JobStatus::Completed {
            return Err(not_ready());
        }
        let path = job.result_path.ok_or_else(not_ready)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(not_ready());
        }
        Ok((path, download_filename(job.title.as_deref().unwrap_or(""))))
    }

    /// Remove a job's book and illustrations; see [`manifest::delete_book`].
    pub async fn delete_book(&self, job_id: &str) -> Result<Vec<PathBuf>, BookError> {
        manifest::delete_book(&self.config, job_id).await
    }

    /// Resolve a stored upload by name.
    pub async fn source_path(&self, name: &str) -> Result<PathBuf, BookError> {
        let not_found = || BookError::not_found(format!("Source {name}"));
        let clean = sanitize_upload_name(name).filter(|n| n == name).ok_or_else(not_found)?;
        let path = self.config.upload_dir.join(clean);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(not_found()),
        }
    }

    pub async fn delete_source(&self, name: &str) -> Result<(), BookError> {
        let path = self.source_path(name).await?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| BookError::io(&path, e))?;
        info!(source = name, "Source deleted");
        Ok(())
    }
}

/// Reduce a client-supplied file name to a safe single path component.
///
/// Directory parts are dropped and only ASCII alphanumerics, `.`, `-`, `_`
/// and spaces survive. `None` if nothing usable is left.
pub fn sanitize_upload_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let clean: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ' '))
        .collect();
    let clean = clean.trim().trim_start_matches('.').to_string();
    if clean.is_empty() || clean.contains("..") {
        None
    } else {
        Some(clean)
    }
}

/// Download file name derived from the book title: alphanumerics and spaces only.
pub fn download_filename(title: &str) -> String {
    let clean: String = title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect();
    let clean = clean.split_whitespace().collect::<Vec<_>>().join(" ");
    if clean.is_empty() {
        "book.pdf".to_string()
    } else {
        format!("{clean}.pdf")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_names_are_sanitised() {
        assert_eq!(sanitize_upload_name("story.pdf").as_deref(), Some("story.pdf"));
        assert_eq!(sanitize_upload_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_upload_name("C:\\docs\\My Book.pdf").as_deref(), Some("My Book.pdf"));
        assert_eq!(sanitize_upload_name("..").as_deref(), None);
        assert_eq!(sanitize_upload_name("///").as_deref(), None);
        assert_eq!(sanitize_upload_name(".hidden").as_deref(), Some("hidden"));
    }

    #[test]
    fn download_names_keep_letters_and_spaces() {
        assert_eq!(download_filename("The Honest Boy!"), "The Honest Boy.pdf");
        assert_eq!(download_filename("  A / B: C  "), "A B C.pdf");
        assert_eq!(download_filename("???"), "book.pdf");
    }
}
