//! Per-job manifest: the durable record of the files a job produced.
//!
//! The manifest is written by the driver's cleanup step and read only by
//! [`delete_book`]. It is the one piece of state that survives a restart.

use crate::config::ForgeConfig;
use crate::error::BookError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Artifact paths associated with one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub job_id: String,
    /// The assembled book, if assembly succeeded.
    pub artifact: Option<PathBuf>,
    /// Illustration files, in page order.
    pub images: Vec<PathBuf>,
    pub created_at: DateTime<Utc>,
}

/// Job ids end up in file names; only accept what [`crate::job::new_job_id`] produces.
pub fn is_safe_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

impl Manifest {
    pub fn new(job_id: impl Into<String>, artifact: Option<PathBuf>, images: Vec<PathBuf>) -> Self {
        Self {
            job_id: job_id.into(),
            artifact,
            images,
            created_at: Utc::now(),
        }
    }

    pub fn has_artifacts(&self) -> bool {
        self.artifact.is_some() || !self.images.is_empty()
    }

    pub fn path_for(dir: &Path, job_id: &str) -> PathBuf {
        dir.join(format!("{job_id}.json"))
    }

    pub async fn write(&self, dir: &Path) -> Result<PathBuf, BookError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| BookError::io(dir, e))?;
        let path = Self::path_for(dir, &self.job_id);
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| BookError::Internal(format!("manifest serialisation: {e}")))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| BookError::io(&path, e))?;
        debug!(path = %path.display(), "Manifest written");
        Ok(path)
    }

    /// Read a job's manifest. `Ok(None)` when there is none.
    pub async fn read(dir: &Path, job_id: &str) -> Result<Option<Self>, BookError> {
        let path = Self::path_for(dir, job_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(BookError::io(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| BookError::Internal(format!("corrupt manifest '{}': {e}", path.display())))
    }
}

/// Remove a file, treating "already gone" as success. Returns whether it existed.
async fn remove_if_exists(path: &Path) -> Result<bool, BookError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BookError::io(path, e)),
    }
}

/// Delete everything a job produced.
///
/// With a manifest: the book and every listed illustration (missing files are
/// skipped), then the manifest itself. Without one: the conventionally named
/// `book_{id}.pdf`. Returns the files actually removed; `NotFound` when there
/// was nothing to remove.
pub async fn delete_book(config: &ForgeConfig, job_id: &str) -> Result<Vec<PathBuf>, BookError> {
    if !is_safe_id(job_id) {
        return Err(BookError::not_found(format!("Book {job_id}")));
    }

    let mut removed = Vec::new();
    match Manifest::read(&config.manifest_dir, job_id).await? {
        Some(manifest) => {
            let files = manifest.artifact.iter().chain(manifest.images.iter());
            for file in files {
                if remove_if_exists(file).await? {
                    removed.push(file.clone());
                }
            }
            let manifest_path = Manifest::path_for(&config.manifest_dir, job_id);
            remove_if_exists(&manifest_path).await?;
            removed.push(manifest_path);
        }
        None => {
            let book = config.book_path(job_id);
            if remove_if_exists(&book).await? {
                removed.push(book);
            } else {
                return Err(BookError::not_found(format!("Book {job_id}")));
            }
        }
    }

    info!(job_id, files = removed.len(), "Book deleted");
    Ok(removed)
}
