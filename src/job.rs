//! Job data model: one end-to-end request to turn a source document into a book.
//!
//! A [`Job`] only ever moves forward along
//! `Pending → Processing → {Completed | Failed}`. The mutators on [`Job`]
//! enforce that ordering and keep `progress` non-decreasing, so any reader
//! taking a snapshot sees a consistent, never-regressing view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Opaque job identifier (a v4 UUID rendered as a string).
pub type JobId = String;

/// Allocate a fresh job identifier.
pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects the forward-only lifecycle.
    ///
    /// Staying in `Processing` is allowed (message/progress updates).
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

/// Generation parameters chosen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSpecs {
    pub theme: String,
    /// Humor level, 0–10.
    pub humor: u8,
    pub age_group: String,
}

impl BookSpecs {
    pub fn new(theme: impl Into<String>, humor: i64, age_group: impl Into<String>) -> Self {
        Self {
            theme: theme.into(),
            humor: humor.clamp(0, 10) as u8,
            age_group: age_group.into(),
        }
    }
}

/// Which part of the source document to draw the story from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segmentation {
    pub section_description: Option<String>,
    pub additional_context: Option<String>,
    /// First source page, 1-indexed, inclusive.
    pub page_start: Option<u32>,
    /// Last source page, 1-indexed, inclusive.
    pub page_end: Option<u32>,
}

/// One page of the generated book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub text: String,
    pub image_prompt: String,
    /// Empty until illustrated, and empty when illustration failed.
    pub image_path: String,
}

impl Page {
    pub fn new(text: impl Into<String>, image_prompt: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image_prompt: image_prompt.into(),
            image_path: String::new(),
        }
    }
}

/// Full state of one job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub specs: BookSpecs,
    pub segmentation: Segmentation,
    /// Temporary upload the pipeline reads from.
    pub upload: PathBuf,
    pub pages: Vec<Page>,
    pub title: Option<String>,
    pub result_path: Option<PathBuf>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// A freshly submitted job: `Pending`, progress 0.
    pub fn new(id: JobId, upload: PathBuf, specs: BookSpecs, segmentation: Segmentation) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            progress: 0,
            message: "Queued".to_string(),
            specs,
            segmentation,
            upload,
            pages: Vec::new(),
            title: None,
            result_path: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Enter or stay in `Processing`, raising progress to at least `progress`.
    ///
    /// Returns `false` (and changes nothing) if the job is already terminal.
    pub fn advance(&mut self, progress: u8, message: impl Into<String>) -> bool {
        if !self.status.can_transition_to(JobStatus::Processing) {
            return false;
        }
        self.status = JobStatus::Processing;
        self.progress = self.progress.max(progress.min(99));
        self.message = message.into();
        true
    }

    /// Mark the job completed with its assembled artifact.
    pub fn complete(&mut self, result_path: PathBuf, message: impl Into<String>) -> bool {
        if !self.status.can_transition_to(JobStatus::Completed) {
            return false;
        }
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.message = message.into();
        self.result_path = Some(result_path);
        true
    }

    /// Mark the job failed. Progress is left where the pipeline stopped.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if !self.status.can_transition_to(JobStatus::Failed) {
            return false;
        }
        let error = error.into();
        self.status = JobStatus::Failed;
        self.message = format!("Error: {error}");
        self.error = Some(error);
        true
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            status: self.status,
            progress: self.progress,
            message: self.message.clone(),
            result_ref: (self.status == JobStatus::Completed)
                .then(|| format!("/download/{}", self.id)),
            title: self.title.clone(),
            error: self.error.clone(),
        }
    }
}

/// What clients see of a job: the progress stream and snapshot endpoints
/// serialise this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub result_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(
            new_job_id(),
            PathBuf::from("upload.pdf"),
            BookSpecs::new("Honesty", 5, "6-8"),
            Segmentation::default(),
        )
    }

    #[test]
    fn new_job_is_pending() {
        let j = job();
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.progress, 0);
        assert!(j.result_path.is_none());
    }

    #[test]
    fn humor_is_clamped() {
        assert_eq!(BookSpecs::new("t", 42, "a").humor, 10);
        assert_eq!(BookSpecs::new("t", -3, "a").humor, 0);
    }

    #[test]
    fn progress_never_decreases() {
        let mut j = job();
        assert!(j.advance(40, "drafting"));
        assert!(j.advance(20, "late writer"));
        assert_eq!(j.progress, 40);
        assert_eq!(j.message, "late writer");
    }

    #[test]
    fn processing_progress_stays_below_100() {
        let mut j = job();
        j.advance(250, "overshoot");
        assert_eq!(j.progress, 99);
    }

    #[test]
    fn terminal_status_is_sticky() {
        let mut j = job();
        j.advance(10, "start");
        assert!(j.complete(PathBuf::from("book.pdf"), "done"));
        assert!(!j.fail("too late"));
        assert!(!j.advance(50, "again"));
        assert_eq!(j.status, JobStatus::Completed);
        assert_eq!(j.progress, 100);
    }

    #[test]
    fn pending_cannot_jump_to_terminal() {
        let mut j = job();
        assert!(!j.complete(PathBuf::from("book.pdf"), "done"));
        assert!(!j.fail("boom"));
        assert_eq!(j.status, JobStatus::Pending);
    }

    #[test]
    fn result_ref_only_when_completed() {
        let mut j = job();
        j.advance(10, "start");
        assert!(j.snapshot().result_ref.is_none());
        j.complete(PathBuf::from("book.pdf"), "done");
        let snap = j.snapshot();
        assert_eq!(snap.result_ref, Some(format!("/download/{}", j.id)));
    }

    #[test]
    fn failed_job_records_error_and_message() {
        let mut j = job();
        j.advance(10, "start");
        j.fail("extraction produced no text");
        assert_eq!(j.error.as_deref(), Some("extraction produced no text"));
        assert!(j.message.starts_with("Error:"));
        assert_eq!(j.progress, 10);
    }

    #[test]
    fn snapshot_serialises_camel_case() {
        let mut j = job();
        j.advance(10, "start");
        let value = serde_json::to_value(j.snapshot()).unwrap();
        assert_eq!(value["status"], "processing");
        assert!(value.get("resultRef").is_some());
        assert!(value.get("title").is_none());
    }
}
