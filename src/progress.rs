//! Progress notifier: a live, polling view of one job.
//!
//! [`ProgressNotifier::watch`] re-reads the job from the store on a fixed
//! interval and yields a [`ProgressEvent`] per tick. The stream ends right
//! after the first terminal snapshot, or immediately after a single
//! not-found event when the id is unknown.
//!
//! # Why polling?
//!
//! The driver writes to the store and nothing else; it does not know who is
//! watching. Re-reading on an interval needs no per-job channels or
//! condition variables, at the cost of up to one interval of latency.
//!
//! # Cancellation
//!
//! The stream is lazy. Its timer lives inside the stream, so dropping it
//! (for instance when an SSE client disconnects) stops the polling.
//!
//! # Example
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use storyforge::{MemoryJobStore, ProgressNotifier};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let notifier = ProgressNotifier::new(Arc::new(MemoryJobStore::new()), Duration::from_secs(1));
//! let mut events = Box::pin(notifier.watch("some-job-id"));
//! while let Some(event) = events.next().await {
//!     println!("{}", serde_json::to_string(&event).unwrap());
//! }
//! # }
//! ```

use crate::job::JobSnapshot;
use crate::store::JobStore;
use futures::Stream;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// One item of a progress stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    Snapshot(JobSnapshot),
    /// Serialises as `{"error":"Job not found"}`.
    NotFound { error: String },
}

impl ProgressEvent {
    fn not_found() -> Self {
        ProgressEvent::NotFound {
            error: "Job not found".to_string(),
        }
    }

    /// Whether the stream ends after this event.
    pub fn is_final(&self) -> bool {
        match self {
            ProgressEvent::Snapshot(s) => s.status.is_terminal(),
            ProgressEvent::NotFound { .. } => true,
        }
    }
}

/// Produces progress streams over a shared [`JobStore`].
#[derive(Clone)]
pub struct ProgressNotifier {
    store: Arc<dyn JobStore>,
    interval: Duration,
}

impl ProgressNotifier {
    pub fn new(store: Arc<dyn JobStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Stream snapshots of `job_id` until it reaches a terminal status.
    pub fn watch(&self, job_id: &str) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let store = Arc::clone(&self.store);
        let interval = self.interval;
        let job_id = job_id.to_string();

        async_stream::stream! {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let event = match store.get(&job_id) {
                    Some(job) => ProgressEvent::Snapshot(job.snapshot()),
                    None => ProgressEvent::not_found(),
                };
                let done = event.is_final();
                yield event;
                if done {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{BookSpecs, Job, JobStatus, Segmentation};
    use crate::store::MemoryJobStore;
    use futures::StreamExt;
    use std::path::PathBuf;

    fn notifier(store: Arc<MemoryJobStore>) -> ProgressNotifier {
        ProgressNotifier::new(store, Duration::from_millis(5))
    }

    fn job(id: &str) -> Job {
        Job::new(
            id.into(),
            PathBuf::from("u.pdf"),
            BookSpecs::new("Patience", 2, "4-6"),
            Segmentation::default(),
        )
    }

    #[tokio::test]
    async fn unknown_job_yields_one_error() {
        let store = Arc::new(MemoryJobStore::new());
        let events: Vec<_> = notifier(store).watch("missing").collect().await;
        assert_eq!(events.len(), 1);
        let json = serde_json::to_value(&events[0]).unwrap();
        assert_eq!(json, serde_json::json!({"error": "Job not found"}));
    }

    #[tokio::test]
    async fn terminal_job_yields_single_snapshot() {
        let store = Arc::new(MemoryJobStore::new());
        let mut j = job("done");
        j.advance(50, "working");
        j.complete(PathBuf::from("b.pdf"), "finished");
        store.insert(j);

        let events: Vec<_> = notifier(store).watch("done").collect().await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            ProgressEvent::Snapshot(s) => {
                assert_eq!(s.status, JobStatus::Completed);
                assert_eq!(s.result_ref.as_deref(), Some("/download/done"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_follows_job_to_completion() {
        let store = Arc::new(MemoryJobStore::new());
        store.insert(job("live"));

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for p in [10u8, 25, 40, 90] {
                    store.update("live", &mut |j| {
                        j.advance(p, format!("at {p}"));
                    });
                    tokio::time::sleep(Duration::from_millis(8)).await;
                }
                store.update("live", &mut |j| {
                    j.complete(PathBuf::from("b.pdf"), "done");
                });
            })
        };

        let events: Vec<_> = notifier(Arc::clone(&store)).watch("live").collect().await;
        writer.await.unwrap();

        let progress: Vec<u8> = events
            .iter()
            .map(|e| match e {
                ProgressEvent::Snapshot(s) => s.progress,
                ProgressEvent::NotFound { .. } => panic!("job vanished"),
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
        assert_eq!(progress.last(), Some(&100));
        assert!(events.last().unwrap().is_final());
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_polling() {
        let store = Arc::new(MemoryJobStore::new());
        store.insert(job("slow"));
        let mut stream = Box::pin(notifier(Arc::clone(&store)).watch("slow"));
        let first = stream.next().await.unwrap();
        assert!(!first.is_final());
        drop(stream);
        // only the test's own handle remains once the stream is gone
        assert_eq!(Arc::strong_count(&store), 1);
    }
}
