//! Concurrent-safe job store: the single source of truth for job progress.
//!
//! The map-level lock is only held for insert and lookup. Each job sits
//! behind its own `RwLock`, so the owning driver writing one job never
//! blocks readers of another, and readers always clone a whole, untorn
//! [`Job`].

use crate::job::{Job, JobId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::error;

/// Storage abstraction over job state.
///
/// Injected into the driver, the notifier, and the manager so tests (or a
/// future persistent backend) can swap the implementation.
pub trait JobStore: Send + Sync {
    /// Insert a new job, replacing any job with the same id.
    fn insert(&self, job: Job);

    /// Clone the current state of a job.
    fn get(&self, id: &str) -> Option<Job>;

    /// Apply `f` to a job under its write lock. Returns `false` if unknown.
    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Job)) -> bool;
}

/// In-memory [`JobStore`]. Job state is not persisted across restarts.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Arc<RwLock<Job>>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &str) -> Option<Arc<RwLock<Job>>> {
        match self.jobs.read() {
            Ok(jobs) => jobs.get(id).cloned(),
            Err(e) => {
                error!("RwLock poisoned reading jobs map: {e}");
                None
            }
        }
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&self, job: Job) {
        match self.jobs.write() {
            Ok(mut jobs) => {
                jobs.insert(job.id.clone(), Arc::new(RwLock::new(job)));
            }
            Err(e) => error!("RwLock poisoned writing jobs map: {e}"),
        }
    }

    fn get(&self, id: &str) -> Option<Job> {
        let slot = self.slot(id)?;
        let job = match slot.read() {
            Ok(job) => job.clone(),
            Err(e) => {
                error!(job_id = %id, "RwLock poisoned reading job: {e}");
                return None;
            }
        };
        Some(job)
    }

    fn update(&self, id: &str, f: &mut dyn FnMut(&mut Job)) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        let updated = match slot.write() {
            Ok(mut job) => {
                f(&mut *job);
                true
            }
            Err(e) => {
                error!(job_id = %id, "RwLock poisoned writing job: {e}");
                false
            }
        };
        updated
    }
}
