use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use mender_common::{Job, JobId, JobPhase, JobRequest, JobStatus, Results};

use crate::errors::HealerError;

/// Keyed store of job records.
///
/// Readers always get a full copy of one record; every mutation replaces the
/// stored record as a whole, so a reader never sees a half-applied update.
/// Completed jobs are immutable.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, id: JobId, request: JobRequest) -> Result<Job, HealerError>;

    async fn get(&self, id: JobId) -> Result<Job, HealerError>;

    async fn append_event(
        &self,
        id: JobId,
        iteration: u32,
        status: JobStatus,
        message: &str,
    ) -> Result<(), HealerError>;

    async fn set_phase(&self, id: JobId, phase: JobPhase) -> Result<(), HealerError>;

    async fn complete(&self, id: JobId, results: Results) -> Result<(), HealerError>;
}

/// Process-local store. Jobs are lost on restart.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` to a copy of the record and swap the copy in.
    async fn update<F>(&self, id: JobId, f: F) -> Result<(), HealerError>
    where
        F: FnOnce(&mut Job) + Send,
    {
        let mut jobs = self.jobs.write().await;
        let current = jobs.get(&id).ok_or(HealerError::JobNotFound { id })?;
        if current.is_completed() {
            return Err(HealerError::JobCompleted { id });
        }
        let mut next = current.clone();
        f(&mut next);
        jobs.insert(id, next);
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, id: JobId, request: JobRequest) -> Result<Job, HealerError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&id) {
            return Err(HealerError::DuplicateJob { id });
        }
        let job = Job::new(id, request);
        jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Job, HealerError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(HealerError::JobNotFound { id })
    }

    async fn append_event(
        &self,
        id: JobId,
        iteration: u32,
        status: JobStatus,
        message: &str,
    ) -> Result<(), HealerError> {
        let message = message.to_string();
        self.update(id, move |job| job.record_event(iteration, status, message))
            .await
    }

    async fn set_phase(&self, id: JobId, phase: JobPhase) -> Result<(), HealerError> {
        self.update(id, move |job| job.phase = phase).await
    }

    async fn complete(&self, id: JobId, results: Results) -> Result<(), HealerError> {
        self.update(id, move |job| job.complete(results)).await
    }
}
