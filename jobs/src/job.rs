use dashmap::DashMap;
use hyperrec_core::model::now_millis;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::JobError;

pub const CANCELLED_MESSAGE: &str = "Cancelled by user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub num_workers: usize,
    /// Seeds per-task perturbations; `None` draws from entropy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            num_workers: 4,
            seed: None,
        }
    }
}

impl JobConfig {
    pub fn validate(&self) -> Result<(), JobError> {
        if self.epochs == 0 {
            return Err(JobError::InvalidConfig("epochs must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(JobError::InvalidConfig("batch_size must be positive".into()));
        }
        if self.num_workers == 0 {
            return Err(JobError::InvalidConfig("num_workers must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub current_epoch: usize,
    pub total_batches: usize,
    pub losses: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningJob {
    pub id: String,
    pub status: JobStatus,
    pub config: JobConfig,
    pub progress: JobProgress,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub error: Option<String>,
    #[serde(default)]
    pub cancel_requested: bool,
}

impl LearningJob {
    pub fn new(config: JobConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            config,
            progress: JobProgress::default(),
            created_at: now_millis(),
            started_at: None,
            completed_at: None,
            error: None,
            cancel_requested: false,
        }
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(message.into());
        self.completed_at = Some(now_millis());
    }
}

/// Shared job table. Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<String, LearningJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job: LearningJob) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn get(&self, id: &str) -> Option<LearningJob> {
        self.jobs.get(id).map(|job| job.value().clone())
    }

    /// All jobs, oldest first.
    pub fn list(&self) -> Vec<LearningJob> {
        let mut jobs: Vec<LearningJob> = self.jobs.iter().map(|entry| entry.value().clone()).collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    fn update<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut LearningJob) -> Result<T, JobError>,
    ) -> Result<T, JobError> {
        let mut job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        f(job.value_mut())
    }

    /// pending -> running
    pub fn mark_running(&self, id: &str, total_batches: usize) -> Result<LearningJob, JobError> {
        self.update(id, |job| {
            if job.status != JobStatus::Pending {
                return Err(JobError::InvalidTransition {
                    job_id: job.id.clone(),
                    from: job.status,
                    to: JobStatus::Running,
                });
            }
            job.status = JobStatus::Running;
            job.started_at = Some(now_millis());
            job.progress.total_batches = total_batches;
            info!(job_id = %job.id, "Learning job started");
            Ok(job.clone())
        })
    }

    pub fn set_epoch(&self, id: &str, epoch: usize) -> Result<(), JobError> {
        self.update(id, |job| {
            job.progress.current_epoch = epoch;
            Ok(())
        })
    }

    pub fn record_loss(&self, id: &str, loss: f32) -> Result<(), JobError> {
        self.update(id, |job| {
            job.progress.losses.push(loss);
            Ok(())
        })
    }

    /// running -> completed
    pub fn mark_completed(&self, id: &str) -> Result<LearningJob, JobError> {
        self.update(id, |job| {
            if job.status != JobStatus::Running {
                return Err(JobError::InvalidTransition {
                    job_id: job.id.clone(),
                    from: job.status,
                    to: JobStatus::Completed,
                });
            }
            job.status = JobStatus::Completed;
            job.completed_at = Some(now_millis());
            info!(job_id = %job.id, epochs = job.progress.losses.len(), "Learning job completed");
            Ok(job.clone())
        })
    }

    /// Any non-terminal state -> failed. A job that already finished keeps its outcome.
    pub fn mark_failed(&self, id: &str, message: &str) -> Result<LearningJob, JobError> {
        self.update(id, |job| {
            if !job.status.is_terminal() {
                job.fail(message);
                error!(job_id = %job.id, error = message, "Learning job failed");
            }
            Ok(job.clone())
        })
    }

    /// Pending jobs fail at once; running jobs are flagged and stopped by their training loop.
    pub fn request_cancel(&self, id: &str) -> Result<LearningJob, JobError> {
        self.update(id, |job| {
            match job.status {
                JobStatus::Pending => job.fail(CANCELLED_MESSAGE),
                JobStatus::Running => job.cancel_requested = true,
                JobStatus::Completed | JobStatus::Failed => {}
            }
            Ok(job.clone())
        })
    }

    pub fn cancel_requested(&self, id: &str) -> bool {
        self.jobs
            .get(id)
            .map(|job| job.cancel_requested)
            .unwrap_or(false)
    }
}
