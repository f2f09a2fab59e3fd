use super::{JobScheduler, SubmittedJob};
use crate::command::{Job, JobContext};
use crate::error::{AppError, Result};
use crate::models::{ExecutionState, JobRecord, StageRecord, TaskRecord};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct StageDetail {
    #[serde(flatten)]
    pub stage: StageRecord,
    pub tasks: Vec<TaskRecord>,
}

/// A job with the stages and tasks of its current attempt.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: JobRecord,
    pub stages: Vec<StageDetail>,
}

#[derive(Clone)]
pub struct JobService {
    scheduler: JobScheduler,
}

impl JobService {
    pub fn new(scheduler: JobScheduler) -> Self {
        Self { scheduler }
    }

    pub async fn get(&self, id: i64) -> Result<JobDetail> {
        let rt = self.scheduler.runtime();
        let job = rt.jobs.get(id).await?;

        let mut stages = Vec::new();
        for stage in rt.stages.list_by_job(id, job.attempt).await? {
            let tasks = rt.tasks.list_by_stage(stage.id).await?;
            stages.push(StageDetail { stage, tasks });
        }
        Ok(JobDetail { job, stages })
    }

    pub async fn list(&self) -> Result<Vec<JobRecord>> {
        self.scheduler.runtime().jobs.list_all().await
    }

    /// Re-runs a FAILED job as a new attempt, skipping its one-time side effects.
    pub async fn retry(&self, id: i64) -> Result<SubmittedJob> {
        let rt = self.scheduler.runtime();
        let record = rt.jobs.get(id).await?;
        if record.state != ExecutionState::Failed {
            return Err(AppError::JobNotRetryable {
                id,
                state: record.state,
            });
        }

        let mut context: JobContext = serde_json::from_str(&record.context)?;
        context.retry_flag = true;
        if !rt.jobs.begin_retry(id, &serde_json::to_string(&context)?).await? {
            let current = rt.jobs.get(id).await?;
            return Err(AppError::JobNotRetryable {
                id,
                state: current.state,
            });
        }

        let record = rt.jobs.get(id).await?;
        let job = match Job::recreate(rt, &record, context).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!("Failed to rebuild job {} for retry: {}", id, e);
                rt.jobs.finish(id, ExecutionState::Failed).await?;
                return Err(e);
            }
        };
        tracing::info!("Retrying job {} as attempt {}", id, record.attempt);

        let handle = self.scheduler.submit(job);
        Ok(SubmittedJob { record, handle })
    }

    /// Cancels a job that has not started. Stages and tasks of its current attempt follow.
    pub async fn cancel(&self, id: i64) -> Result<JobRecord> {
        let rt = self.scheduler.runtime();
        let record = rt.jobs.get(id).await?;

        let canceled = rt
            .jobs
            .transition(id, ExecutionState::Pending, ExecutionState::Canceled)
            .await?;
        if !canceled {
            let current = rt.jobs.get(id).await?;
            return Err(AppError::JobNotCancelable {
                id,
                state: current.state,
            });
        }

        let stages = rt.stages.cancel_pending(id, record.attempt).await?;
        let tasks = rt.tasks.cancel_pending(id, record.attempt).await?;
        tracing::info!("Canceled job {} with {} stages and {} tasks", id, stages, tasks);

        rt.jobs.get(id).await
    }
}
