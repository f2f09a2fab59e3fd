use crate::command::{CommandRuntime, Job};
use crate::models::ExecutionState;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Runs submitted jobs in the background, bounded by a permit pool.
#[derive(Clone)]
pub struct JobScheduler {
    runtime: CommandRuntime,
    permits: Arc<Semaphore>,
}

impl JobScheduler {
    pub fn new(runtime: CommandRuntime, max_concurrent_jobs: usize) -> Self {
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    pub fn runtime(&self) -> &CommandRuntime {
        &self.runtime
    }

    /// Queues the job and returns a handle resolving to its final state.
    pub fn submit(&self, mut job: Job) -> JoinHandle<ExecutionState> {
        let runtime = self.runtime.clone();
        let permits = self.permits.clone();
        tracing::info!("Job {} [{}] queued", job.id(), job.name());

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::error!("Scheduler closed before job {} could run: {}", job.id(), e);
                    return job.state();
                }
            };
            job.run(&runtime).await
        })
    }
}
