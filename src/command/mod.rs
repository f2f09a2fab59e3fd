//! Job → Stage → Task pipeline.

pub mod cache;
pub mod context;
pub mod job;
pub mod stage;
pub mod stage_builder;
pub mod task;

pub use context::{
    ClusterCommandDto, ClusterScope, CommandDto, ComponentHostsDto, HostCommandDto, JobContext,
    ServiceCommandDto, StageContext, TaskContext,
};
pub use job::{Job, JobKind};
pub use stage::{Stage, StageBehavior, StageKind, Targeting, TaskOutcome};
pub use stage_builder::{ComponentHosts, PHASE_ORDER, StagePlan, plan_component_stages};
pub use task::Task;

use crate::error::Result;
use crate::protocol::AgentClient;
use crate::repository::{
    ClusterRepository, DbPool, HostComponentRepository, HostRepository, JobRepository,
    StageRepository, TaskRepository,
};
use crate::stack::StackMetadata;
use std::sync::Arc;

/// Everything a running job needs: repositories, stack metadata and the agent client.
#[derive(Clone)]
pub struct CommandRuntime {
    pub jobs: JobRepository,
    pub stages: StageRepository,
    pub tasks: TaskRepository,
    pub clusters: ClusterRepository,
    pub hosts: HostRepository,
    pub host_components: HostComponentRepository,
    pub stack: Arc<StackMetadata>,
    pub agent_client: Arc<dyn AgentClient>,
    pub default_agent_port: u16,
}

impl CommandRuntime {
    pub fn new(
        pool: DbPool,
        stack: Arc<StackMetadata>,
        agent_client: Arc<dyn AgentClient>,
        default_agent_port: u16,
    ) -> Self {
        Self {
            jobs: JobRepository::new(pool.clone()),
            stages: StageRepository::new(pool.clone()),
            tasks: TaskRepository::new(pool.clone()),
            clusters: ClusterRepository::new(pool.clone()),
            hosts: HostRepository::new(pool.clone()),
            host_components: HostComponentRepository::new(pool),
            stack,
            agent_client,
            default_agent_port,
        }
    }

    /// Port of the agent on `hostname`, falling back to the configured default.
    pub async fn agent_port(&self, hostname: &str) -> Result<u16> {
        let port = self
            .hosts
            .find_by_hostname(hostname)
            .await?
            .and_then(|host| u16::try_from(host.agent_port).ok())
            .unwrap_or(self.default_agent_port);
        Ok(port)
    }
}
