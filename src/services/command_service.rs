use super::JobScheduler;
use crate::command::{CommandDto, Job, JobContext, JobKind};
use crate::error::{AppError, Result};
use crate::models::{Command, CommandLevel, ExecutionState, JobRecord};
use std::collections::BTreeSet;
use tokio::task::JoinHandle;

/// A job that has been persisted and handed to the scheduler.
#[derive(Debug)]
pub struct SubmittedJob {
    pub record: JobRecord,
    pub handle: JoinHandle<ExecutionState>,
}

#[derive(Clone)]
pub struct CommandService {
    scheduler: JobScheduler,
}

impl CommandService {
    pub fn new(scheduler: JobScheduler) -> Self {
        Self { scheduler }
    }

    /// Validates a command, persists its job as PENDING and queues it.
    pub async fn command(&self, dto: CommandDto) -> Result<SubmittedJob> {
        let kind = JobKind::resolve(dto.command_level, dto.command)?;
        self.validate(kind, &dto).await?;

        let rt = self.scheduler.runtime();
        let job = Job::create(rt, JobContext::new(dto)).await?;
        let record = rt.jobs.get(job.id()).await?;
        let handle = self.scheduler.submit(job);
        Ok(SubmittedJob { record, handle })
    }

    async fn validate(&self, kind: JobKind, dto: &CommandDto) -> Result<()> {
        if dto.command == Command::Custom
            && dto.custom_command.as_deref().is_none_or(|c| c.trim().is_empty())
        {
            return Err(invalid("custom_command is required for a custom command"));
        }

        match dto.command_level {
            CommandLevel::Cluster if kind == JobKind::ClusterAdd => {
                let cluster = dto
                    .cluster_command
                    .as_ref()
                    .ok_or_else(|| invalid("cluster_command is required"))?;
                if cluster.name.trim().is_empty() {
                    return Err(invalid("cluster name must not be empty"));
                }
                if dto.all_hostnames().is_empty() {
                    return Err(invalid("at least one host is required"));
                }
                return Ok(());
            }
            CommandLevel::Cluster => {}
            CommandLevel::Host => {
                if dto.host_commands.iter().all(|h| h.hostnames.is_empty()) {
                    return Err(invalid("host_commands must name at least one host"));
                }
            }
            CommandLevel::Service => {
                if dto.service_commands.is_empty() {
                    return Err(invalid("service_commands must not be empty"));
                }
            }
            CommandLevel::Component => {
                if dto.component_commands.iter().all(|c| c.hostnames.is_empty()) {
                    return Err(invalid("component_commands must name at least one host"));
                }
            }
        }

        let rt = self.scheduler.runtime();
        let cluster_id = match dto.cluster_id {
            Some(id) => id,
            None if kind == JobKind::HostCheck => return Ok(()),
            None => return Err(invalid("cluster_id is required")),
        };
        rt.clusters.get(cluster_id).await?;

        if kind == JobKind::ServiceAdd {
            self.check_required_services(cluster_id, dto).await?;
        }
        Ok(())
    }

    /// Every service being added must have its prerequisites installed or added alongside.
    async fn check_required_services(&self, cluster_id: i64, dto: &CommandDto) -> Result<()> {
        let rt = self.scheduler.runtime();
        let mut available: BTreeSet<String> = rt
            .host_components
            .list_by_cluster(cluster_id)
            .await?
            .into_iter()
            .map(|row| row.service_name)
            .collect();
        available.extend(dto.service_names());

        for service_name in dto.service_names() {
            let service = rt.stack.service(&service_name)?;
            let missing: Vec<&str> = service
                .required_services
                .iter()
                .filter(|required| !available.contains(&required.to_lowercase()))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(invalid(&format!(
                    "{} requires {} to be installed first",
                    service.display_name,
                    missing.join(", ")
                )));
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> AppError {
    AppError::InvalidCommand(message.to_string())
}
