use super::cache::build_cache_payload;
use super::context::{CONFIGURATIONS_PROPERTY, HOSTNAMES_PROPERTY, REPOS_PROPERTY, TaskContext};
use super::stage::StageKind;
use super::CommandRuntime;
use crate::error::{AppError, Result};
use crate::models::{ExecutionState, MaintainState};
use crate::protocol::{CommandReply, CommandRequest, ComponentCommandPayload, HostCheckPayload};
use crate::repository::NewTask;

/// One command against one host.
#[derive(Debug)]
pub struct Task {
    id: i64,
    job_id: i64,
    stage_id: i64,
    name: String,
    kind: StageKind,
    custom_command: Option<String>,
    context: TaskContext,
    content: Option<String>,
    state: ExecutionState,
}

impl Task {
    pub async fn create(
        rt: &CommandRuntime,
        job_id: i64,
        stage_id: i64,
        kind: StageKind,
        context: TaskContext,
        custom_command: Option<&str>,
    ) -> Result<Self> {
        let behavior = kind.behavior();
        let name = format!(
            "{} {} on {}",
            behavior.command.name(),
            context.component_name,
            context.hostname
        );

        let record = rt
            .tasks
            .create(NewTask {
                job_id,
                stage_id,
                name: name.clone(),
                hostname: context.hostname.clone(),
                service_name: context.service_name.clone(),
                component_name: context.component_name.clone(),
                command: behavior.command,
                custom_command: custom_command.map(str::to_string),
                context: serde_json::to_string(&context)?,
            })
            .await?;

        Ok(Self {
            id: record.id,
            job_id,
            stage_id,
            name,
            kind,
            custom_command: custom_command.map(str::to_string),
            context,
            content: None,
            state: ExecutionState::Pending,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn hostname(&self) -> &str {
        &self.context.hostname
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    /// Executes the remote call. Every failure ends as a FAILED task, never as an error.
    pub async fn run(&mut self, rt: &CommandRuntime) -> bool {
        if let Err(e) = self.before_run(rt).await {
            tracing::error!("Task {} could not start: {}", self.id, e);
            self.on_failure(rt, &e.to_string()).await;
            return false;
        }

        match self.do_run(rt).await {
            Ok(reply) if reply.is_success() => {
                self.on_success(rt, &reply).await;
                true
            }
            Ok(reply) => {
                tracing::warn!(
                    "Task {} failed on {} with code {}: {}",
                    self.id,
                    self.hostname(),
                    reply.code,
                    reply.result
                );
                self.on_failure(rt, &reply.result).await;
                false
            }
            Err(e) => {
                tracing::warn!("Task {} failed on {}: {}", self.id, self.hostname(), e);
                self.on_failure(rt, &e.to_string()).await;
                false
            }
        }
    }

    async fn before_run(&mut self, rt: &CommandRuntime) -> Result<()> {
        let started = rt
            .tasks
            .transition(self.id, ExecutionState::Pending, ExecutionState::Processing)
            .await?;
        if !started {
            return Err(AppError::Execution(format!("Task {} is no longer pending", self.id)));
        }
        self.state = ExecutionState::Processing;
        Ok(())
    }

    async fn do_run(&mut self, rt: &CommandRuntime) -> Result<CommandReply> {
        let request = self.build_request(rt).await?;
        self.content = Some(serde_json::to_string(&request)?);

        let port = rt.agent_port(self.hostname()).await?;
        tracing::debug!("Sending {} for task {} to {}:{}", request.command_type, self.id, self.hostname(), port);
        let reply = rt.agent_client.call(self.hostname(), port, &request).await?;
        if !reply.answers(&request) {
            return Err(AppError::Transport(format!(
                "Reply from {} is for task {} of stage {} job {}, expected task {}",
                self.hostname(),
                reply.task_id,
                reply.stage_id,
                reply.job_id,
                request.task_id
            )));
        }
        Ok(reply)
    }

    async fn build_request(&self, rt: &CommandRuntime) -> Result<CommandRequest> {
        let behavior = self.kind.behavior();
        let payload = match self.kind {
            StageKind::CacheFileUpdate => serde_json::to_string(&build_cache_payload(rt, &self.context).await?)?,
            StageKind::HostCheck => serde_json::to_string(&HostCheckPayload::default())?,
            StageKind::SetupJdk => "{}".to_string(),
            _ => serde_json::to_string(&self.component_payload())?,
        };

        Ok(CommandRequest {
            command_type: behavior.command_type,
            hostname: self.context.hostname.clone(),
            payload,
            task_id: self.id,
            stage_id: self.stage_id,
            job_id: self.job_id,
        })
    }

    fn component_payload(&self) -> ComponentCommandPayload {
        let mut properties = self.context.properties.clone();
        // delivered through the cache files instead
        for key in [REPOS_PROPERTY, CONFIGURATIONS_PROPERTY, HOSTNAMES_PROPERTY] {
            properties.remove(key);
        }

        ComponentCommandPayload {
            command: self.kind.behavior().command,
            custom_command: self.custom_command.clone(),
            service_name: self.context.service_name.clone(),
            service_user: self.context.service_user.clone(),
            service_group: self.context.user_group.clone(),
            component_name: self.context.component_name.clone(),
            stack_name: self.context.stack_name.clone(),
            stack_version: self.context.stack_version.clone(),
            root_dir: self.context.root_dir.clone(),
            properties,
        }
    }

    async fn on_success(&mut self, rt: &CommandRuntime, reply: &CommandReply) {
        self.persist(rt, ExecutionState::Successful, &reply.result).await;

        let Some(maintain_state) = MaintainState::after(self.kind.behavior().command) else {
            return;
        };
        if !self.kind.is_component_stage() {
            return;
        }
        let Some(cluster_id) = self.context.cluster_id else {
            return;
        };
        if let Err(e) = rt
            .host_components
            .upsert_state(
                cluster_id,
                &self.context.hostname,
                &self.context.service_name,
                &self.context.component_name,
                maintain_state,
            )
            .await
        {
            tracing::error!(
                "Failed to update {} on {} to {:?}: {}",
                self.context.component_name,
                self.context.hostname,
                maintain_state,
                e
            );
        }
    }

    async fn on_failure(&mut self, rt: &CommandRuntime, message: &str) {
        self.persist(rt, ExecutionState::Failed, message).await;
    }

    async fn persist(&mut self, rt: &CommandRuntime, state: ExecutionState, result: &str) {
        match rt
            .tasks
            .finish(self.id, state, self.content.as_deref(), Some(result))
            .await
        {
            Ok(true) => self.state = state,
            Ok(false) => tracing::warn!("Task {} already reached a terminal state", self.id),
            Err(e) => tracing::error!("Failed to persist state of task {}: {}", self.id, e),
        }
    }
}
