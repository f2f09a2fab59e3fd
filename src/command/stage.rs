use super::context::{HOSTNAMES_PROPERTY, StageContext};
use super::task::Task;
use super::CommandRuntime;
use crate::error::{AppError, Result};
use crate::models::{Command, ExecutionState};
use crate::protocol::CommandType;
use crate::repository::NewStage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageKind {
    ComponentAdd,
    ComponentConfigure,
    ComponentInit,
    ComponentStart,
    ComponentPrepare,
    ComponentCheck,
    ComponentStop,
    ComponentCustom,
    HostCheck,
    CacheFileUpdate,
    SetupJdk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Targeting {
    AllHosts,
    FirstHost,
}

/// Static behavior of a stage kind.
#[derive(Debug, Clone, Copy)]
pub struct StageBehavior {
    pub command: Command,
    pub custom_command: Option<&'static str>,
    pub command_type: CommandType,
    pub targeting: Targeting,
    /// Client components have no daemon to start, stop, check or prepare.
    pub skips_clients: bool,
    pub label: &'static str,
}

const fn component(command: Command, targeting: Targeting, skips_clients: bool, label: &'static str) -> StageBehavior {
    StageBehavior {
        command,
        custom_command: None,
        command_type: CommandType::Component,
        targeting,
        skips_clients,
        label,
    }
}

impl StageKind {
    pub fn for_command(command: Command) -> Result<Self> {
        match command {
            Command::Add => Ok(StageKind::ComponentAdd),
            Command::Configure => Ok(StageKind::ComponentConfigure),
            Command::Init => Ok(StageKind::ComponentInit),
            Command::Start => Ok(StageKind::ComponentStart),
            Command::Prepare => Ok(StageKind::ComponentPrepare),
            Command::Check => Ok(StageKind::ComponentCheck),
            Command::Stop => Ok(StageKind::ComponentStop),
            Command::Custom => Ok(StageKind::ComponentCustom),
            Command::Restart | Command::Status => Err(AppError::UnsupportedCommand(format!(
                "{} cannot be planned as a single stage",
                command
            ))),
        }
    }

    pub fn behavior(self) -> StageBehavior {
        use Targeting::{AllHosts, FirstHost};
        match self {
            StageKind::ComponentAdd => component(Command::Add, AllHosts, false, "Add"),
            StageKind::ComponentConfigure => component(Command::Configure, AllHosts, false, "Configure"),
            StageKind::ComponentInit => component(Command::Init, FirstHost, false, "Init"),
            StageKind::ComponentStart => component(Command::Start, AllHosts, true, "Start"),
            StageKind::ComponentPrepare => component(Command::Prepare, FirstHost, true, "Prepare"),
            StageKind::ComponentCheck => component(Command::Check, FirstHost, true, "Check"),
            StageKind::ComponentStop => component(Command::Stop, AllHosts, true, "Stop"),
            StageKind::ComponentCustom => component(Command::Custom, AllHosts, false, "Run"),
            StageKind::HostCheck => StageBehavior {
                command: Command::Check,
                custom_command: None,
                command_type: CommandType::HostCheck,
                targeting: AllHosts,
                skips_clients: false,
                label: "Check Hosts",
            },
            StageKind::CacheFileUpdate => StageBehavior {
                command: Command::Custom,
                custom_command: Some("update_cache_files"),
                command_type: CommandType::UpdateCacheFiles,
                targeting: AllHosts,
                skips_clients: false,
                label: "Update Cache Files",
            },
            StageKind::SetupJdk => StageBehavior {
                command: Command::Custom,
                custom_command: Some("setup_jdk"),
                command_type: CommandType::SetupJdk,
                targeting: AllHosts,
                skips_clients: false,
                label: "Setup JDK",
            },
        }
    }

    pub fn is_component_stage(self) -> bool {
        self.behavior().command_type == CommandType::Component
    }

    pub fn display_name(self, component_display: &str) -> String {
        let behavior = self.behavior();
        if self.is_component_stage() {
            format!("{} {}", behavior.label, component_display)
        } else {
            behavior.label.to_string()
        }
    }
}

/// Result of one task run inside a stage.
#[derive(Debug)]
pub struct TaskOutcome {
    pub task: Task,
    pub success: bool,
}

pub struct Stage {
    id: i64,
    job_id: i64,
    name: String,
    kind: StageKind,
    context: StageContext,
    tasks: Vec<Task>,
    state: ExecutionState,
}

impl Stage {
    /// Persists the stage and one pending task per target host.
    pub async fn create(
        rt: &CommandRuntime,
        job_id: i64,
        attempt: i64,
        stage_order: i64,
        kind: StageKind,
        mut context: StageContext,
        custom_command: Option<&str>,
    ) -> Result<Self> {
        let display = match rt.stack.component(&context.component_name) {
            Ok(component) => component.display_name.clone(),
            Err(_) => context.component_name.clone(),
        };
        let name = kind.display_name(&display);

        if kind == StageKind::CacheFileUpdate && !context.properties.contains_key(HOSTNAMES_PROPERTY) {
            context
                .properties
                .insert(HOSTNAMES_PROPERTY.to_string(), serde_json::to_value(&context.hostnames)?);
        }

        let record = rt
            .stages
            .create(NewStage {
                job_id,
                attempt,
                stage_order,
                name: name.clone(),
                service_name: context.service_name.clone(),
                component_name: context.component_name.clone(),
                context: serde_json::to_string(&context)?,
            })
            .await?;

        let custom_command = kind.behavior().custom_command.or(custom_command);
        let mut tasks = Vec::with_capacity(context.hostnames.len());
        for hostname in &context.hostnames {
            let task_context = context.task_context(hostname);
            tasks.push(Task::create(rt, job_id, record.id, kind, task_context, custom_command).await?);
        }

        Ok(Self {
            id: record.id,
            job_id,
            name,
            kind,
            context,
            tasks,
            state: ExecutionState::Pending,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn context(&self) -> &StageContext {
        &self.context
    }

    /// Runs every task to completion and reports whether all of them succeeded.
    pub async fn run(&mut self, rt: &CommandRuntime) -> bool {
        match rt
            .stages
            .transition(self.id, ExecutionState::Pending, ExecutionState::Processing)
            .await
        {
            Ok(true) => self.state = ExecutionState::Processing,
            Ok(false) => {
                tracing::warn!("Stage {} of job {} is no longer pending", self.id, self.job_id);
                return false;
            }
            Err(e) => {
                tracing::error!("Failed to start stage {}: {}", self.id, e);
                return false;
            }
        }
        tracing::info!("Running stage {} [{}] of job {}", self.id, self.name, self.job_id);

        let failed_hosts = self.run_tasks(rt).await;
        let success = failed_hosts.is_empty();
        let (state, message) = if success {
            (ExecutionState::Successful, None)
        } else {
            (
                ExecutionState::Failed,
                Some(format!("Failed on hosts: {}", failed_hosts.join(", "))),
            )
        };

        if let Err(e) = rt.stages.finish(self.id, state, message.as_deref()).await {
            tracing::error!("Failed to persist state of stage {}: {}", self.id, e);
        }
        self.state = state;

        if success {
            self.on_success();
        } else {
            self.on_failure(&failed_hosts);
        }
        success
    }

    /// Fans out one tokio task per host and waits for all of them.
    async fn run_tasks(&mut self, rt: &CommandRuntime) -> Vec<String> {
        let tasks = std::mem::take(&mut self.tasks);
        let mut unfinished: HashMap<i64, String> = tasks
            .iter()
            .map(|task| (task.id(), task.hostname().to_string()))
            .collect();

        let mut set = JoinSet::new();
        for mut task in tasks {
            let rt = rt.clone();
            set.spawn(async move {
                let success = task.run(&rt).await;
                TaskOutcome { task, success }
            });
        }

        let mut outcomes = Vec::with_capacity(unfinished.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(outcome) => {
                    unfinished.remove(&outcome.task.id());
                    outcomes.push(outcome);
                }
                Err(e) => tracing::error!("Task of stage {} aborted: {}", self.id, e),
            }
        }

        let mut failed_hosts = Vec::new();
        for (task_id, hostname) in unfinished {
            if let Err(e) = rt
                .tasks
                .finish(task_id, ExecutionState::Failed, None, Some("Task aborted unexpectedly"))
                .await
            {
                tracing::error!("Failed to persist state of task {}: {}", task_id, e);
            }
            failed_hosts.push(hostname);
        }

        outcomes.sort_by_key(|outcome| outcome.task.id());
        for outcome in outcomes {
            if !outcome.success {
                failed_hosts.push(outcome.task.hostname().to_string());
            }
            self.tasks.push(outcome.task);
        }
        failed_hosts.sort();
        failed_hosts
    }

    fn on_success(&self) {
        tracing::info!("Stage {} [{}] succeeded on {} hosts", self.id, self.name, self.tasks.len());
    }

    fn on_failure(&self, failed_hosts: &[String]) {
        tracing::error!(
            "Stage {} [{}] failed on {} of {} hosts: {}",
            self.id,
            self.name,
            failed_hosts.len(),
            self.context.hostnames.len(),
            failed_hosts.join(", ")
        );
    }
}
