use super::context::{
    CONFIGURATIONS_PROPERTY, ClusterScope, JobContext, PACKAGE_SPECIFICS_PROPERTY, REPOS_PROPERTY,
    StageContext,
};
use super::stage::{Stage, StageKind};
use super::stage_builder::{ComponentHosts, StagePlan, plan_component_stages};
use super::CommandRuntime;
use crate::error::{AppError, Result};
use crate::models::{Command, CommandLevel, ExecutionState, JobRecord, MaintainState};
use crate::repository::NewCluster;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    ClusterAdd,
    ClusterStart,
    ClusterStop,
    ClusterRestart,
    ClusterCheck,
    HostAdd,
    HostStart,
    HostStop,
    HostRestart,
    HostCheck,
    ServiceAdd,
    ServiceStart,
    ServiceStop,
    ServiceRestart,
    ServiceConfigure,
    ServiceCheck,
    ComponentAdd,
    ComponentStart,
    ComponentStop,
    ComponentRestart,
    ComponentConfigure,
    ComponentCheck,
    ComponentCustom,
}

/// Where a job finds the components it operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ComponentSource {
    /// The hosts named in the command.
    Command,
    /// Components already installed in the cluster.
    Installed,
}

const ADD_SERVICE_PHASES: &[&[Command]] = &[
    &[Command::Add],
    &[Command::Configure],
    &[Command::Init, Command::Start, Command::Prepare],
    &[Command::Check],
];
const ADD_COMPONENT_PHASES: &[&[Command]] = &[
    &[Command::Add],
    &[Command::Configure],
    &[Command::Init, Command::Start, Command::Prepare],
];
const START_PHASES: &[&[Command]] = &[&[Command::Start]];
const STOP_PHASES: &[&[Command]] = &[&[Command::Stop]];
const RESTART_PHASES: &[&[Command]] = &[&[Command::Stop], &[Command::Start]];
const CHECK_PHASES: &[&[Command]] = &[&[Command::Check]];
const CONFIGURE_PHASES: &[&[Command]] = &[&[Command::Configure]];
const CUSTOM_PHASES: &[&[Command]] = &[&[Command::Custom]];

impl JobKind {
    pub fn resolve(level: CommandLevel, command: Command) -> Result<Self> {
        use Command as C;
        use CommandLevel as L;

        let kind = match (level, command) {
            (L::Cluster, C::Add) => JobKind::ClusterAdd,
            (L::Cluster, C::Start) => JobKind::ClusterStart,
            (L::Cluster, C::Stop) => JobKind::ClusterStop,
            (L::Cluster, C::Restart) => JobKind::ClusterRestart,
            (L::Cluster, C::Check) => JobKind::ClusterCheck,
            (L::Host, C::Add) => JobKind::HostAdd,
            (L::Host, C::Start) => JobKind::HostStart,
            (L::Host, C::Stop) => JobKind::HostStop,
            (L::Host, C::Restart) => JobKind::HostRestart,
            (L::Host, C::Check) => JobKind::HostCheck,
            (L::Service, C::Add) => JobKind::ServiceAdd,
            (L::Service, C::Start) => JobKind::ServiceStart,
            (L::Service, C::Stop) => JobKind::ServiceStop,
            (L::Service, C::Restart) => JobKind::ServiceRestart,
            (L::Service, C::Configure) => JobKind::ServiceConfigure,
            (L::Service, C::Check) => JobKind::ServiceCheck,
            (L::Component, C::Add) => JobKind::ComponentAdd,
            (L::Component, C::Start) => JobKind::ComponentStart,
            (L::Component, C::Stop) => JobKind::ComponentStop,
            (L::Component, C::Restart) => JobKind::ComponentRestart,
            (L::Component, C::Configure) => JobKind::ComponentConfigure,
            (L::Component, C::Check) => JobKind::ComponentCheck,
            (L::Component, C::Custom) => JobKind::ComponentCustom,
            (level, command) => {
                return Err(AppError::UnsupportedCommand(format!(
                    "{} is not supported at {:?} level",
                    command, level
                )));
            }
        };
        Ok(kind)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            JobKind::ClusterAdd => "Add Cluster",
            JobKind::ClusterStart => "Start Cluster",
            JobKind::ClusterStop => "Stop Cluster",
            JobKind::ClusterRestart => "Restart Cluster",
            JobKind::ClusterCheck => "Check Cluster",
            JobKind::HostAdd => "Add Hosts",
            JobKind::HostStart => "Start Hosts",
            JobKind::HostStop => "Stop Hosts",
            JobKind::HostRestart => "Restart Hosts",
            JobKind::HostCheck => "Check Hosts",
            JobKind::ServiceAdd => "Add Services",
            JobKind::ServiceStart => "Start Services",
            JobKind::ServiceStop => "Stop Services",
            JobKind::ServiceRestart => "Restart Services",
            JobKind::ServiceConfigure => "Configure Services",
            JobKind::ServiceCheck => "Check Services",
            JobKind::ComponentAdd => "Add Components",
            JobKind::ComponentStart => "Start Components",
            JobKind::ComponentStop => "Stop Components",
            JobKind::ComponentRestart => "Restart Components",
            JobKind::ComponentConfigure => "Configure Components",
            JobKind::ComponentCheck => "Check Components",
            JobKind::ComponentCustom => "Run Custom Command",
        }
    }

    /// Component command groups, planned one group at a time and in this order.
    fn phases(self) -> &'static [&'static [Command]] {
        match self {
            JobKind::ServiceAdd => ADD_SERVICE_PHASES,
            JobKind::ComponentAdd => ADD_COMPONENT_PHASES,
            JobKind::ClusterStart | JobKind::HostStart | JobKind::ServiceStart | JobKind::ComponentStart => {
                START_PHASES
            }
            JobKind::ClusterStop | JobKind::HostStop | JobKind::ServiceStop | JobKind::ComponentStop => {
                STOP_PHASES
            }
            JobKind::ClusterRestart
            | JobKind::HostRestart
            | JobKind::ServiceRestart
            | JobKind::ComponentRestart => RESTART_PHASES,
            JobKind::ClusterCheck | JobKind::ServiceCheck | JobKind::ComponentCheck => CHECK_PHASES,
            JobKind::ServiceConfigure | JobKind::ComponentConfigure => CONFIGURE_PHASES,
            JobKind::ComponentCustom => CUSTOM_PHASES,
            JobKind::ClusterAdd | JobKind::HostAdd | JobKind::HostCheck => &[],
        }
    }

    fn component_source(self) -> ComponentSource {
        match self {
            JobKind::ServiceAdd
            | JobKind::ComponentAdd
            | JobKind::ComponentStart
            | JobKind::ComponentStop
            | JobKind::ComponentRestart
            | JobKind::ComponentConfigure
            | JobKind::ComponentCheck
            | JobKind::ComponentCustom => ComponentSource::Command,
            _ => ComponentSource::Installed,
        }
    }

    /// Jobs that change what the cache files describe refresh them first.
    fn refreshes_cache(self) -> bool {
        matches!(
            self,
            JobKind::ServiceAdd
                | JobKind::ComponentAdd
                | JobKind::ServiceConfigure
                | JobKind::ComponentConfigure
        )
    }
}

pub struct Job {
    id: i64,
    name: String,
    kind: JobKind,
    context: JobContext,
    attempt: i64,
    stages: Vec<Stage>,
    state: ExecutionState,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("attempt", &self.attempt)
            .field("stages", &self.stages.len())
            .field("state", &self.state)
            .finish()
    }
}

impl Job {
    /// Plans and persists a new job. Ordering failures abort before anything is saved.
    pub async fn create(rt: &CommandRuntime, context: JobContext) -> Result<Self> {
        let dto = &context.command_dto;
        let kind = JobKind::resolve(dto.command_level, dto.command)?;
        let scope = resolve_scope(rt, &context).await?;
        let plans = plan_stages(rt, kind, &context, &scope).await?;
        Self::create_with_plans(rt, kind, context, scope, plans).await
    }

    /// Persists a new job made of the given stage plans.
    pub async fn create_with_plans(
        rt: &CommandRuntime,
        kind: JobKind,
        context: JobContext,
        scope: ClusterScope,
        plans: Vec<StagePlan>,
    ) -> Result<Self> {
        let name = job_name(kind, &context);
        let record = rt
            .jobs
            .create(scope.cluster_id, &name, &serde_json::to_string(&context)?)
            .await?;
        Self::materialize(rt, &record, kind, context, scope, plans).await
    }

    /// Regenerates stages and tasks for a job record that has started a new attempt.
    pub async fn recreate(rt: &CommandRuntime, record: &JobRecord, context: JobContext) -> Result<Self> {
        let dto = &context.command_dto;
        let kind = JobKind::resolve(dto.command_level, dto.command)?;
        let scope = resolve_scope(rt, &context).await?;
        let plans = plan_stages(rt, kind, &context, &scope).await?;
        Self::materialize(rt, record, kind, context, scope, plans).await
    }

    async fn materialize(
        rt: &CommandRuntime,
        record: &JobRecord,
        kind: JobKind,
        context: JobContext,
        scope: ClusterScope,
        plans: Vec<StagePlan>,
    ) -> Result<Self> {
        let shared = job_properties(&context);
        let custom_command = context.command_dto.custom_command.clone();

        let mut stages = Vec::with_capacity(plans.len());
        for (idx, plan) in plans.iter().enumerate() {
            let stage_context = stage_context(rt, &scope, plan, &shared);
            let stage = Stage::create(
                rt,
                record.id,
                record.attempt,
                idx as i64 + 1,
                plan.kind,
                stage_context,
                custom_command.as_deref(),
            )
            .await?;
            stages.push(stage);
        }

        tracing::info!(
            "Created job {} [{}] attempt {} with {} stages",
            record.id,
            record.name,
            record.attempt,
            stages.len()
        );

        Ok(Self {
            id: record.id,
            name: record.name.clone(),
            kind,
            context,
            attempt: record.attempt,
            stages,
            state: ExecutionState::Pending,
        })
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn attempt(&self) -> i64 {
        self.attempt
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Runs stages in order, stopping at the first failure.
    pub async fn run(&mut self, rt: &CommandRuntime) -> ExecutionState {
        match self.before_run(rt).await {
            Ok(true) => {}
            Ok(false) => return self.state,
            Err(e) => {
                tracing::error!("Job {} failed before its first stage: {}", self.id, e);
                self.finish(rt, ExecutionState::Failed).await;
                return self.state;
            }
        }

        let mut success = true;
        for stage in self.stages.iter_mut() {
            if !stage.run(rt).await {
                success = false;
                break;
            }
        }

        if success {
            self.finish(rt, ExecutionState::Successful).await;
            tracing::info!("Job {} [{}] succeeded", self.id, self.name);
        } else {
            self.finish(rt, ExecutionState::Failed).await;
            let failed = self
                .stages
                .iter()
                .find(|stage| stage.state() == ExecutionState::Failed)
                .map(|stage| stage.name().to_string())
                .unwrap_or_default();
            tracing::error!("Job {} [{}] failed at stage [{}]", self.id, self.name, failed);
        }
        self.state
    }

    /// Claims the job and performs the one-time side effects of a first attempt.
    async fn before_run(&mut self, rt: &CommandRuntime) -> Result<bool> {
        let started = rt
            .jobs
            .transition(self.id, ExecutionState::Pending, ExecutionState::Processing)
            .await?;
        if !started {
            self.state = rt.jobs.get(self.id).await?.state;
            tracing::info!("Job {} is {:?}, not running it", self.id, self.state);
            return Ok(false);
        }
        self.state = ExecutionState::Processing;

        if self.context.retry_flag {
            tracing::info!("Job {} is a retry, skipping first-run side effects", self.id);
        } else {
            self.first_run_effects(rt).await?;
        }
        Ok(true)
    }

    async fn first_run_effects(&self, rt: &CommandRuntime) -> Result<()> {
        let dto = &self.context.command_dto;
        match self.kind {
            JobKind::ClusterAdd => {
                let command = dto
                    .cluster_command
                    .as_ref()
                    .ok_or_else(|| AppError::InvalidCommand("cluster_command is required".to_string()))?;
                let cluster = match rt.clusters.find_by_name(&command.name).await? {
                    Some(cluster) => cluster,
                    None => {
                        rt.clusters
                            .create(NewCluster {
                                name: command.name.clone(),
                                stack_name: command.stack_name.clone(),
                                stack_version: command.stack_version.clone(),
                                root_dir: command.root_dir.clone(),
                                user_group: command.user_group.clone(),
                                repos: serde_json::to_string(&command.repos)?,
                            })
                            .await?
                    }
                };
                for host in &command.hosts {
                    let port = host.agent_port.unwrap_or(rt.default_agent_port);
                    for hostname in &host.hostnames {
                        rt.hosts.upsert(Some(cluster.id), hostname, port).await?;
                    }
                }
                rt.jobs.set_cluster_id(self.id, cluster.id).await?;
            }
            JobKind::HostAdd => {
                for host in &dto.host_commands {
                    let port = host.agent_port.unwrap_or(rt.default_agent_port);
                    for hostname in &host.hostnames {
                        rt.hosts.upsert(dto.cluster_id, hostname, port).await?;
                    }
                }
            }
            JobKind::ServiceAdd | JobKind::ComponentAdd => {
                let cluster_id = require_cluster(dto.cluster_id)?;
                for (component, hostnames) in command_component_hosts(&self.context) {
                    let service = rt.stack.service_for_component(&component)?;
                    for hostname in &hostnames {
                        rt.host_components
                            .create_if_absent(
                                cluster_id,
                                hostname,
                                &service.name,
                                &component.to_lowercase(),
                                MaintainState::Uninstalled,
                            )
                            .await?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn finish(&mut self, rt: &CommandRuntime, state: ExecutionState) {
        match rt.jobs.finish(self.id, state).await {
            Ok(true) => self.state = state,
            Ok(false) => tracing::warn!("Job {} already reached a terminal state", self.id),
            Err(e) => tracing::error!("Failed to persist state of job {}: {}", self.id, e),
        }
    }
}

async fn resolve_scope(rt: &CommandRuntime, context: &JobContext) -> Result<ClusterScope> {
    let dto = &context.command_dto;
    if let Some(cluster_id) = dto.cluster_id {
        return Ok(ClusterScope::from_record(&rt.clusters.get(cluster_id).await?));
    }
    if let Some(command) = &dto.cluster_command {
        // a retried cluster add finds the row its first attempt saved
        if let Some(existing) = rt.clusters.find_by_name(&command.name).await? {
            return Ok(ClusterScope::from_record(&existing));
        }
        return Ok(ClusterScope::from_command(command));
    }
    Ok(ClusterScope::default())
}

async fn plan_stages(
    rt: &CommandRuntime,
    kind: JobKind,
    context: &JobContext,
    scope: &ClusterScope,
) -> Result<Vec<StagePlan>> {
    let dto = &context.command_dto;

    match kind {
        JobKind::ClusterAdd | JobKind::HostAdd => {
            let hostnames = dto.all_hostnames();
            return Ok(vec![
                StagePlan::for_hosts(StageKind::HostCheck, hostnames.clone()),
                StagePlan::for_hosts(StageKind::CacheFileUpdate, hostnames.clone()),
                StagePlan::for_hosts(StageKind::SetupJdk, hostnames),
            ]);
        }
        JobKind::HostCheck => {
            return Ok(vec![StagePlan::for_hosts(StageKind::HostCheck, dto.all_hostnames())]);
        }
        _ => {}
    }

    let component_hosts = match kind.component_source() {
        ComponentSource::Command => command_component_hosts(context),
        ComponentSource::Installed => installed_component_hosts(rt, kind, context, scope).await?,
    };

    let mut plans = Vec::new();
    if kind.refreshes_cache() {
        plans.push(StagePlan::for_hosts(
            StageKind::CacheFileUpdate,
            cache_targets(rt, scope, &component_hosts).await?,
        ));
    }
    for commands in kind.phases() {
        plans.extend(plan_component_stages(&rt.stack, &component_hosts, commands)?);
    }
    Ok(plans)
}

fn command_component_hosts(context: &JobContext) -> ComponentHosts {
    let dto = &context.command_dto;
    let mut component_hosts = ComponentHosts::new();
    let entries = dto
        .service_commands
        .iter()
        .flat_map(|service| &service.component_hosts)
        .chain(&dto.component_commands);
    for entry in entries {
        let hosts = component_hosts.entry(entry.component_name.to_lowercase()).or_default();
        for hostname in &entry.hostnames {
            if !hosts.contains(hostname) {
                hosts.push(hostname.clone());
            }
        }
    }
    component_hosts
}

async fn installed_component_hosts(
    rt: &CommandRuntime,
    kind: JobKind,
    context: &JobContext,
    scope: &ClusterScope,
) -> Result<ComponentHosts> {
    let dto = &context.command_dto;
    let cluster_id = require_cluster(scope.cluster_id)?;
    let services = dto.service_names();
    let hostnames = dto.all_hostnames();

    let mut component_hosts = ComponentHosts::new();
    for row in rt.host_components.list_by_cluster(cluster_id).await? {
        if row.state == MaintainState::Uninstalled {
            continue;
        }
        let selected = match kind {
            JobKind::HostStart | JobKind::HostStop | JobKind::HostRestart => hostnames.contains(&row.hostname),
            JobKind::ServiceStart
            | JobKind::ServiceStop
            | JobKind::ServiceRestart
            | JobKind::ServiceConfigure
            | JobKind::ServiceCheck => services.contains(&row.service_name),
            _ => true,
        };
        if selected {
            component_hosts
                .entry(row.component_name)
                .or_default()
                .push(row.hostname);
        }
    }
    Ok(component_hosts)
}

/// Every registered host of the cluster plus every host the job touches.
async fn cache_targets(
    rt: &CommandRuntime,
    scope: &ClusterScope,
    component_hosts: &ComponentHosts,
) -> Result<Vec<String>> {
    let mut targets: Vec<String> = Vec::new();
    if let Some(cluster_id) = scope.cluster_id {
        targets.extend(rt.hosts.list_by_cluster(cluster_id).await?.into_iter().map(|h| h.hostname));
    }
    for hostname in component_hosts.values().flatten() {
        if !targets.contains(hostname) {
            targets.push(hostname.clone());
        }
    }
    Ok(targets)
}

fn require_cluster(cluster_id: Option<i64>) -> Result<i64> {
    cluster_id.ok_or_else(|| AppError::InvalidCommand("cluster_id is required".to_string()))
}

/// Properties only the cache update stage consumes.
fn job_properties(context: &JobContext) -> Map<String, Value> {
    let dto = &context.command_dto;
    let mut properties = Map::new();

    if let Some(command) = &dto.cluster_command {
        if let Ok(repos) = serde_json::to_value(&command.repos) {
            properties.insert(REPOS_PROPERTY.to_string(), repos);
        }
    }

    let configurations: Map<String, Value> = dto
        .service_commands
        .iter()
        .filter(|service| !service.configurations.is_empty())
        .map(|service| {
            (
                service.service_name.to_lowercase(),
                Value::Object(service.configurations.clone()),
            )
        })
        .collect();
    if !configurations.is_empty() {
        properties.insert(CONFIGURATIONS_PROPERTY.to_string(), Value::Object(configurations));
    }
    properties
}

fn stage_context(
    rt: &CommandRuntime,
    scope: &ClusterScope,
    plan: &StagePlan,
    shared: &Map<String, Value>,
) -> StageContext {
    let mut context = StageContext::new(scope, &plan.service_name, &plan.component_name, plan.hostnames.clone());

    if plan.kind.is_component_stage() {
        if let Ok(service) = rt.stack.service(&plan.service_name) {
            context.service_user = service.user.clone();
            if !service.package_specifics.is_empty() {
                context.properties.insert(
                    PACKAGE_SPECIFICS_PROPERTY.to_string(),
                    Value::Array(service.package_specifics.clone()),
                );
            }
        }
        if context.stack_name.is_empty() {
            if let Ok(stack) = rt.stack.stack_of_service(&plan.service_name) {
                context.stack_name = stack.name.clone();
                context.stack_version = stack.version.clone();
            }
        }
    }

    if plan.kind == StageKind::CacheFileUpdate {
        context
            .properties
            .extend(shared.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    context
}

fn job_name(kind: JobKind, context: &JobContext) -> String {
    let dto = &context.command_dto;
    let targets: Vec<String> = match dto.command_level {
        CommandLevel::Cluster => dto
            .cluster_command
            .as_ref()
            .map(|c| vec![c.name.clone()])
            .unwrap_or_default(),
        CommandLevel::Host => dto.all_hostnames(),
        CommandLevel::Service => dto.service_names(),
        CommandLevel::Component => dto
            .component_commands
            .iter()
            .map(|c| c.component_name.to_lowercase())
            .collect(),
    };

    if targets.is_empty() {
        kind.display_name().to_string()
    } else {
        format!("{} [{}]", kind.display_name(), targets.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_kind_from_level_and_command() {
        assert_eq!(
            JobKind::resolve(CommandLevel::Service, Command::Restart).unwrap(),
            JobKind::ServiceRestart
        );
        assert_eq!(
            JobKind::resolve(CommandLevel::Host, Command::Add).unwrap(),
            JobKind::HostAdd
        );
        assert!(matches!(
            JobKind::resolve(CommandLevel::Cluster, Command::Custom),
            Err(AppError::UnsupportedCommand(_))
        ));
    }

    #[test]
    fn restart_stops_before_starting() {
        assert_eq!(
            JobKind::ServiceRestart.phases(),
            &[&[Command::Stop][..], &[Command::Start][..]]
        );
    }

    #[test]
    fn add_service_runs_start_inside_a_multi_phase_group() {
        let phases = JobKind::ServiceAdd.phases();
        assert_eq!(phases.len(), 4);
        assert_eq!(phases[2], &[Command::Init, Command::Start, Command::Prepare][..]);
    }
}
