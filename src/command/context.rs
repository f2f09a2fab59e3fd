//! Parameters threaded from a user command down to every stage and task.

use crate::models::{ClusterRecord, Command, CommandLevel};
use crate::protocol::{ClusterInfo, RepoInfo};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property holding the package repositories known to the job.
pub const REPOS_PROPERTY: &str = "repos";
/// Property holding per-service configuration documents.
pub const CONFIGURATIONS_PROPERTY: &str = "configurations";
/// Property holding every host the job touches.
pub const HOSTNAMES_PROPERTY: &str = "hostnames";
pub const PACKAGE_SPECIFICS_PROPERTY: &str = "package_specifics";

/// Pseudo service and component used by host-wide stages.
pub const CLUSTER_SERVICE: &str = "cluster";
pub const AGENT_COMPONENT: &str = "agent";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandDto {
    pub command: Command,
    pub command_level: CommandLevel,
    #[serde(default)]
    pub custom_command: Option<String>,
    #[serde(default)]
    pub cluster_id: Option<i64>,
    #[serde(default)]
    pub cluster_command: Option<ClusterCommandDto>,
    #[serde(default)]
    pub host_commands: Vec<HostCommandDto>,
    #[serde(default)]
    pub service_commands: Vec<ServiceCommandDto>,
    #[serde(default)]
    pub component_commands: Vec<ComponentHostsDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterCommandDto {
    pub name: String,
    pub stack_name: String,
    pub stack_version: String,
    pub root_dir: String,
    pub user_group: String,
    #[serde(default)]
    pub hosts: Vec<HostCommandDto>,
    #[serde(default)]
    pub repos: Vec<RepoInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostCommandDto {
    pub hostnames: Vec<String>,
    #[serde(default)]
    pub agent_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCommandDto {
    pub service_name: String,
    #[serde(default)]
    pub component_hosts: Vec<ComponentHostsDto>,
    #[serde(default)]
    pub configurations: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHostsDto {
    pub component_name: String,
    pub hostnames: Vec<String>,
}

impl CommandDto {
    pub fn all_hostnames(&self) -> Vec<String> {
        let mut hostnames = Vec::new();
        let mut push = |name: &String| {
            if !hostnames.contains(name) {
                hostnames.push(name.clone());
            }
        };
        if let Some(cluster) = &self.cluster_command {
            cluster.hosts.iter().flat_map(|h| &h.hostnames).for_each(&mut push);
        }
        self.host_commands.iter().flat_map(|h| &h.hostnames).for_each(&mut push);
        self.service_commands
            .iter()
            .flat_map(|s| &s.component_hosts)
            .flat_map(|c| &c.hostnames)
            .for_each(&mut push);
        self.component_commands
            .iter()
            .flat_map(|c| &c.hostnames)
            .for_each(&mut push);
        hostnames
    }

    pub fn service_names(&self) -> Vec<String> {
        self.service_commands
            .iter()
            .map(|s| s.service_name.to_lowercase())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobContext {
    pub command_dto: CommandDto,
    /// Set on re-submission so that one-time side effects are skipped.
    #[serde(default)]
    pub retry_flag: bool,
}

impl JobContext {
    pub fn new(command_dto: CommandDto) -> Self {
        Self {
            command_dto,
            retry_flag: false,
        }
    }
}

/// Cluster-level facts shared by every stage of a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterScope {
    pub cluster_id: Option<i64>,
    pub info: ClusterInfo,
}

impl ClusterScope {
    pub fn from_record(record: &ClusterRecord) -> Self {
        Self {
            cluster_id: Some(record.id),
            info: ClusterInfo {
                cluster_name: record.name.clone(),
                stack_name: record.stack_name.clone(),
                stack_version: record.stack_version.clone(),
                user_group: record.user_group.clone(),
                root_dir: record.root_dir.clone(),
                packages: Vec::new(),
            },
        }
    }

    pub fn from_command(command: &ClusterCommandDto) -> Self {
        Self {
            cluster_id: None,
            info: ClusterInfo {
                cluster_name: command.name.clone(),
                stack_name: command.stack_name.clone(),
                stack_version: command.stack_version.clone(),
                user_group: command.user_group.clone(),
                root_dir: command.root_dir.clone(),
                packages: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageContext {
    pub cluster_id: Option<i64>,
    pub cluster_name: String,
    pub root_dir: String,
    pub user_group: String,
    pub stack_name: String,
    pub stack_version: String,
    pub service_name: String,
    pub service_user: String,
    pub component_name: String,
    pub hostnames: Vec<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl StageContext {
    pub fn new(scope: &ClusterScope, service_name: &str, component_name: &str, hostnames: Vec<String>) -> Self {
        Self {
            cluster_id: scope.cluster_id,
            cluster_name: scope.info.cluster_name.clone(),
            root_dir: scope.info.root_dir.clone(),
            user_group: scope.info.user_group.clone(),
            stack_name: scope.info.stack_name.clone(),
            stack_version: scope.info.stack_version.clone(),
            service_name: service_name.to_string(),
            service_user: String::new(),
            component_name: component_name.to_string(),
            hostnames,
            properties: Map::new(),
        }
    }

    pub fn task_context(&self, hostname: &str) -> TaskContext {
        TaskContext {
            cluster_id: self.cluster_id,
            cluster_name: self.cluster_name.clone(),
            root_dir: self.root_dir.clone(),
            user_group: self.user_group.clone(),
            stack_name: self.stack_name.clone(),
            stack_version: self.stack_version.clone(),
            service_name: self.service_name.clone(),
            service_user: self.service_user.clone(),
            component_name: self.component_name.clone(),
            hostname: hostname.to_string(),
            properties: self.properties.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContext {
    pub cluster_id: Option<i64>,
    pub cluster_name: String,
    pub root_dir: String,
    pub user_group: String,
    pub stack_name: String,
    pub stack_version: String,
    pub service_name: String,
    pub service_user: String,
    pub component_name: String,
    pub hostname: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl TaskContext {
    /// Deserializes a property, treating a missing key as absent.
    pub fn property<T: serde::de::DeserializeOwned>(&self, key: &str) -> crate::error::Result<Option<T>> {
        match self.properties.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }
}
