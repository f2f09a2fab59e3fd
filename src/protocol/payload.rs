use crate::models::Command;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Key under `hosts` listing every host of the cluster.
pub const ALL_HOSTS_KEY: &str = "all";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentCommandPayload {
    pub command: Command,
    #[serde(default)]
    pub custom_command: Option<String>,
    pub service_name: String,
    pub service_user: String,
    pub service_group: String,
    pub component_name: String,
    pub stack_name: String,
    pub stack_version: String,
    pub root_dir: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_name: String,
    pub stack_name: String,
    pub stack_version: String,
    pub user_group: String,
    pub root_dir: String,
    #[serde(default)]
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub name: String,
    pub arch: String,
    pub base_url: String,
    /// `2` marks the tools repository the JDK tarballs come from.
    #[serde(rename = "type")]
    pub repo_type: i32,
}

impl RepoInfo {
    pub const TOOLS_REPO_TYPE: i32 = 2;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInfo {
    pub name: String,
    pub service_name: String,
    pub display_name: String,
    pub category: String,
    pub service_user: String,
}

/// Contents of the cache file batch an agent keeps locally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheFilesPayload {
    pub cluster_info: ClusterInfo,
    #[serde(default)]
    pub configurations: BTreeMap<String, Value>,
    /// Component name to hostnames, plus the cluster-wide [`ALL_HOSTS_KEY`] entry.
    #[serde(default)]
    pub hosts: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub repos: Vec<RepoInfo>,
    #[serde(default)]
    pub settings: Map<String, Value>,
    /// Service name to the OS user it runs as.
    #[serde(default)]
    pub users: BTreeMap<String, String>,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostCheckPayload {
    /// Names of the checks to run; empty runs every known check.
    #[serde(default)]
    pub checks: Vec<String>,
}
