use super::CommandRuntime;
use super::context::{CONFIGURATIONS_PROPERTY, HOSTNAMES_PROPERTY, REPOS_PROPERTY, TaskContext};
use crate::error::Result;
use crate::protocol::{ALL_HOSTS_KEY, CacheFilesPayload, ClusterInfo, ComponentInfo, RepoInfo};
use serde_json::Map;
use std::collections::{BTreeMap, BTreeSet};

/// Collects the full cache file batch for the cluster a task belongs to.
pub async fn build_cache_payload(rt: &CommandRuntime, ctx: &TaskContext) -> Result<CacheFilesPayload> {
    let mut hosts: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut all_hosts: BTreeSet<String> = BTreeSet::new();
    let mut repos: Vec<RepoInfo> = ctx.property(REPOS_PROPERTY)?.unwrap_or_default();

    if let Some(hostnames) = ctx.property::<Vec<String>>(HOSTNAMES_PROPERTY)? {
        all_hosts.extend(hostnames);
    }

    if let Some(cluster_id) = ctx.cluster_id {
        let cluster = rt.clusters.get(cluster_id).await?;
        if repos.is_empty() {
            repos = serde_json::from_str(&cluster.repos)?;
        }
        for host in rt.hosts.list_by_cluster(cluster_id).await? {
            all_hosts.insert(host.hostname);
        }
        for row in rt.host_components.list_by_cluster(cluster_id).await? {
            all_hosts.insert(row.hostname.clone());
            let entry = hosts.entry(row.component_name).or_default();
            if !entry.contains(&row.hostname) {
                entry.push(row.hostname);
            }
        }
    }
    hosts.insert(ALL_HOSTS_KEY.to_string(), all_hosts.into_iter().collect());

    let mut users = BTreeMap::new();
    let mut components = BTreeMap::new();
    for service in rt.stack.services() {
        users.insert(service.name.clone(), service.user.clone());
        for component in &service.components {
            components.insert(
                component.name.clone(),
                ComponentInfo {
                    name: component.name.clone(),
                    service_name: service.name.clone(),
                    display_name: component.display_name.clone(),
                    category: match component.category {
                        crate::stack::ComponentCategory::Server => "server".to_string(),
                        crate::stack::ComponentCategory::Client => "client".to_string(),
                    },
                    service_user: service.user.clone(),
                },
            );
        }
    }

    let configurations = ctx
        .property::<BTreeMap<String, serde_json::Value>>(CONFIGURATIONS_PROPERTY)?
        .unwrap_or_default();

    Ok(CacheFilesPayload {
        cluster_info: ClusterInfo {
            cluster_name: ctx.cluster_name.clone(),
            stack_name: ctx.stack_name.clone(),
            stack_version: ctx.stack_version.clone(),
            user_group: ctx.user_group.clone(),
            root_dir: ctx.root_dir.clone(),
            packages: Vec::new(),
        },
        configurations,
        hosts,
        repos,
        settings: Map::new(),
        users,
        components,
    })
}
