use super::{AgentSettings, CommandExecutor, ExecOutcome, ExecutorFuture};
use crate::error::{AppError, Result};
use crate::protocol::{CacheFilesPayload, CommandRequest, CommandType};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub const SETTINGS_FILE: &str = "settings.json";
pub const CONFIGURATIONS_FILE: &str = "configurations.json";
pub const HOSTS_FILE: &str = "hosts.json";
pub const USERS_FILE: &str = "users.json";
pub const COMPONENTS_FILE: &str = "components.json";
pub const REPOS_FILE: &str = "repos.json";
pub const CLUSTER_FILE: &str = "cluster.json";

/// Writes the cache file batch. Registered once per target directory.
pub struct CacheFilesExecutor {
    command_type: CommandType,
}

impl CacheFilesExecutor {
    pub fn new(command_type: CommandType) -> Self {
        Self { command_type }
    }
}

impl CommandExecutor for CacheFilesExecutor {
    fn command_type(&self) -> CommandType {
        self.command_type
    }

    fn do_execute<'a>(&'a self, settings: &'a AgentSettings, request: &'a CommandRequest) -> ExecutorFuture<'a> {
        Box::pin(async move {
            let payload: CacheFilesPayload = request.payload_as()?;
            let dir = match self.command_type {
                CommandType::CacheDistribute => &settings.stack_cache_dir,
                _ => &settings.cache_dir,
            };
            write_cache_files(dir, &payload)?;
            tracing::info!("Cache files written to {}", dir.display());
            Ok(ExecOutcome::success(format!(
                "Host [{}] cached successful!!!",
                request.hostname
            )))
        })
    }
}

/// Stages every file first and only then moves them into place, so a
/// serialization failure leaves the previous batch untouched.
pub fn write_cache_files(dir: &Path, payload: &CacheFilesPayload) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    let staged = vec![
        (SETTINGS_FILE, stage(dir, &payload.settings)?),
        (CONFIGURATIONS_FILE, stage(dir, &payload.configurations)?),
        (HOSTS_FILE, stage(dir, &payload.hosts)?),
        (USERS_FILE, stage(dir, &payload.users)?),
        (COMPONENTS_FILE, stage(dir, &payload.components)?),
        (REPOS_FILE, stage(dir, &payload.repos)?),
        (CLUSTER_FILE, stage(dir, &payload.cluster_info)?),
    ];

    for (name, file) in staged {
        file.persist(dir.join(name))
            .map_err(|e| AppError::Io(e.error))?;
    }
    Ok(())
}

fn stage<T: Serialize>(dir: &Path, value: &T) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut file, value)?;
    file.flush()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClusterInfo, RepoInfo};
    use std::collections::BTreeMap;

    #[test]
    fn writes_all_seven_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut hosts = BTreeMap::new();
        hosts.insert("all".to_string(), vec!["h1".to_string(), "h2".to_string()]);
        let payload = CacheFilesPayload {
            cluster_info: ClusterInfo {
                cluster_name: "prod".to_string(),
                root_dir: "/opt".to_string(),
                ..ClusterInfo::default()
            },
            hosts,
            repos: vec![RepoInfo {
                name: "tools".to_string(),
                arch: "x86_64".to_string(),
                base_url: "http://mirror/tools".to_string(),
                repo_type: RepoInfo::TOOLS_REPO_TYPE,
            }],
            ..CacheFilesPayload::default()
        };

        write_cache_files(dir.path(), &payload).unwrap();

        for name in [
            SETTINGS_FILE,
            CONFIGURATIONS_FILE,
            HOSTS_FILE,
            USERS_FILE,
            COMPONENTS_FILE,
            REPOS_FILE,
            CLUSTER_FILE,
        ] {
            assert!(dir.path().join(name).is_file(), "{name} missing");
        }
        let cluster: ClusterInfo =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(CLUSTER_FILE)).unwrap()).unwrap();
        assert_eq!(cluster.cluster_name, "prod");
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 7);
    }

    #[tokio::test]
    async fn distribute_writes_to_stack_cache() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = AgentSettings {
            cache_dir: dir.path().join("cache"),
            stack_cache_dir: dir.path().join("stack_cache"),
            stacks_dir: dir.path().join("stacks"),
            logs_dir: dir.path().join("logs"),
            dev_mode: false,
        };
        let request = CommandRequest {
            command_type: CommandType::CacheDistribute,
            hostname: "h1".to_string(),
            payload: serde_json::to_string(&CacheFilesPayload::default()).unwrap(),
            task_id: 1,
            stage_id: 1,
            job_id: 1,
        };

        let outcome = CacheFilesExecutor::new(CommandType::CacheDistribute)
            .do_execute(&settings, &request)
            .await
            .unwrap();
        assert_eq!(outcome.result, "Host [h1] cached successful!!!");
        assert!(settings.stack_cache_dir.join(HOSTS_FILE).is_file());
        assert!(!settings.cache_dir.exists());
    }
}
