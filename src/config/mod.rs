use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_AGENT_PORT: u16 = 8835;
const DEFAULT_RPC_TIMEOUT_SECS: u64 = 600;
const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    /// Listen address of the agent endpoint.
    pub host: String,
    pub port: u16,
    /// Port the controller dials when a host has no registered agent port.
    pub agent_port: u16,
    pub rpc_timeout_secs: u64,
    pub max_concurrent_jobs: usize,
    pub dev_mode: bool,
    pub stacks_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let database_url = crate::paths::data_dir()
            .map(|dir| format!("sqlite:{}", dir.join("fleet_manager.db").display()))
            .unwrap_or_else(|_| "sqlite:fleet_manager.db".to_string());
        Self {
            database_url,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_AGENT_PORT,
            agent_port: DEFAULT_AGENT_PORT,
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            dev_mode: false,
            stacks_dir: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = Self::from_conf_file()? {
            config.apply_file(file_config);
        }

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(host) = std::env::var("HOST") {
            config.host = host;
        }

        if let Ok(port) = std::env::var("PORT") {
            config.port = port.parse().unwrap_or(DEFAULT_AGENT_PORT);
        }

        if let Ok(port) = std::env::var("FLEET_AGENT_PORT") {
            config.agent_port = port.parse().unwrap_or(DEFAULT_AGENT_PORT);
        }

        if let Ok(secs) = std::env::var("FLEET_RPC_TIMEOUT_SECS") {
            config.rpc_timeout_secs = secs.parse().unwrap_or(DEFAULT_RPC_TIMEOUT_SECS);
        }

        if let Ok(limit) = std::env::var("FLEET_MAX_CONCURRENT_JOBS") {
            config.max_concurrent_jobs = limit.parse().unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS);
        }

        if let Ok(dev_mode) = std::env::var("FLEET_DEV_MODE") {
            config.dev_mode = matches!(dev_mode.trim(), "1" | "true" | "TRUE" | "yes");
        }

        if let Ok(stacks_dir) = std::env::var("FLEET_STACKS_DIR") {
            config.stacks_dir = Some(PathBuf::from(stacks_dir));
        }

        if config.max_concurrent_jobs == 0 {
            anyhow::bail!("max_concurrent_jobs must be at least 1");
        }

        config.normalize_database_url()?;
        Ok(config)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn resolved_stacks_dir(&self) -> Result<PathBuf> {
        match &self.stacks_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(crate::paths::stacks_dir()?),
        }
    }

    fn from_conf_file() -> Result<Option<FileConfig>> {
        let path = crate::paths::conf_dir()?.join("config.json");
        if !path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file_config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(Some(file_config))
    }

    fn apply_file(&mut self, file_config: FileConfig) {
        if let Some(database_url) = file_config.database_url {
            self.database_url = database_url;
        }
        if let Some(host) = file_config.host {
            self.host = host;
        }
        if let Some(port) = file_config.port {
            self.port = port;
        }
        if let Some(agent_port) = file_config.agent_port {
            self.agent_port = agent_port;
        }
        if let Some(secs) = file_config.rpc_timeout_secs {
            self.rpc_timeout_secs = secs;
        }
        if let Some(limit) = file_config.max_concurrent_jobs {
            self.max_concurrent_jobs = limit;
        }
        if let Some(dev_mode) = file_config.dev_mode {
            self.dev_mode = dev_mode;
        }
        if let Some(stacks_dir) = file_config.stacks_dir {
            self.stacks_dir = Some(PathBuf::from(stacks_dir));
        }
    }

    fn normalize_database_url(&mut self) -> Result<()> {
        let Some(path_str) = self.database_url.strip_prefix("sqlite:") else {
            return Ok(());
        };

        let path = Path::new(path_str);
        if path.is_absolute() {
            return Ok(());
        }

        if path
            .components()
            .any(|component| matches!(component, std::path::Component::ParentDir))
        {
            anyhow::bail!("SQLite database path cannot contain '..'");
        }

        let root = crate::paths::install_root()?;
        let absolute = root.join(path);
        self.database_url = format!("sqlite:{}", absolute.display());
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    database_url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    agent_port: Option<u16>,
    rpc_timeout_secs: Option<u64>,
    max_concurrent_jobs: Option<usize>,
    dev_mode: Option<bool>,
    stacks_dir: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let mut config = Config::default();
        let file: FileConfig = serde_json::from_str(
            r#"{"agent_port": 9000, "dev_mode": true, "max_concurrent_jobs": 2}"#,
        )
        .unwrap();
        config.apply_file(file);

        assert_eq!(config.agent_port, 9000);
        assert!(config.dev_mode);
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.port, DEFAULT_AGENT_PORT);
    }

    #[test]
    fn relative_database_path_rejects_parent_dir() {
        let mut config = Config {
            database_url: "sqlite:../escape.db".to_string(),
            ..Config::default()
        };
        assert!(config.normalize_database_url().is_err());
    }
}
