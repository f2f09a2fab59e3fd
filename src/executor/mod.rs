//! Agent side: executes the commands the controller sends to this host.

pub mod cache_executor;
pub mod component_executor;
pub mod dispatcher;
pub mod host_check_executor;
pub mod jdk_executor;

pub use cache_executor::{CacheFilesExecutor, write_cache_files};
pub use component_executor::{ComponentExecutor, task_log_path};
pub use dispatcher::{CommandDispatcher, ExecutorRegistration, builtin_executors};
pub use host_check_executor::HostCheckExecutor;
pub use jdk_executor::SetupJdkExecutor;

use crate::config::Config;
use crate::error::Result;
use crate::protocol::{CommandRequest, CommandType, SUCCESS_CODE};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

/// Local directories and switches an executor works with.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub cache_dir: PathBuf,
    pub stack_cache_dir: PathBuf,
    pub stacks_dir: PathBuf,
    pub logs_dir: PathBuf,
    /// Skip real execution and answer every command with a stub success.
    pub dev_mode: bool,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            cache_dir: crate::paths::cache_dir()?,
            stack_cache_dir: crate::paths::stack_cache_dir()?,
            stacks_dir: config.resolved_stacks_dir()?,
            logs_dir: crate::paths::logs_dir()?,
            dev_mode: config.dev_mode,
        })
    }
}

/// What an executor reports back; stamped with the request's correlation ids by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub code: i32,
    pub result: String,
}

impl ExecOutcome {
    pub fn success(result: impl Into<String>) -> Self {
        Self {
            code: SUCCESS_CODE,
            result: result.into(),
        }
    }

    pub fn failure(code: i32, result: impl Into<String>) -> Self {
        Self {
            code,
            result: result.into(),
        }
    }
}

pub type ExecutorFuture<'a> = Pin<Box<dyn Future<Output = Result<ExecOutcome>> + Send + 'a>>;

pub trait CommandExecutor: Send + Sync {
    fn command_type(&self) -> CommandType;

    fn do_execute<'a>(&'a self, settings: &'a AgentSettings, request: &'a CommandRequest) -> ExecutorFuture<'a>;
}
