use super::{
    AgentSettings, CacheFilesExecutor, CommandExecutor, ComponentExecutor, ExecOutcome, HostCheckExecutor,
    SetupJdkExecutor,
};
use crate::protocol::{CommandReply, CommandRequest, CommandType, FAIL_CODE, SUCCESS_CODE};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

/// Result text returned for every command while the agent runs in dev mode.
pub const DEV_MODE_RESULT: &str = "Dev mode, command skipped";

/// A named constructor for one executor.
#[derive(Clone, Copy)]
pub struct ExecutorRegistration {
    pub name: &'static str,
    pub factory: fn() -> Box<dyn CommandExecutor>,
}

pub fn builtin_executors() -> Vec<ExecutorRegistration> {
    vec![
        ExecutorRegistration {
            name: "component",
            factory: || Box::new(ComponentExecutor),
        },
        ExecutorRegistration {
            name: "update_cache_files",
            factory: || Box::new(CacheFilesExecutor::new(CommandType::UpdateCacheFiles)),
        },
        ExecutorRegistration {
            name: "cache_distribute",
            factory: || Box::new(CacheFilesExecutor::new(CommandType::CacheDistribute)),
        },
        ExecutorRegistration {
            name: "host_check",
            factory: || Box::new(HostCheckExecutor),
        },
        ExecutorRegistration {
            name: "setup_jdk",
            factory: || Box::new(SetupJdkExecutor),
        },
    ]
}

/// Routes inbound requests to executors by command type. Never fails: every
/// request gets a reply.
pub struct CommandDispatcher {
    registrations: Vec<ExecutorRegistration>,
    index: OnceLock<HashMap<CommandType, usize>>,
    settings: Arc<AgentSettings>,
    running: Arc<Mutex<BTreeSet<i64>>>,
}

/// Keeps a task id in the running set until the executor task that owns it ends.
struct RunningGuard {
    running: Arc<Mutex<BTreeSet<i64>>>,
    task_id: i64,
}

impl RunningGuard {
    fn track(running: &Arc<Mutex<BTreeSet<i64>>>, task_id: i64) -> Self {
        lock(running).insert(task_id);
        Self {
            running: running.clone(),
            task_id,
        }
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        lock(&self.running).remove(&self.task_id);
    }
}

fn lock(running: &Mutex<BTreeSet<i64>>) -> std::sync::MutexGuard<'_, BTreeSet<i64>> {
    running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CommandDispatcher {
    pub fn new(registrations: Vec<ExecutorRegistration>, settings: AgentSettings) -> Self {
        Self {
            registrations,
            index: OnceLock::new(),
            settings: Arc::new(settings),
            running: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Ids of the tasks currently executing on this agent.
    pub fn running_tasks(&self) -> Vec<i64> {
        lock(&self.running).iter().copied().collect()
    }

    fn index(&self) -> &HashMap<CommandType, usize> {
        self.index.get_or_init(|| {
            let mut index = HashMap::new();
            for (position, registration) in self.registrations.iter().enumerate() {
                let command_type = (registration.factory)().command_type();
                match index.get(&command_type) {
                    Some(&existing) => {
                        let existing: &ExecutorRegistration = &self.registrations[existing];
                        tracing::warn!(
                            "Executor {} for {} ignored, {} is already registered",
                            registration.name,
                            command_type,
                            existing.name
                        );
                    }
                    None => {
                        index.insert(command_type, position);
                    }
                }
            }
            tracing::info!("Registered {} command executors", index.len());
            index
        })
    }

    pub async fn dispatch(&self, request: CommandRequest) -> CommandReply {
        tracing::info!(
            "Received {} for task {} of stage {} job {}",
            request.command_type,
            request.task_id,
            request.stage_id,
            request.job_id
        );

        let Some(&position) = self.index().get(&request.command_type) else {
            tracing::error!("No executor registered for {}", request.command_type);
            return CommandReply::for_request(
                &request,
                FAIL_CODE,
                format!("No executor registered for {}", request.command_type),
            );
        };

        if self.settings.dev_mode {
            return CommandReply::for_request(&request, SUCCESS_CODE, DEV_MODE_RESULT);
        }

        let outcome = self.execute(position, &request).await;
        if outcome.code != SUCCESS_CODE {
            tracing::warn!("Task {} failed on this host: {}", request.task_id, outcome.result);
        }
        CommandReply::for_request(&request, outcome.code, outcome.result)
    }

    /// Runs the executor on its own tokio task so that a panic turns into a failed reply.
    /// The task stays listed as running until the executor ends, even if the caller
    /// stops waiting for the reply.
    async fn execute(&self, position: usize, request: &CommandRequest) -> ExecOutcome {
        let executor = (self.registrations[position].factory)();
        let settings = self.settings.clone();
        let owned = request.clone();
        let guard = RunningGuard::track(&self.running, request.task_id);

        let joined = tokio::spawn(async move {
            let _guard = guard;
            executor.do_execute(&settings, &owned).await
        })
        .await;
        match joined {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => ExecOutcome::failure(FAIL_CODE, e.to_string()),
            Err(e) => ExecOutcome::failure(FAIL_CODE, format!("Executor aborted: {}", e)),
        }
    }
}
