#![allow(dead_code)]

use fleet_manager::command::CommandRuntime;
use fleet_manager::error::AppError;
use fleet_manager::models::Command;
use fleet_manager::protocol::{
    AgentClient, AgentFuture, CommandReply, CommandRequest, CommandType, ComponentCommandPayload,
    FAIL_CODE, SUCCESS_CODE,
};
use fleet_manager::repository::{NewCluster, establish_connection};
use fleet_manager::services::{CommandService, JobScheduler, JobService};
use fleet_manager::stack::{ComponentCategory, ComponentDefinition, ServiceDefinition, StackMetadata, StackRef};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const DEFAULT_AGENT_PORT: u16 = 8835;

/// Which requests a [`ScriptedAgentClient`] should fail. Unset fields match anything.
#[derive(Debug, Clone, Default)]
pub struct FailRule {
    pub hostname: Option<String>,
    pub command_type: Option<CommandType>,
    pub command: Option<Command>,
    /// Fail with a transport error instead of a failure reply.
    pub unreachable: bool,
    /// Answer with a successful reply stamped with another task's ids.
    pub misrouted: bool,
}

impl FailRule {
    pub fn host(hostname: &str) -> Self {
        Self {
            hostname: Some(hostname.to_string()),
            ..Self::default()
        }
    }

    fn matches(&self, hostname: &str, request: &CommandRequest) -> bool {
        if self.hostname.as_deref().is_some_and(|h| h != hostname) {
            return false;
        }
        if self.command_type.is_some_and(|t| t != request.command_type) {
            return false;
        }
        if let Some(command) = self.command {
            let Ok(payload) = serde_json::from_str::<ComponentCommandPayload>(&request.payload) else {
                return false;
            };
            if payload.command != command {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub hostname: String,
    pub port: u16,
    pub request: CommandRequest,
}

/// Agent client that answers from a script and records every call.
#[derive(Default)]
pub struct ScriptedAgentClient {
    rules: Mutex<Vec<FailRule>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedAgentClient {
    pub fn fail(&self, rule: FailRule) {
        self.rules.lock().unwrap().push(rule);
    }

    pub fn clear_failures(&self) {
        self.rules.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, command_type: CommandType) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.request.command_type == command_type)
            .collect()
    }
}

impl AgentClient for ScriptedAgentClient {
    fn call<'a>(&'a self, hostname: &'a str, port: u16, request: &'a CommandRequest) -> AgentFuture<'a> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(RecordedCall {
                hostname: hostname.to_string(),
                port,
                request: request.clone(),
            });

            let rule = self
                .rules
                .lock()
                .unwrap()
                .iter()
                .find(|rule| rule.matches(hostname, request))
                .cloned();
            match rule {
                Some(rule) if rule.unreachable => {
                    Err(AppError::Transport(format!("connection refused by {}", hostname)))
                }
                Some(rule) if rule.misrouted => {
                    let mut reply = CommandReply::for_request(request, SUCCESS_CODE, "ok");
                    reply.task_id += 1000;
                    Ok(reply)
                }
                Some(_) => Ok(CommandReply::for_request(
                    request,
                    FAIL_CODE,
                    format!("scripted failure on {}", hostname),
                )),
                None => Ok(CommandReply::for_request(request, SUCCESS_CODE, "ok")),
            }
        })
    }
}

pub struct TestEnv {
    _dir: TempDir,
    pub runtime: CommandRuntime,
    pub client: Arc<ScriptedAgentClient>,
    pub commands: CommandService,
    pub jobs: JobService,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_stack(sample_stack()).await
    }

    pub async fn with_stack(stack: StackMetadata) -> Self {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}", dir.path().join("fleet.db").display());
        let pool = establish_connection(&url).await.unwrap();

        let client = Arc::new(ScriptedAgentClient::default());
        let runtime = CommandRuntime::new(pool, Arc::new(stack), client.clone(), DEFAULT_AGENT_PORT);
        let scheduler = JobScheduler::new(runtime.clone(), 2);

        Self {
            _dir: dir,
            runtime,
            client,
            commands: CommandService::new(scheduler.clone()),
            jobs: JobService::new(scheduler),
        }
    }

    /// Registers a cluster and its hosts the way a finished cluster add leaves them.
    pub async fn seed_cluster(&self, hostnames: &[&str]) -> i64 {
        let cluster = self
            .runtime
            .clusters
            .create(NewCluster {
                name: "prod".to_string(),
                stack_name: "infra".to_string(),
                stack_version: "1.0.0".to_string(),
                root_dir: "/opt/fleet".to_string(),
                user_group: "hadoop".to_string(),
                repos: "[]".to_string(),
            })
            .await
            .unwrap();
        for hostname in hostnames {
            self.runtime
                .hosts
                .upsert(Some(cluster.id), hostname, DEFAULT_AGENT_PORT)
                .await
                .unwrap();
        }
        cluster.id
    }
}

fn component(name: &str, category: ComponentCategory) -> ComponentDefinition {
    ComponentDefinition {
        name: name.to_string(),
        display_name: name.replace('_', " "),
        category,
        cardinality: None,
    }
}

fn service(name: &str, required: &[&str], components: Vec<ComponentDefinition>) -> ServiceDefinition {
    ServiceDefinition {
        name: name.to_string(),
        display_name: name.to_string(),
        user: name.to_string(),
        version: Some("3.8.4".to_string()),
        required_services: required.iter().map(|s| s.to_string()).collect(),
        components,
        package_specifics: Vec::new(),
    }
}

/// ZooKeeper plus a Kafka that needs it, with broker start ordered after the server.
pub fn sample_stack() -> StackMetadata {
    let stack_ref = StackRef {
        name: "infra".to_string(),
        version: "1.0.0".to_string(),
    };
    let mut stack = StackMetadata::new();
    stack
        .register_service(
            stack_ref.clone(),
            service(
                "zookeeper",
                &[],
                vec![
                    component("zookeeper_server", ComponentCategory::Server),
                    component("zookeeper_client", ComponentCategory::Client),
                ],
            ),
        )
        .unwrap();
    stack
        .register_service(
            stack_ref,
            service(
                "kafka",
                &["zookeeper"],
                vec![component("kafka_broker", ComponentCategory::Server)],
            ),
        )
        .unwrap();
    stack
        .add_order("KAFKA_BROKER-START", &["ZOOKEEPER_SERVER-START".to_string()])
        .unwrap();
    stack
}
