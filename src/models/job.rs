use super::{Command, ExecutionState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRecord {
    pub id: i64,
    pub cluster_id: Option<i64>,
    pub name: String,
    /// Serialized `JobContext`.
    pub context: String,
    pub state: ExecutionState,
    pub attempt: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct StageRecord {
    pub id: i64,
    pub job_id: i64,
    pub attempt: i64,
    pub stage_order: i64,
    pub name: String,
    pub service_name: String,
    pub component_name: String,
    /// Serialized `StageContext`.
    pub context: String,
    pub state: ExecutionState,
    pub message: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskRecord {
    pub id: i64,
    pub job_id: i64,
    pub stage_id: i64,
    pub name: String,
    pub hostname: String,
    pub service_name: String,
    pub component_name: String,
    pub command: Command,
    pub custom_command: Option<String>,
    /// Serialized `TaskContext`.
    pub context: String,
    /// Request actually sent to the agent.
    pub content: Option<String>,
    /// Diagnostic text returned by the agent or the transport.
    pub result: Option<String>,
    pub state: ExecutionState,
    pub created_at: i64,
    pub updated_at: i64,
}
