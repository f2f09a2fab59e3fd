use super::MaintainState;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClusterRecord {
    pub id: i64,
    pub name: String,
    pub stack_name: String,
    pub stack_version: String,
    pub root_dir: String,
    pub user_group: String,
    /// Serialized package repositories.
    pub repos: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HostRecord {
    pub id: i64,
    pub cluster_id: Option<i64>,
    pub hostname: String,
    pub agent_port: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HostComponentRecord {
    pub id: i64,
    pub cluster_id: i64,
    pub hostname: String,
    pub service_name: String,
    pub component_name: String,
    pub state: MaintainState,
    pub updated_at: i64,
}
