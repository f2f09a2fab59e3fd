pub mod cluster_repository;
pub mod connection;
pub mod host_component_repository;
pub mod host_repository;
pub mod job_repository;
pub mod stage_repository;
pub mod task_repository;

pub use cluster_repository::{ClusterRepository, NewCluster};
pub use connection::establish_connection;
pub use host_component_repository::HostComponentRepository;
pub use host_repository::HostRepository;
pub use job_repository::JobRepository;
pub use stage_repository::{NewStage, StageRepository};
pub use task_repository::{NewTask, TaskRepository};

pub type DbPool = sqlx::SqlitePool;

/// States a record may still leave; terminal states are never rewritten.
pub(crate) const OPEN_STATES: [crate::models::ExecutionState; 2] = [
    crate::models::ExecutionState::Pending,
    crate::models::ExecutionState::Processing,
];
