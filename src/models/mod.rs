pub mod cluster;
pub mod command;
pub mod job;

pub use cluster::{ClusterRecord, HostComponentRecord, HostRecord};
pub use command::{Command, CommandLevel, ExecutionState, MaintainState};
pub use job::{JobRecord, StageRecord, TaskRecord};
