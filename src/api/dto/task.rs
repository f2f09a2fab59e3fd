use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct RunningTasksResponse {
    pub data: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskLogResponse {
    pub task_id: i64,
    pub content: String,
}
