use crate::api::dto::task::{RunningTasksResponse, TaskLogResponse};
use crate::api::routes::AppState;
use crate::error::{AppError, Result};
use crate::executor::task_log_path;
use axum::{
    Json,
    extract::{Path, State},
};

pub async fn list_running_tasks(State(state): State<AppState>) -> Json<RunningTasksResponse> {
    Json(RunningTasksResponse {
        data: state.dispatcher.running_tasks(),
    })
}

pub async fn get_task_log(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> Result<Json<TaskLogResponse>> {
    let path = task_log_path(&state.dispatcher.settings().logs_dir, task_id);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::TaskLogNotFound(task_id));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(Json(TaskLogResponse { task_id, content }))
}
