use super::handlers::{command, health, task};
use crate::executor::CommandDispatcher;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<CommandDispatcher>,
}

pub fn create_router(dispatcher: Arc<CommandDispatcher>) -> Router {
    let state = AppState { dispatcher };

    Router::new()
        .route("/health", get(health::health_check))
        // Controller -> agent commands
        .route("/api/commands", post(command::execute_command))
        // Local task inspection
        .route("/api/tasks/running", get(task::list_running_tasks))
        .route("/api/tasks/{id}/log", get(task::get_task_log))
        .with_state(state)
}
