use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use fleet_manager::api::create_router;
use fleet_manager::executor::{AgentSettings, CommandDispatcher, builtin_executors};
use fleet_manager::protocol::{CommandReply, CommandRequest, CommandType, encode_request};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

fn router(dir: &TempDir, dev_mode: bool) -> axum::Router {
    let settings = AgentSettings {
        cache_dir: dir.path().join("data/cache"),
        stack_cache_dir: dir.path().join("data/stack_cache"),
        stacks_dir: dir.path().join("stacks"),
        logs_dir: dir.path().join("logs"),
        dev_mode,
    };
    create_router(Arc::new(CommandDispatcher::new(builtin_executors(), settings)))
}

fn command_request(command_type: CommandType, payload: &str) -> CommandRequest {
    CommandRequest {
        command_type,
        hostname: "node-7".to_string(),
        payload: payload.to_string(),
        task_id: 301,
        stage_id: 45,
        job_id: 12,
    }
}

async fn post_command(app: axum::Router, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/commands")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

#[tokio::test]
async fn dev_mode_replies_success_with_correlation_ids() {
    let dir = TempDir::new().unwrap();
    let request = command_request(CommandType::Component, r#"{"command":"start"}"#);

    let (status, body) = post_command(router(&dir, true), encode_request(&request).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    let reply: CommandReply = serde_json::from_slice(&body).unwrap();
    assert!(reply.is_success());
    assert_eq!(reply.task_id, 301);
    assert_eq!(reply.stage_id, 45);
    assert_eq!(reply.job_id, 12);
    assert_eq!(reply.hostname, "node-7");
    assert_eq!(reply.command_type, CommandType::Component);
}

#[tokio::test]
async fn malformed_envelope_is_a_bad_request() {
    let dir = TempDir::new().unwrap();

    let (status, body) = post_command(router(&dir, false), br#"{"type":"COMPONENT","hostname":1}"#.to_vec()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let error: Value = serde_json::from_slice(&body).unwrap();
    assert!(error["error"].as_str().unwrap().contains("Malformed request"));
}

#[tokio::test]
async fn executor_failure_is_a_structured_reply() {
    let dir = TempDir::new().unwrap();
    let request = command_request(CommandType::UpdateCacheFiles, "not json");

    let (status, body) = post_command(router(&dir, false), encode_request(&request).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    let reply: CommandReply = serde_json::from_slice(&body).unwrap();
    assert!(!reply.is_success());
    assert!(reply.result.contains("Invalid UPDATE_CACHE_FILES payload"));
    assert_eq!(reply.task_id, 301);
}

#[tokio::test]
async fn cache_update_writes_files_on_the_agent() {
    let dir = TempDir::new().unwrap();
    let request = command_request(CommandType::UpdateCacheFiles, r#"{"cluster_info":{"cluster_name":"prod","stack_name":"infra","stack_version":"1.0.0","user_group":"hadoop","root_dir":"/opt"}}"#);

    let (status, body) = post_command(router(&dir, false), encode_request(&request).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    let reply: CommandReply = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply.result, "Host [node-7] cached successful!!!");
    assert!(dir.path().join("data/cache/cluster.json").is_file());
}

#[tokio::test]
async fn missing_task_log_is_not_found() {
    let dir = TempDir::new().unwrap();

    let response = router(&dir, false)
        .oneshot(Request::builder().uri("/api/tasks/99/log").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn task_log_is_served() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("logs")).unwrap();
    std::fs::write(dir.path().join("logs/task-5.log"), "started\n").unwrap();

    let response = router(&dir, false)
        .oneshot(Request::builder().uri("/api/tasks/5/log").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let log: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(log["task_id"], 5);
    assert_eq!(log["content"], "started\n");
}
