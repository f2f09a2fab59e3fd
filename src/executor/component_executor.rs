use super::{AgentSettings, CommandExecutor, ExecOutcome, ExecutorFuture};
use crate::error::{AppError, Result};
use crate::models::Command;
use crate::protocol::{CommandRequest, CommandType, ComponentCommandPayload, FAIL_CODE};
use std::path::{Path, PathBuf};
use std::process::Stdio;

const LAUNCHER_DIR: &str = "bin";
const LOG_TAIL_LINES: usize = 20;

/// Runs a stack plugin lifecycle action for one component.
pub struct ComponentExecutor;

/// Per-task log file written by component commands.
pub fn task_log_path(logs_dir: &Path, task_id: i64) -> PathBuf {
    logs_dir.join(format!("task-{}.log", task_id))
}

impl CommandExecutor for ComponentExecutor {
    fn command_type(&self) -> CommandType {
        CommandType::Component
    }

    fn do_execute<'a>(&'a self, settings: &'a AgentSettings, request: &'a CommandRequest) -> ExecutorFuture<'a> {
        Box::pin(async move {
            let payload: ComponentCommandPayload = request.payload_as()?;
            run_launcher(settings, request, &payload).await
        })
    }
}

fn launcher_path(stacks_dir: &Path, payload: &ComponentCommandPayload) -> Result<PathBuf> {
    Ok(stacks_dir
        .join(path_segment("stack_name", &payload.stack_name)?)
        .join(path_segment("stack_version", &payload.stack_version)?)
        .join("services")
        .join(path_segment("service_name", &payload.service_name)?)
        .join(LAUNCHER_DIR)
        .join(path_segment("component_name", &payload.component_name)?))
}

/// A payload name must stay a single plain path component under the stacks dir.
fn path_segment<'a>(field: &str, value: &'a str) -> Result<&'a Path> {
    let path = Path::new(value);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(std::path::Component::Normal(name)), None) if name == value => Ok(path),
        _ => Err(AppError::InvalidCommand(format!("Invalid {}: {:?}", field, value))),
    }
}

fn action(payload: &ComponentCommandPayload) -> Result<String> {
    match (&payload.command, &payload.custom_command) {
        (Command::Custom, Some(custom)) if !custom.trim().is_empty() => Ok(custom.clone()),
        (Command::Custom, _) => Err(AppError::InvalidCommand(
            "custom command without a name".to_string(),
        )),
        (command, _) => Ok(command.code().to_string()),
    }
}

async fn run_launcher(
    settings: &AgentSettings,
    request: &CommandRequest,
    payload: &ComponentCommandPayload,
) -> Result<ExecOutcome> {
    let launcher = launcher_path(&settings.stacks_dir, payload)?;
    if !launcher.is_file() {
        return Err(AppError::Execution(format!(
            "Launcher not found: {}",
            launcher.display()
        )));
    }
    let action = action(payload)?;

    std::fs::create_dir_all(&settings.logs_dir)?;
    let log_path = task_log_path(&settings.logs_dir, request.task_id);
    let log_file = std::fs::File::create(&log_path)?;
    let stderr_file = log_file.try_clone()?;

    let mut cmd = tokio::process::Command::new(&launcher);
    cmd.arg(&action);
    cmd.env("FLEET_COMMAND_PAYLOAD", &request.payload);
    cmd.env("FLEET_CACHE_DIR", &settings.cache_dir);
    cmd.env("FLEET_TASK_ID", request.task_id.to_string());
    if let Some(dir) = launcher.parent() {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::from(log_file));
    cmd.stderr(Stdio::from(stderr_file));

    tracing::info!(
        "Running {} {} for task {}, log at {}",
        launcher.display(),
        action,
        request.task_id,
        log_path.display()
    );
    let status = cmd.spawn()?.wait().await?;

    if status.success() {
        return Ok(ExecOutcome::success(format!(
            "{} {} succeeded on {}",
            action, payload.component_name, request.hostname
        )));
    }

    let tail = log_tail(&log_path);
    let code = match status.code() {
        Some(code) if code != 0 => code,
        _ => FAIL_CODE,
    };
    Ok(ExecOutcome::failure(
        code,
        format!(
            "{} {} exited with {}\n{}",
            action, payload.component_name, status, tail
        ),
    ))
}

fn log_tail(path: &Path) -> String {
    let Ok(content) = std::fs::read_to_string(path) else {
        return String::new();
    };
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(LOG_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn payload(command: Command, custom: Option<&str>) -> ComponentCommandPayload {
        ComponentCommandPayload {
            command,
            custom_command: custom.map(str::to_string),
            service_name: "zookeeper".to_string(),
            service_user: "zookeeper".to_string(),
            service_group: "hadoop".to_string(),
            component_name: "zookeeper_server".to_string(),
            stack_name: "infra".to_string(),
            stack_version: "1.0.0".to_string(),
            root_dir: "/opt".to_string(),
            properties: Map::new(),
        }
    }

    #[test]
    fn launcher_lives_under_the_service_bin_dir() {
        let path = launcher_path(Path::new("/srv/stacks"), &payload(Command::Start, None)).unwrap();
        assert_eq!(
            path,
            PathBuf::from("/srv/stacks/infra/1.0.0/services/zookeeper/bin/zookeeper_server")
        );
    }

    #[test]
    fn names_cannot_escape_the_stacks_dir() {
        let stacks = Path::new("/srv/stacks");
        for (field, value) in [
            ("stack", "../../.."),
            ("version", "1.0.0/../../etc"),
            ("service", "/usr/bin"),
            ("component", ".."),
            ("component", "."),
            ("component", ""),
            ("component", "bin/sh"),
        ] {
            let mut payload = payload(Command::Start, None);
            match field {
                "stack" => payload.stack_name = value.to_string(),
                "version" => payload.stack_version = value.to_string(),
                "service" => payload.service_name = value.to_string(),
                _ => payload.component_name = value.to_string(),
            }
            let err = launcher_path(stacks, &payload).unwrap_err();
            assert!(matches!(err, AppError::InvalidCommand(_)), "{field}={value:?}");
        }
    }

    #[tokio::test]
    async fn traversing_payload_is_rejected_before_running() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings = AgentSettings {
            cache_dir: dir.path().join("cache"),
            stack_cache_dir: dir.path().join("stack_cache"),
            stacks_dir: dir.path().join("stacks"),
            logs_dir: dir.path().join("logs"),
            dev_mode: false,
        };
        let mut payload = payload(Command::Start, None);
        payload.service_name = "../../../../bin".to_string();
        let request = CommandRequest {
            command_type: CommandType::Component,
            hostname: "h1".to_string(),
            payload: serde_json::to_string(&payload).unwrap(),
            task_id: 6,
            stage_id: 1,
            job_id: 1,
        };

        let err = ComponentExecutor.do_execute(&settings, &request).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCommand(_)));
        assert!(!task_log_path(&settings.logs_dir, 6).exists());
    }

    #[test]
    fn custom_commands_need_a_name() {
        assert_eq!(action(&payload(Command::Start, None)).unwrap(), "start");
        assert_eq!(
            action(&payload(Command::Custom, Some("rebalance"))).unwrap(),
            "rebalance"
        );
        assert!(action(&payload(Command::Custom, None)).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_launcher_reports_exit_code_and_log() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let settings = AgentSettings {
            cache_dir: dir.path().join("cache"),
            stack_cache_dir: dir.path().join("stack_cache"),
            stacks_dir: dir.path().join("stacks"),
            logs_dir: dir.path().join("logs"),
            dev_mode: false,
        };
        let payload = payload(Command::Start, None);
        let launcher = launcher_path(&settings.stacks_dir, &payload).unwrap();
        std::fs::create_dir_all(launcher.parent().unwrap()).unwrap();
        std::fs::write(&launcher, "#!/bin/sh\necho \"starting $1\"\nexit 3\n").unwrap();
        std::fs::set_permissions(&launcher, std::fs::Permissions::from_mode(0o755)).unwrap();

        let request = CommandRequest {
            command_type: CommandType::Component,
            hostname: "h1".to_string(),
            payload: serde_json::to_string(&payload).unwrap(),
            task_id: 5,
            stage_id: 1,
            job_id: 1,
        };
        let outcome = ComponentExecutor.do_execute(&settings, &request).await.unwrap();
        assert_eq!(outcome.code, 3);
        assert!(outcome.result.contains("starting start"));
        assert!(task_log_path(&settings.logs_dir, 5).is_file());
    }
}
