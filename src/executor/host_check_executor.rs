use super::{AgentSettings, CommandExecutor, ExecOutcome, ExecutorFuture};
use crate::error::{AppError, Result};
use crate::protocol::{CommandRequest, CommandType, FAIL_CODE, HostCheckPayload};

pub const TIME_SYNC_CHECK: &str = "time_sync";
pub const HOSTNAME_RESOLUTION_CHECK: &str = "hostname_resolution";

const ALL_CHECKS: [&str; 2] = [TIME_SYNC_CHECK, HOSTNAME_RESOLUTION_CHECK];

/// Host pre-flight checks, run in order until one fails.
pub struct HostCheckExecutor;

impl CommandExecutor for HostCheckExecutor {
    fn command_type(&self) -> CommandType {
        CommandType::HostCheck
    }

    fn do_execute<'a>(&'a self, _settings: &'a AgentSettings, request: &'a CommandRequest) -> ExecutorFuture<'a> {
        Box::pin(async move {
            let payload: HostCheckPayload = if request.payload.trim().is_empty() {
                HostCheckPayload::default()
            } else {
                request.payload_as()?
            };

            let checks = selected_checks(&payload)?;
            for check in &checks {
                if let Err(message) = run_check(check, &request.hostname).await {
                    tracing::warn!("Host check {} failed: {}", check, message);
                    return Ok(ExecOutcome::failure(FAIL_CODE, message));
                }
            }
            Ok(ExecOutcome::success(format!(
                "Host [{}] passed checks: {}",
                request.hostname,
                checks.join(", ")
            )))
        })
    }
}

fn selected_checks(payload: &HostCheckPayload) -> Result<Vec<String>> {
    if payload.checks.is_empty() {
        return Ok(ALL_CHECKS.iter().map(|c| c.to_string()).collect());
    }
    for check in &payload.checks {
        if !ALL_CHECKS.contains(&check.as_str()) {
            return Err(AppError::InvalidCommand(format!("Unknown host check: {}", check)));
        }
    }
    Ok(payload.checks.clone())
}

async fn run_check(check: &str, hostname: &str) -> std::result::Result<(), String> {
    match check {
        TIME_SYNC_CHECK => check_time_sync().await,
        HOSTNAME_RESOLUTION_CHECK => check_hostname_resolution(hostname).await,
        other => Err(format!("Unknown host check: {}", other)),
    }
}

async fn check_time_sync() -> std::result::Result<(), String> {
    let output = tokio::process::Command::new("timedatectl")
        .args(["show", "-p", "NTPSynchronized", "--value"])
        .output()
        .await
        .map_err(|e| format!("Failed to run timedatectl: {}", e))?;

    if !output.status.success() {
        return Err(format!(
            "timedatectl exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    parse_ntp_synchronized(&String::from_utf8_lossy(&output.stdout))
}

fn parse_ntp_synchronized(stdout: &str) -> std::result::Result<(), String> {
    match stdout.trim() {
        "yes" => Ok(()),
        other => Err(format!(
            "System clock is not synchronized (NTPSynchronized={})",
            other
        )),
    }
}

async fn check_hostname_resolution(hostname: &str) -> std::result::Result<(), String> {
    let mut addrs = tokio::net::lookup_host((hostname, 0))
        .await
        .map_err(|e| format!("Hostname {} does not resolve: {}", hostname, e))?;
    if addrs.next().is_none() {
        return Err(format!("Hostname {} resolves to no address", hostname));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_runs_every_check() {
        let checks = selected_checks(&HostCheckPayload::default()).unwrap();
        assert_eq!(checks, vec![TIME_SYNC_CHECK, HOSTNAME_RESOLUTION_CHECK]);
    }

    #[test]
    fn unknown_check_is_rejected() {
        let payload = HostCheckPayload {
            checks: vec!["disk_space".to_string()],
        };
        assert!(selected_checks(&payload).is_err());
    }

    #[test]
    fn ntp_value_must_be_yes() {
        assert!(parse_ntp_synchronized("yes\n").is_ok());
        assert!(parse_ntp_synchronized("no\n").is_err());
    }

    #[tokio::test]
    async fn localhost_resolves() {
        assert!(check_hostname_resolution("localhost").await.is_ok());
    }
}
