//! Request/reply envelope exchanged between the controller and host agents.
//!
//! One request/reply pair travels per task. The envelope is stable; the payload
//! schema belongs to the command type and travels as JSON text.

pub mod client;
pub mod payload;

pub use client::{AgentClient, AgentFuture, HttpAgentClient};
pub use payload::{
    CacheFilesPayload, ClusterInfo, ComponentCommandPayload, ComponentInfo, HostCheckPayload,
    RepoInfo, ALL_HOSTS_KEY,
};

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const SUCCESS_CODE: i32 = 0;
pub const FAIL_CODE: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    Component,
    CacheDistribute,
    UpdateCacheFiles,
    HostCheck,
    SetupJdk,
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandType::Component => "COMPONENT",
            CommandType::CacheDistribute => "CACHE_DISTRIBUTE",
            CommandType::UpdateCacheFiles => "UPDATE_CACHE_FILES",
            CommandType::HostCheck => "HOST_CHECK",
            CommandType::SetupJdk => "SETUP_JDK",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRequest {
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub hostname: String,
    #[serde(default)]
    pub payload: String,
    pub task_id: i64,
    pub stage_id: i64,
    pub job_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReply {
    #[serde(rename = "type")]
    pub command_type: CommandType,
    pub hostname: String,
    pub task_id: i64,
    pub stage_id: i64,
    pub job_id: i64,
    pub code: i32,
    #[serde(default)]
    pub result: String,
}

impl CommandRequest {
    /// Parses the payload into the schema owned by this request's command type.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.payload).map_err(|e| {
            AppError::Protocol(format!("Invalid {} payload: {}", self.command_type, e))
        })
    }
}

impl CommandReply {
    /// Builds a reply carrying the correlation fields of `request` unchanged.
    pub fn for_request(request: &CommandRequest, code: i32, result: impl Into<String>) -> Self {
        Self {
            command_type: request.command_type,
            hostname: request.hostname.clone(),
            task_id: request.task_id,
            stage_id: request.stage_id,
            job_id: request.job_id,
            code,
            result: result.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// Whether this reply carries the correlation ids of `request`.
    pub fn answers(&self, request: &CommandRequest) -> bool {
        self.task_id == request.task_id && self.stage_id == request.stage_id && self.job_id == request.job_id
    }
}

pub fn encode_request(request: &CommandRequest) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(request)?)
}

pub fn decode_request(bytes: &[u8]) -> Result<CommandRequest> {
    serde_json::from_slice(bytes).map_err(|e| AppError::Protocol(format!("Malformed request: {}", e)))
}

pub fn encode_reply(reply: &CommandReply) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(reply)?)
}

pub fn decode_reply(bytes: &[u8]) -> Result<CommandReply> {
    serde_json::from_slice(bytes).map_err(|e| AppError::Protocol(format!("Malformed reply: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CommandRequest {
        CommandRequest {
            command_type: CommandType::Component,
            hostname: "node-2.example".to_string(),
            payload: r#"{"command":"start"}"#.to_string(),
            task_id: 71,
            stage_id: 12,
            job_id: 3,
        }
    }

    #[test]
    fn correlation_fields_pass_through() {
        let bytes = encode_request(&request()).unwrap();
        let decoded = decode_request(&bytes).unwrap();
        assert_eq!(decoded, request());

        let reply = CommandReply::for_request(&decoded, SUCCESS_CODE, "ok");
        let reply = decode_reply(&encode_reply(&reply).unwrap()).unwrap();
        assert_eq!(reply.task_id, 71);
        assert_eq!(reply.stage_id, 12);
        assert_eq!(reply.job_id, 3);
        assert_eq!(reply.hostname, "node-2.example");
        assert_eq!(reply.command_type, CommandType::Component);
        assert!(reply.is_success());
    }

    #[test]
    fn reply_for_another_task_does_not_answer() {
        let request = CommandRequest {
            command_type: CommandType::Component,
            hostname: "node-2.example".to_string(),
            payload: "{}".to_string(),
            task_id: 71,
            stage_id: 12,
            job_id: 3,
        };
        let reply = CommandReply::for_request(&request, SUCCESS_CODE, "ok");
        assert!(reply.answers(&request));

        for (task_id, stage_id, job_id) in [(72, 12, 3), (71, 13, 3), (71, 12, 4)] {
            let stray = CommandReply {
                task_id,
                stage_id,
                job_id,
                ..reply.clone()
            };
            assert!(!stray.answers(&request), "{task_id}/{stage_id}/{job_id}");
        }
    }

    #[test]
    fn wire_field_names_are_stable() {
        let value: serde_json::Value =
            serde_json::from_slice(&encode_request(&request()).unwrap()).unwrap();
        assert_eq!(value["type"], "COMPONENT");
        assert_eq!(value["taskId"], 71);
        assert_eq!(value["stageId"], 12);
        assert_eq!(value["jobId"], 3);
    }

    #[test]
    fn malformed_reply_is_a_protocol_error() {
        let err = decode_reply(b"{\"code\": 0").unwrap_err();
        assert!(matches!(err, AppError::Protocol(_)));
    }

    #[test]
    fn non_zero_code_is_failure() {
        let reply = CommandReply::for_request(&request(), FAIL_CODE, "boom");
        assert!(!reply.is_success());
    }
}
