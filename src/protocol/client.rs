use super::{CommandReply, CommandRequest, decode_reply, encode_request};
use crate::error::{AppError, Result};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

pub type AgentFuture<'a> = Pin<Box<dyn Future<Output = Result<CommandReply>> + Send + 'a>>;

/// Remote-call seam between a task and the agent on its target host.
///
/// Any `Err` is a transport failure (unreachable host, timeout, malformed reply).
/// Command failures arrive as an `Ok` reply with a non-success code.
pub trait AgentClient: Send + Sync {
    fn call<'a>(&'a self, hostname: &'a str, port: u16, request: &'a CommandRequest) -> AgentFuture<'a>;
}

#[derive(Clone)]
pub struct HttpAgentClient {
    client: reqwest::Client,
}

impl HttpAgentClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl AgentClient for HttpAgentClient {
    fn call<'a>(&'a self, hostname: &'a str, port: u16, request: &'a CommandRequest) -> AgentFuture<'a> {
        Box::pin(async move {
            let url = format!("http://{}:{}/api/commands", hostname, port);
            let body = encode_request(request)?;

            let response = self
                .client
                .post(&url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await
                .map_err(|e| AppError::Transport(format!("Request to {} failed: {}", url, e)))?
                .error_for_status()
                .map_err(|e| AppError::Transport(format!("Agent {} rejected request: {}", url, e)))?;

            let bytes = response
                .bytes()
                .await
                .map_err(|e| AppError::Transport(format!("Failed to read reply from {}: {}", url, e)))?;

            decode_reply(&bytes)
        })
    }
}
