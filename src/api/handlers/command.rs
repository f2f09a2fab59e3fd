use crate::api::routes::AppState;
use crate::error::Result;
use crate::protocol::{CommandReply, decode_request};
use axum::{Json, body::Bytes, extract::State};

/// Decodes the envelope by hand so a malformed body is reported as a protocol error.
pub async fn execute_command(State(state): State<AppState>, body: Bytes) -> Result<Json<CommandReply>> {
    let request = decode_request(&body)?;
    let reply = state.dispatcher.dispatch(request).await;
    Ok(Json(reply))
}
