//! `/ws/test` connectivity probe.

use axum::extract::ws::{Message, WebSocket};
use tracing::debug;

/// Prefix prepended to every echoed text frame.
pub const ECHO_PREFIX: &str = "Echo: ";

/// Reply to every text frame with the same text behind [`ECHO_PREFIX`].
///
/// Never touches the registry and never validates anything.
pub async fn run_echo(mut ws: WebSocket) {
    while let Some(frame) = ws.recv().await {
        match frame {
            Ok(Message::Text(text)) => {
                let reply = echo_reply(text.as_str());
                if ws.send(Message::Text(reply.into())).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "echo probe transport error");
                break;
            }
        }
    }
}

fn echo_reply(text: &str) -> String {
    format!("{ECHO_PREFIX}{text}")
}
