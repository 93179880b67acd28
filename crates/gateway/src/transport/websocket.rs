//! WebSocket delivery, server side. Uses axum's built-in `ws` extractor
//! for the upgrade handshake and framing, since the gateway originates
//! the socket itself and a framework-level extractor is the natural
//! fit. The raw `websocket-sans-io` decoder is reserved for the
//! *upstream* WebSocket connector in [`crate::upstream::websocket`],
//! which really is decoding frames off a self-managed TCP stream.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::token::{StreamToken, TokenKind};

/// Drives one client WebSocket connection: forwards inbound JSON-RPC
/// text frames to `to_upstream`, and writes every token received on
/// `from_upstream` back to the client until either side closes.
pub async fn drive(
	mut socket: WebSocket,
	to_upstream: mpsc::Sender<serde_json::Value>,
	mut from_upstream: mpsc::Receiver<StreamToken>,
) {
	loop {
		tokio::select! {
			inbound = socket.recv() => {
				match inbound {
					Some(Ok(Message::Text(text))) => {
						match serde_json::from_str::<serde_json::Value>(&text) {
							Ok(value) => {
								if to_upstream.send(value).await.is_err() {
									break;
								}
							},
							Err(e) => debug!(error = %e, "dropping malformed websocket frame"),
						}
					},
					Some(Ok(Message::Close(_))) | None => break,
					Some(Ok(_)) => {},
					Some(Err(e)) => {
						debug!(error = %e, "websocket recv error");
						break;
					},
				}
			}
			token = from_upstream.recv() => {
				let Some(token) = token else { break };
				if matches!(token.kind, TokenKind::End | TokenKind::Error) {
					let _ = socket.send(token_to_message(&token)).await;
					break;
				}
				if socket.send(token_to_message(&token)).await.is_err() {
					break;
				}
			}
		}
	}
	let _ = socket.close().await;
}

fn token_to_message(token: &StreamToken) -> Message {
	let body = serde_json::json!({
		"kind": token.kind,
		"seq": token.seq,
		"payload": token.payload,
		"reason": token.reason,
	});
	Message::Text(body.to_string().into())
}
