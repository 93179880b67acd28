//! Synchronous request/response delivery: wait for the first terminal
//! token and return it as a plain JSON body, no streaming at all. Chosen
//! by the policy engine when the request is small and fast enough that
//! streaming would just add overhead.

use std::time::Duration;

use axum::Json;
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::{GatewayError, UpstreamError};
use crate::token::TokenKind;

pub async fn respond(
	mut from_upstream: mpsc::Receiver<crate::token::StreamToken>,
	budget: Duration,
) -> Result<Response, GatewayError> {
	let mut last_payload = serde_json::Value::Null;
	loop {
		let next = timeout(budget, from_upstream.recv())
			.await
			.map_err(|_| UpstreamError::Timeout(budget))?;
		match next {
			Some(token) => match token.kind {
				TokenKind::Data => {
					if let Some(payload) = token.payload {
						last_payload = payload;
					}
				},
				TokenKind::End => return Ok(Json(last_payload).into_response()),
				TokenKind::Error => {
					return Err(
						UpstreamError::InvalidMessage(token.reason.unwrap_or_default()).into(),
					);
				},
				TokenKind::Start
				| TokenKind::Metadata
				| TokenKind::Keepalive
				| TokenKind::FallbackTriggered => {},
			},
			None => return Ok(Json(last_payload).into_response()),
		}
	}
}
