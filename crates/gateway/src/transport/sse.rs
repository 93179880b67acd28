//! Server-Sent Events delivery. Built on axum's own `Sse` response type;
//! `Sse::keep_alive` covers the periodic-comment keepalive requirement
//! directly.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::Response;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum_core::response::IntoResponse;
use futures_util::Stream;
use futures_util::StreamExt;

use crate::session::SessionDropper;
use crate::token::{StreamToken, TokenKind};

/// Builds the `text/event-stream` response for a session's GET stream.
/// `dropper` is attached to the response body so that when the client
/// disconnects (the body future is dropped), the session and its
/// upstream connector are torn down.
pub fn respond(
	stream: impl Stream<Item = StreamToken> + Send + 'static,
	keepalive_interval: Duration,
	dropper: SessionDropper,
) -> Response {
	let events = stream.map(|token| Ok::<Event, Infallible>(token_to_event(&token)));
	let sse = Sse::new(events).keep_alive(KeepAlive::new().interval(keepalive_interval).text(""));
	let mut response = sse.into_response();
	// Stash the dropper as an extension so its lifetime is tied to the
	// response; axum drops extensions when the response body completes.
	response.extensions_mut().insert(DropperHandle(dropper));
	response
}

/// Translates one [`StreamToken`] to the wire-level SSE event it must
/// produce. `START` and `HEARTBEAT` are comments rather than named
/// events — intermediaries and the `EventSource` spec both treat a
/// comment line as a no-op data event, which is exactly what a
/// timer-stopping ping needs. `END` uses the named `done` event with the
/// literal payload `[DONE]`, not JSON-encoded, per the wire format every
/// client of this gateway is written against.
fn token_to_event(token: &StreamToken) -> Event {
	match token.kind {
		TokenKind::Start => Event::default().comment("stream-start"),
		TokenKind::Keepalive => Event::default().comment(token.reason.clone().unwrap_or_default()),
		TokenKind::End => Event::default()
			.event("done")
			.id(token.seq.to_string())
			.data("[DONE]"),
		TokenKind::Data | TokenKind::Metadata => {
			let body = token.payload.clone().unwrap_or(serde_json::Value::Null);
			Event::default()
				.id(token.seq.to_string())
				.json_data(body)
				.unwrap_or_else(|_| Event::default())
		},
		TokenKind::FallbackTriggered => {
			let body = token
				.reason
				.clone()
				.map(serde_json::Value::String)
				.unwrap_or(serde_json::Value::Null);
			Event::default()
				.event("fallback")
				.id(token.seq.to_string())
				.json_data(body)
				.unwrap_or_else(|_| Event::default())
		},
		TokenKind::Error => {
			let body = token
				.reason
				.clone()
				.map(serde_json::Value::String)
				.unwrap_or(serde_json::Value::Null);
			Event::default()
				.event("error")
				.id(token.seq.to_string())
				.json_data(body)
				.unwrap_or_else(|_| Event::default())
		},
	}
}

#[derive(Clone)]
struct DropperHandle(#[allow(dead_code)] SessionDropper);

#[cfg(test)]
mod tests {
	use super::*;
	use crate::session::SessionId;

	fn rendered(event: Event) -> String {
		// `axum::response::sse::Event` renders itself through its `Stream`
		// impl as one SSE frame; format it via its `Debug` impl's inner
		// fields is not exposed, so drive it through `async-sse`'s own
		// line format indirectly by checking the parts we control: this
		// crate's `token_to_event` output is exercised end-to-end in
		// `http::handlers` integration tests instead. Here we just assert
		// construction doesn't panic for every variant.
		format!("{event:?}")
	}

	#[test]
	fn start_token_is_a_comment() {
		let id = SessionId::new();
		let e = token_to_event(&StreamToken::start(id));
		assert!(rendered(e).contains("stream-start"));
	}

	#[test]
	fn end_token_uses_done_event_with_literal_done_payload() {
		let id = SessionId::new();
		let e = token_to_event(&StreamToken::end(id, 3));
		let rendered = rendered(e);
		assert!(rendered.contains("done"));
		assert!(rendered.contains("[DONE]"));
	}

	#[test]
	fn keepalive_is_a_comment_not_a_named_event() {
		let id = SessionId::new();
		let e = token_to_event(&StreamToken::keepalive(id, 1));
		let rendered = rendered(e);
		assert!(!rendered.contains("\"event\""));
	}
}
