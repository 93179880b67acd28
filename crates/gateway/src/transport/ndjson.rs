//! Newline-delimited JSON streaming over a chunked HTTP body. The
//! simplest of the four delivery modes: one JSON document per line, no
//! framing beyond `\n`, which is why the policy engine prefers it as the
//! default fallback target when a native push mode isn't reachable.

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::header;

use crate::token::StreamToken;

pub fn respond(stream: impl Stream<Item = StreamToken> + Send + 'static) -> Response {
	let body = Body::from_stream(stream.map(|token| {
		let mut line = serde_json::to_vec(&token).unwrap_or_default();
		line.push(b'\n');
		Ok::<_, std::io::Error>(Bytes::from(line))
	}));
	Response::builder()
		.status(http::StatusCode::OK)
		.header(header::CONTENT_TYPE, "application/x-ndjson")
		.body(body)
		.expect("valid response")
}

/// Parses one line of an inbound NDJSON request body into a JSON-RPC
/// message. Blank lines are ignored (some clients send a trailing `\n`).
pub fn parse_line(line: &str) -> Option<Result<serde_json::Value, serde_json::Error>> {
	let trimmed = line.trim();
	if trimmed.is_empty() {
		return None;
	}
	Some(serde_json::from_str(trimmed))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_line_skips_blank_lines() {
		assert!(parse_line("").is_none());
		assert!(parse_line("   ").is_none());
	}

	#[test]
	fn parse_line_parses_json() {
		let parsed = parse_line(r#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
		assert!(parsed.is_ok());
	}
}
