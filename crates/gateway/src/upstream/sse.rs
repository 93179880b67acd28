//! SSE upstream connector: opens a long-lived GET against the upstream's
//! event endpoint and POSTs outbound JSON-RPC requests to its message
//! endpoint, the legacy two-endpoint SSE transport seen from the client
//! side.

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::UpstreamError;
use crate::session::SessionId;
use crate::token::StreamToken;
use crate::transport::TransportKind;
use crate::upstream::{UpstreamHandle, UpstreamTarget};

pub async fn connect(
	client: reqwest::Client,
	target: &UpstreamTarget,
	session_id: SessionId,
) -> Result<UpstreamHandle, UpstreamError> {
	let events_resp = client
		.get(&target.address)
		.header(http::header::ACCEPT, "text/event-stream")
		.send()
		.await
		.map_err(|e| UpstreamError::Connect(e.to_string()))?;
	if !events_resp.status().is_success() {
		return Err(UpstreamError::Connect(format!(
			"upstream returned {}",
			events_resp.status()
		)));
	}

	let (to_upstream_tx, mut to_upstream_rx) = mpsc::channel::<serde_json::Value>(64);
	let (token_tx, token_rx) = mpsc::channel::<StreamToken>(256);

	let message_endpoint = target.address.clone();
	let post_client = client.clone();
	let post_session = session_id.clone();
	tokio::spawn(async move {
		while let Some(message) = to_upstream_rx.recv().await {
			if let Err(e) = post_client
				.post(&message_endpoint)
				.json(&message)
				.send()
				.await
			{
				warn!(session_id = %post_session, error = %e, "sse upstream post failed");
			}
		}
	});

	let recv_session = session_id;
	tokio::spawn(async move {
		if token_tx
			.send(StreamToken::start(recv_session.clone()))
			.await
			.is_err()
		{
			return;
		}
		let mut stream = events_resp.bytes_stream();
		let mut buf = Vec::new();
		let mut seq = 0u64;
		while let Some(chunk) = stream.next().await {
			let chunk: Bytes = match chunk {
				Ok(c) => c,
				Err(e) => {
					debug!(error = %e, "sse upstream stream error");
					break;
				},
			};
			buf.extend_from_slice(&chunk);
			while let Some(pos) = find_event_boundary(&buf) {
				let raw = buf.drain(..pos + 2).collect::<Vec<u8>>();
				if let Some(data) = extract_data_field(&raw) {
					match serde_json::from_str::<serde_json::Value>(&data) {
						Ok(value) => {
							seq += 1;
							if token_tx
								.send(StreamToken::data(recv_session.clone(), seq, value))
								.await
								.is_err()
							{
								return;
							}
						},
						Err(e) => debug!(error = %e, "malformed sse upstream event"),
					}
				}
			}
		}
		seq += 1;
		let _ = token_tx.send(StreamToken::end(recv_session, seq)).await;
	});

	Ok(UpstreamHandle::new(TransportKind::Sse, to_upstream_tx, token_rx))
}

/// SSE events are terminated by a blank line (`\n\n`); returns the byte
/// offset of that boundary if the buffer contains a complete event.
fn find_event_boundary(buf: &[u8]) -> Option<usize> {
	buf.windows(2).position(|w| w == b"\n\n")
}

fn extract_data_field(raw: &[u8]) -> Option<String> {
	let text = String::from_utf8_lossy(raw);
	let mut data = String::new();
	for line in text.lines() {
		if let Some(rest) = line.strip_prefix("data:") {
			if !data.is_empty() {
				data.push('\n');
			}
			data.push_str(rest.trim_start());
		}
	}
	if data.is_empty() { None } else { Some(data) }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn extracts_single_line_data_field() {
		let raw = b"event: message\ndata: {\"a\":1}\n\n";
		assert_eq!(extract_data_field(raw), Some(r#"{"a":1}"#.to_string()));
	}

	#[test]
	fn joins_multi_line_data_field_with_newline() {
		let raw = b"data: line one\ndata: line two\n\n";
		assert_eq!(
			extract_data_field(raw),
			Some("line one\nline two".to_string())
		);
	}

	#[test]
	fn finds_boundary_at_blank_line() {
		let buf = b"event: message\ndata: x\n\nmore".to_vec();
		let pos = find_event_boundary(&buf).expect("boundary found");
		assert_eq!(&buf[pos..pos + 2], b"\n\n");
	}
}
