//! NDJSON upstream connector: POSTs the outbound request and reads the
//! response body as a stream of newline-delimited JSON documents. Used
//! for upstreams that speak the chunked-HTTP variant of the protocol
//! instead of SSE framing.

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
	let (to_upstream_tx, mut to_upstream_rx) = mpsc::channel::<serde_json::Value>(64);
	let (token_tx, token_rx) = mpsc::channel::<StreamToken>(256);

	let address = target.address.clone();
	let start_session = session_id.clone();
	tokio::spawn(async move {
		if token_tx
			.send(StreamToken::start(start_session.clone()))
			.await
			.is_err()
		{
			return;
		}
		while let Some(message) = to_upstream_rx.recv().await {
			let resp = match client
				.post(&address)
				.header(http::header::CONTENT_TYPE, "application/json")
				.json(&message)
				.send()
				.await
			{
				Ok(r) => r,
				Err(e) => {
					warn!(session_id = %session_id, error = %e, "ndjson upstream post failed");
					continue;
				},
			};

			let mut stream = resp.bytes_stream();
			let mut buf = Vec::new();
			let mut seq = 0u64;
			while let Some(chunk) = stream.next().await {
				let chunk: Bytes = match chunk {
					Ok(c) => c,
					Err(e) => {
						debug!(error = %e, "ndjson upstream stream error");
						break;
					},
				};
				buf.extend_from_slice(&chunk);
				while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
					let line: Vec<u8> = buf.drain(..=pos).collect();
					let line = &line[..line.len() - 1];
					if line.trim_ascii().is_empty() {
						continue;
					}
					match serde_json::from_slice::<serde_json::Value>(line) {
						Ok(value) => {
							seq += 1;
							if token_tx
								.send(StreamToken::data(session_id.clone(), seq, value))
								.await
								.is_err()
							{
								return;
							}
						},
						Err(e) => debug!(error = %e, "malformed ndjson upstream line"),
					}
				}
			}
			seq += 1;
			let _ = token_tx.send(StreamToken::end(session_id.clone(), seq)).await;
		}
	});

	Ok(UpstreamHandle::new(TransportKind::Ndjson, to_upstream_tx, token_rx))
}
