//! WebSocket upstream connector. Owns a raw `TcpStream`, performs the
//! HTTP upgrade handshake itself, and feeds every inbound byte through
//! `WebsocketFrameDecoder` to recover text frames, since this side
//! originates the connection rather than receiving one already
//! upgraded by a framework.

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use websocket_sans_io::{FrameInfo, Opcode, WebsocketFrameDecoder, WebsocketFrameEvent};

use crate::error::UpstreamError;
use crate::session::SessionId;
use crate::token::StreamToken;
use crate::transport::TransportKind;
use crate::upstream::{UpstreamHandle, UpstreamTarget};

pub async fn connect(
	target: &UpstreamTarget,
	session_id: SessionId,
) -> Result<UpstreamHandle, UpstreamError> {
	let (host, path) = split_ws_address(&target.address);
	let mut stream = TcpStream::connect(&host)
		.await
		.map_err(|e| UpstreamError::Connect(e.to_string()))?;
	perform_handshake(&mut stream, &host, &path).await?;

	let (read_half, mut write_half) = stream.into_split();
	let (to_upstream_tx, mut to_upstream_rx) = mpsc::channel::<serde_json::Value>(64);
	let (token_tx, token_rx) = mpsc::channel::<StreamToken>(256);

	let send_session = session_id.clone();
	tokio::spawn(async move {
		while let Some(message) = to_upstream_rx.recv().await {
			let text = message.to_string();
			let frame = encode_text_frame(text.as_bytes());
			if let Err(e) = write_half.write_all(&frame).await {
				warn!(session_id = %send_session, error = %e, "websocket upstream write failed");
				break;
			}
		}
	});

	tokio::spawn(read_loop(read_half, token_tx, session_id));

	Ok(UpstreamHandle::new(
		TransportKind::WebSocket,
		to_upstream_tx,
		token_rx,
	))
}

async fn read_loop(
	mut read_half: tokio::net::tcp::OwnedReadHalf,
	token_tx: mpsc::Sender<StreamToken>,
	session_id: SessionId,
) {
	let mut decoder = WebsocketFrameDecoder::new();
	let mut net_buf = [0u8; 8192];
	let mut text_buf: Vec<u8> = Vec::new();
	let mut seq = 0u64;

	if token_tx
		.send(StreamToken::start(session_id.clone()))
		.await
		.is_err()
	{
		return;
	}

	loop {
		let n = match read_half.read(&mut net_buf).await {
			Ok(0) | Err(_) => break,
			Ok(n) => n,
		};
		let mut unprocessed = net_buf[..n].to_vec();
		loop {
			let Ok(ret) = decoder.add_data(&mut unprocessed) else {
				debug!("websocket upstream frame decode error");
				return;
			};
			let consumed = ret.consumed_bytes;
			match ret.event {
				Some(WebsocketFrameEvent::PayloadChunk {
					original_opcode: Opcode::Text,
				}) => {
					text_buf.extend_from_slice(&unprocessed[..consumed]);
				},
				Some(WebsocketFrameEvent::End {
					frame_info: FrameInfo { fin: true, .. },
					original_opcode: Opcode::Text,
				}) => {
					if let Ok(text) = std::str::from_utf8(&text_buf) {
						if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
							seq += 1;
							if token_tx
								.send(StreamToken::data(session_id.clone(), seq, value))
								.await
								.is_err()
							{
								return;
							}
						}
					}
					text_buf.clear();
				},
				Some(WebsocketFrameEvent::End {
					original_opcode: Opcode::ConnectionClose,
					..
				}) => {
					seq += 1;
					let _ = token_tx.send(StreamToken::end(session_id.clone(), seq)).await;
					return;
				},
				_ => {},
			}
			if consumed == 0 {
				break;
			}
			unprocessed.drain(..consumed);
			if unprocessed.is_empty() {
				break;
			}
		}
	}
	seq += 1;
	let _ = token_tx.send(StreamToken::end(session_id, seq)).await;
}

fn split_ws_address(address: &str) -> (String, String) {
	let stripped = address
		.trim_start_matches("ws://")
		.trim_start_matches("wss://");
	match stripped.split_once('/') {
		Some((host, path)) => (host.to_string(), format!("/{path}")),
		None => (stripped.to_string(), "/".to_string()),
	}
}

async fn perform_handshake(
	stream: &mut TcpStream,
	host: &str,
	path: &str,
) -> Result<(), UpstreamError> {
	let key = base64_key();
	let request = format!(
		"GET {path} HTTP/1.1\r\nHost: {host}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n\r\n"
	);
	stream
		.write_all(request.as_bytes())
		.await
		.map_err(|e| UpstreamError::Connect(e.to_string()))?;

	let mut buf = [0u8; 1024];
	let n = stream
		.read(&mut buf)
		.await
		.map_err(|e| UpstreamError::Connect(e.to_string()))?;
	let response = String::from_utf8_lossy(&buf[..n]);
	if !response.starts_with("HTTP/1.1 101") {
		return Err(UpstreamError::Connect(format!(
			"upstream rejected websocket upgrade: {}",
			response.lines().next().unwrap_or_default()
		)));
	}
	Ok(())
}

fn base64_key() -> String {
	let mut raw = [0u8; 16];
	rand::rng().fill_bytes(&mut raw);
	base64_encode(&raw)
}

/// Minimal base64 encoder; the only thing we need it for is the
/// `Sec-WebSocket-Key` handshake header.
fn base64_encode(bytes: &[u8]) -> String {
	const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
	let mut out = String::with_capacity((bytes.len() + 2) / 3 * 4);
	for chunk in bytes.chunks(3) {
		let b = [
			chunk[0],
			*chunk.get(1).unwrap_or(&0),
			*chunk.get(2).unwrap_or(&0),
		];
		out.push(ALPHABET[(b[0] >> 2) as usize] as char);
		out.push(ALPHABET[(((b[0] & 0x03) << 4) | (b[1] >> 4)) as usize] as char);
		out.push(if chunk.len() > 1 {
			ALPHABET[(((b[1] & 0x0f) << 2) | (b[2] >> 6)) as usize] as char
		} else {
			'='
		});
		out.push(if chunk.len() > 2 {
			ALPHABET[(b[2] & 0x3f) as usize] as char
		} else {
			'='
		});
	}
	out
}

fn encode_text_frame(payload: &[u8]) -> Vec<u8> {
	let mut frame = Vec::with_capacity(payload.len() + 14);
	frame.push(0x81); // FIN + text opcode
	let masked_len_byte = 0x80; // client-to-server frames must be masked
	if payload.len() < 126 {
		frame.push(masked_len_byte | payload.len() as u8);
	} else if payload.len() <= u16::MAX as usize {
		frame.push(masked_len_byte | 126);
		frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
	} else {
		frame.push(masked_len_byte | 127);
		frame.extend_from_slice(&(payload.len() as u64).to_be_bytes());
	}
	let mut mask = [0u8; 4];
	rand::rng().fill_bytes(&mut mask);
	frame.extend_from_slice(&mask);
	for (i, byte) in payload.iter().enumerate() {
		frame.push(byte ^ mask[i % 4]);
	}
	frame
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn split_address_extracts_host_and_path() {
		assert_eq!(
			split_ws_address("ws://upstream.local:9000/mcp"),
			("upstream.local:9000".to_string(), "/mcp".to_string())
		);
		assert_eq!(
			split_ws_address("upstream.local:9000"),
			("upstream.local:9000".to_string(), "/".to_string())
		);
	}

	#[test]
	fn base64_encode_matches_known_vector() {
		assert_eq!(base64_encode(b"any string"), "YW55IHN0cmluZw==");
	}

	#[test]
	fn encode_text_frame_sets_fin_and_text_opcode() {
		let frame = encode_text_frame(b"hi");
		assert_eq!(frame[0], 0x81);
		assert_eq!(frame[1] & 0x80, 0x80, "client frames must be masked");
	}
}
