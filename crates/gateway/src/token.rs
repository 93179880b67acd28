//! Wire-agnostic representation of one unit of streamed output. Transport
//! adapters translate [`StreamToken`] to and from SSE events, WebSocket
//! frames, NDJSON lines, etc.; nothing above the transport layer ever
//! touches a transport-specific type.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenKind {
	/// First token of every stream; carries no payload. Transport
	/// adapters that count first-byte-sent against the TTFB budget treat
	/// this as the byte that stops the timer.
	Start,
	/// A JSON-RPC response or notification payload.
	Data,
	/// Out-of-band metadata attached to the stream (e.g. upstream
	/// diagnostics) that isn't itself response text.
	Metadata,
	/// Heartbeat emitted while no data is pending, to keep the transport alive.
	Keepalive,
	/// The stream policy switched delivery modes mid-flight.
	FallbackTriggered,
	/// Upstream or gateway is closing the stream normally.
	End,
	/// Upstream or gateway is closing the stream due to an error.
	Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamToken {
	pub kind: TokenKind,
	/// Monotonically increasing per-session sequence number, used for
	/// SSE `Last-Event-ID` resume and for detecting gaps.
	pub seq: u64,
	pub session_id: SessionId,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub payload: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
}

impl StreamToken {
	pub fn start(session_id: SessionId) -> Self {
		Self {
			kind: TokenKind::Start,
			seq: 0,
			session_id,
			payload: None,
			reason: None,
		}
	}

	pub fn data(session_id: SessionId, seq: u64, payload: Value) -> Self {
		Self {
			kind: TokenKind::Data,
			seq,
			session_id,
			payload: Some(payload),
			reason: None,
		}
	}

	pub fn metadata(session_id: SessionId, seq: u64, payload: Value) -> Self {
		Self {
			kind: TokenKind::Metadata,
			seq,
			session_id,
			payload: Some(payload),
			reason: None,
		}
	}

	pub fn keepalive(session_id: SessionId, seq: u64) -> Self {
		Self {
			kind: TokenKind::Keepalive,
			seq,
			session_id,
			payload: None,
			reason: None,
		}
	}

	pub fn end(session_id: SessionId, seq: u64) -> Self {
		Self {
			kind: TokenKind::End,
			seq,
			session_id,
			payload: None,
			reason: None,
		}
	}

	pub fn error(session_id: SessionId, seq: u64, reason: impl Into<String>) -> Self {
		Self {
			kind: TokenKind::Error,
			seq,
			session_id,
			payload: None,
			reason: Some(reason.into()),
		}
	}
}

/// Bounded ring buffer of tokens pending delivery to a slow or
/// momentarily-disconnected client. Enforces the backpressure limit from
/// the session's delivery policy: once full, [`StreamBuffer::push`]
/// returns `false` and the caller (the transport adapter) must fall back
/// per the stream policy engine rather than grow unbounded.
#[derive(Debug)]
pub struct StreamBuffer {
	capacity: usize,
	tokens: VecDeque<StreamToken>,
}

impl StreamBuffer {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity,
			tokens: VecDeque::with_capacity(capacity.min(256)),
		}
	}

	/// Returns `false` without pushing if the buffer is already at
	/// capacity; the caller decides what that means (drop, fallback, error).
	#[must_use]
	pub fn push(&mut self, token: StreamToken) -> bool {
		if self.tokens.len() >= self.capacity {
			return false;
		}
		self.tokens.push_back(token);
		true
	}

	pub fn pop(&mut self) -> Option<StreamToken> {
		self.tokens.pop_front()
	}

	pub fn len(&self) -> usize {
		self.tokens.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tokens.is_empty()
	}

	pub fn is_full(&self) -> bool {
		self.tokens.len() >= self.capacity
	}

	/// Drain tokens with `seq` strictly greater than `last_seen`, for SSE
	/// resume via `Last-Event-ID`.
	pub fn drain_after(&mut self, last_seen: u64) -> Vec<StreamToken> {
		self
			.tokens
			.iter()
			.filter(|t| t.seq > last_seen)
			.cloned()
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sid() -> SessionId {
		SessionId::new()
	}

	#[test]
	fn push_respects_capacity() {
		let mut buf = StreamBuffer::new(2);
		let id = sid();
		assert!(buf.push(StreamToken::keepalive(id.clone(), 1)));
		assert!(buf.push(StreamToken::keepalive(id.clone(), 2)));
		assert!(!buf.push(StreamToken::keepalive(id, 3)));
		assert!(buf.is_full());
	}

	#[test]
	fn drain_after_returns_only_newer_tokens() {
		let mut buf = StreamBuffer::new(8);
		let id = sid();
		for seq in 1..=5 {
			assert!(buf.push(StreamToken::data(id.clone(), seq, Value::Null)));
		}
		let newer = buf.drain_after(3);
		assert_eq!(newer.len(), 2);
		assert_eq!(newer[0].seq, 4);
		assert_eq!(newer[1].seq, 5);
	}

	#[test]
	fn pop_is_fifo() {
		let mut buf = StreamBuffer::new(4);
		let id = sid();
		buf.push(StreamToken::data(id.clone(), 1, Value::Null));
		buf.push(StreamToken::data(id, 2, Value::Null));
		assert_eq!(buf.pop().unwrap().seq, 1);
		assert_eq!(buf.pop().unwrap().seq, 2);
		assert!(buf.pop().is_none());
	}
}
