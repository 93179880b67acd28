//! Per-transport delivery adapters. Each adapter turns a stream of
//! [`crate::token::StreamToken`]s into wire bytes for one delivery mode
//! and turns inbound client bytes into gateway-internal JSON-RPC
//! messages. The policy engine ([`crate::policy`]) picks the mode; the
//! adapter only knows how to speak it.

pub mod async_job;
pub mod ndjson;
pub mod sse;
pub mod stdio;
pub mod sync;
pub mod websocket;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportKind {
	Sse,
	WebSocket,
	Ndjson,
	Stdio,
	AsyncJob,
	Sync,
}

impl TransportKind {
	/// Whether this transport keeps a long-lived connection open for
	/// server push, as opposed to request/response or polling.
	pub fn is_streaming(self) -> bool {
		matches!(self, Self::Sse | Self::WebSocket | Self::Ndjson | Self::Stdio)
	}
}

pub use crate::error::TransportError;
