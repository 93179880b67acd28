//! Upstream connectors: one real connection to one MCP server, behind a
//! transport-agnostic handle. Dispatches per-transport methods from a
//! single enum rather than a trait object, since the set of transports
//! is closed and small, exactly the case enum dispatch suits.

pub mod ndjson;
pub mod sse;
pub mod stdio;
pub mod websocket;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc};

use crate::error::UpstreamError;
use crate::session::SessionId;
use crate::token::StreamToken;
use crate::transport::TransportKind;

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct UpstreamId(pub String);

impl std::fmt::Display for UpstreamId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Static description of one configured upstream target, resolved from
/// `mcp.upstreams.*` in config.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamTarget {
	pub id: UpstreamId,
	pub kind: TransportKind,
	pub address: String,
}

/// Transport-agnostic connection to one upstream, held by a [`crate::session::Session`].
/// The receiver half can only be taken once — whichever transport adapter
/// is driving the session's delivery takes it and owns it for the
/// session's lifetime.
#[derive(Debug)]
pub struct UpstreamHandle {
	pub kind: TransportKind,
	to_upstream: mpsc::Sender<Value>,
	from_upstream: Arc<Mutex<Option<mpsc::Receiver<StreamToken>>>>,
	closed: Arc<AtomicBool>,
}

impl UpstreamHandle {
	pub fn new(
		kind: TransportKind,
		to_upstream: mpsc::Sender<Value>,
		from_upstream: mpsc::Receiver<StreamToken>,
	) -> Self {
		Self {
			kind,
			to_upstream,
			from_upstream: Arc::new(Mutex::new(Some(from_upstream))),
			closed: Arc::new(AtomicBool::new(false)),
		}
	}

	/// A handle connected to nothing, for session-lifecycle tests that
	/// never actually exchange messages.
	pub fn noop() -> Self {
		let (tx, _rx) = mpsc::channel(1);
		let (_tok_tx, tok_rx) = mpsc::channel(1);
		Self::new(TransportKind::Sync, tx, tok_rx)
	}

	pub async fn send(&self, message: Value) -> Result<(), UpstreamError> {
		if self.closed.load(Ordering::Acquire) {
			return Err(UpstreamError::Closed);
		}
		self
			.to_upstream
			.send(message)
			.await
			.map_err(|e| UpstreamError::Send(e.to_string()))
	}

	/// Takes ownership of the token receiver. Returns `None` if it was
	/// already taken (a session's stream can only be consumed once).
	pub async fn take_receiver(&self) -> Option<mpsc::Receiver<StreamToken>> {
		self.from_upstream.lock().await.take()
	}

	pub async fn close(&self) {
		self.closed.store(true, Ordering::Release);
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}
}

/// Registry of configured upstream targets, keyed by the id a client
/// names when creating a session. Populated once from config at
/// startup; reads (one per session creation) vastly outnumber
/// registrations, so lookups swap in a fresh immutable map rather than
/// taking a lock.
pub struct UpstreamRegistry {
	targets: ArcSwap<HashMap<UpstreamId, UpstreamTarget>>,
}

impl Default for UpstreamRegistry {
	fn default() -> Self {
		Self {
			targets: ArcSwap::from_pointee(HashMap::new()),
		}
	}
}

impl UpstreamRegistry {
	pub fn new(targets: Vec<UpstreamTarget>) -> Self {
		let map = targets.into_iter().map(|t| (t.id.clone(), t)).collect();
		Self {
			targets: ArcSwap::from_pointee(map),
		}
	}

	pub fn get(&self, id: &UpstreamId) -> Option<UpstreamTarget> {
		self.targets.load().get(id).cloned()
	}

	pub fn insert(&self, target: UpstreamTarget) {
		let mut map = (**self.targets.load()).clone();
		map.insert(target.id.clone(), target);
		self.targets.store(Arc::new(map));
	}
}

#[cfg(test)]
mod registry_tests {
	use super::*;

	#[test]
	fn insert_then_get_round_trips() {
		let registry = UpstreamRegistry::default();
		let target = UpstreamTarget {
			id: UpstreamId("weather".to_string()),
			kind: TransportKind::Sse,
			address: "http://localhost:9000".to_string(),
		};
		registry.insert(target.clone());
		assert_eq!(registry.get(&target.id), Some(target));
	}

	#[test]
	fn unknown_id_returns_none() {
		let registry = UpstreamRegistry::default();
		assert_eq!(registry.get(&UpstreamId("nope".to_string())), None);
	}
}

/// Connects to `target` over whichever transport it names.
pub async fn connect(
	client: reqwest::Client,
	target: &UpstreamTarget,
	session_id: SessionId,
) -> Result<UpstreamHandle, UpstreamError> {
	match target.kind {
		TransportKind::Sse | TransportKind::Sync => sse::connect(client, target, session_id).await,
		TransportKind::Ndjson | TransportKind::AsyncJob => {
			ndjson::connect(client, target, session_id).await
		},
		TransportKind::WebSocket => websocket::connect(target, session_id).await,
		TransportKind::Stdio => stdio::connect(target, session_id).await,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn receiver_can_only_be_taken_once() {
		let (tx, _rx) = mpsc::channel(1);
		let (_tok_tx, tok_rx) = mpsc::channel(1);
		let handle = UpstreamHandle::new(TransportKind::Sse, tx, tok_rx);
		assert!(handle.take_receiver().await.is_some());
		assert!(handle.take_receiver().await.is_none());
	}

	#[tokio::test]
	async fn send_after_close_errors() {
		let handle = UpstreamHandle::noop();
		handle.close().await;
		let err = handle.send(Value::Null).await.unwrap_err();
		assert!(matches!(err, UpstreamError::Closed));
	}
}
