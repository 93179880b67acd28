//! Session lifecycle: creation, lookup, idle-expiry sweeping and
//! drop-triggered upstream cleanup. One session wraps exactly one
//! upstream handle regardless of which transport delivers to the
//! client.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::error::SessionError;
use crate::token::StreamBuffer;
use crate::transport::TransportKind;
use crate::upstream::UpstreamHandle;

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
	pub fn new() -> Self {
		Self(Uuid::new_v4().to_string())
	}
}

impl Default for SessionId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&str> for SessionId {
	fn from(s: &str) -> Self {
		Self(s.to_string())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
	/// Upstream connect is still in flight; not yet safe to accept a
	/// client subscription.
	Initializing,
	Active,
	Draining,
	/// Torn down by the client or an explicit close call.
	Closed,
	/// Torn down by the idle-expiry sweep, distinct from `Closed` so an
	/// operator can tell a clean shutdown from a timeout.
	Expired,
}

impl SessionStatus {
	fn is_terminal(self) -> bool {
		matches!(self, SessionStatus::Closed | SessionStatus::Expired)
	}
}

/// One client-visible conversation with a single upstream. Holds the
/// delivery buffer used for SSE resume / backpressure and the sequence
/// counter that stamps every [`crate::token::StreamToken`] emitted on it.
#[derive(Debug)]
pub struct Session {
	pub id: SessionId,
	pub transport: TransportKind,
	pub upstream: UpstreamHandle,
	pub status: RwLock<SessionStatus>,
	pub buffer: RwLock<StreamBuffer>,
	last_activity: RwLock<Instant>,
}

impl Session {
	pub fn new(transport: TransportKind, upstream: UpstreamHandle, buffer_capacity: usize) -> Self {
		Self::with_id(SessionId::new(), transport, upstream, buffer_capacity)
	}

	/// Builds a session reusing an id already handed to the upstream
	/// connector, so the session's id and the correlation id on its
	/// upstream connection match.
	pub fn with_id(
		id: SessionId,
		transport: TransportKind,
		upstream: UpstreamHandle,
		buffer_capacity: usize,
	) -> Self {
		// By the time a `Session` is constructed, `upstream` already
		// reflects a successfully connected handle — there's no separate
		// handshake step left to wait on here, so INITIALIZING is only
		// held long enough to be immediately promoted.
		let session = Self {
			id,
			transport,
			upstream,
			status: RwLock::new(SessionStatus::Initializing),
			buffer: RwLock::new(StreamBuffer::new(buffer_capacity)),
			last_activity: RwLock::new(Instant::now()),
		};
		*session.status.write() = SessionStatus::Active;
		session
	}

	pub fn touch(&self) {
		*self.last_activity.write() = Instant::now();
	}

	pub fn idle_for(&self) -> Duration {
		self.last_activity.read().elapsed()
	}

	/// Moves the session to `to`. CLOSED and EXPIRED are terminal: once
	/// entered, no further transition is permitted.
	pub fn transition(&self, to: SessionStatus) -> Result<(), SessionError> {
		let mut status = self.status.write();
		if status.is_terminal() {
			return Err(SessionError::AlreadyClosed(self.id.clone()));
		}
		*status = to;
		Ok(())
	}
}

/// Owns every live session and runs the idle-expiry sweep. Sessions are
/// kept in an `indexmap::IndexMap` so the admin surface can list them in
/// creation order, matching the order sessions were inserted.
pub struct SessionManager {
	sessions: RwLock<indexmap::IndexMap<SessionId, Arc<Session>>>,
	expiration: Duration,
}

impl SessionManager {
	pub fn new(expiration: Duration) -> Arc<Self> {
		Arc::new(Self {
			sessions: RwLock::new(indexmap::IndexMap::new()),
			expiration,
		})
	}

	#[instrument(skip(self, session), fields(session_id = %session.id))]
	pub fn insert(&self, session: Session) -> Arc<Session> {
		let session = Arc::new(session);
		self
			.sessions
			.write()
			.insert(session.id.clone(), session.clone());
		session
	}

	pub fn get(&self, id: &SessionId) -> Result<Arc<Session>, SessionError> {
		self
			.sessions
			.read()
			.get(id)
			.cloned()
			.ok_or_else(|| SessionError::Unknown(id.clone()))
	}

	#[instrument(skip(self))]
	pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
		self.sessions.write().shift_remove(id)
	}

	pub fn len(&self) -> usize {
		self.sessions.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.read().is_empty()
	}

	/// Background loop: every `interval`, remove and close sessions idle
	/// longer than `expiration`. Runs for the lifetime of the gateway;
	/// intended to be spawned once from [`crate::run`].
	pub async fn run_sweeper(self: Arc<Self>, interval: Duration, events: Arc<crate::telemetry::EventBus>) {
		let mut ticker = tokio::time::interval(interval);
		loop {
			ticker.tick().await;
			let expired: Vec<SessionId> = self
				.sessions
				.read()
				.values()
				.filter(|s| s.idle_for() >= self.expiration)
				.map(|s| s.id.clone())
				.collect();
			for id in expired {
				if let Some(session) = self.remove(&id) {
					let _ = session.transition(SessionStatus::Expired);
					warn!(session_id = %id, "session expired after {:?} idle", self.expiration);
					events.emit(crate::telemetry::StreamEvent::SessionExpired {
						session_id: id.clone(),
					});
					session.upstream.close().await;
				}
			}
		}
	}
}

/// RAII guard returned alongside a session's client-facing stream; when
/// the client disconnects and the response body is dropped, this removes
/// the session and spawns a task to close the upstream connector,
/// closing the upstream connection without blocking the drop itself.
#[derive(Clone)]
pub struct SessionDropper {
	manager: Arc<SessionManager>,
	id: SessionId,
}

impl SessionDropper {
	pub fn new(manager: Arc<SessionManager>, id: SessionId) -> Self {
		Self { manager, id }
	}
}

impl Drop for SessionDropper {
	fn drop(&mut self) {
		if let Some(session) = self.manager.remove(&self.id) {
			tokio::spawn(async move {
				session.upstream.close().await;
			});
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::upstream::UpstreamHandle;

	#[tokio::test]
	async fn insert_then_get_round_trips() {
		let mgr = SessionManager::new(Duration::from_secs(60));
		let session = Session::new(TransportKind::Sse, UpstreamHandle::noop(), 16);
		let id = session.id.clone();
		mgr.insert(session);
		assert!(mgr.get(&id).is_ok());
		assert_eq!(mgr.len(), 1);
	}

	#[tokio::test]
	async fn unknown_session_errors() {
		let mgr = SessionManager::new(Duration::from_secs(60));
		let err = mgr.get(&SessionId::from("nope")).unwrap_err();
		assert!(matches!(err, SessionError::Unknown(_)));
	}

	#[tokio::test]
	async fn sweeper_evicts_idle_sessions() {
		let mgr = SessionManager::new(Duration::from_millis(20));
		let session = Session::new(TransportKind::Sse, UpstreamHandle::noop(), 16);
		let id = session.id.clone();
		mgr.insert(session);

		let events = Arc::new(crate::telemetry::EventBus::new(vec![], vec![]));
		let sweep_mgr = mgr.clone();
		let handle = tokio::spawn(sweep_mgr.run_sweeper(Duration::from_millis(5), events));
		tokio::time::sleep(Duration::from_millis(80)).await;
		handle.abort();

		assert!(mgr.get(&id).is_err());
	}

	#[tokio::test]
	async fn new_session_starts_active() {
		let session = Session::new(TransportKind::Sse, UpstreamHandle::noop(), 16);
		assert_eq!(*session.status.read(), SessionStatus::Active);
	}

	#[tokio::test]
	async fn transition_out_of_closed_is_rejected() {
		let session = Session::new(TransportKind::Sse, UpstreamHandle::noop(), 16);
		session.transition(SessionStatus::Closed).unwrap();
		let err = session.transition(SessionStatus::Active).unwrap_err();
		assert!(matches!(err, SessionError::AlreadyClosed(_)));
	}

	#[tokio::test]
	async fn transition_out_of_expired_is_rejected() {
		let session = Session::new(TransportKind::Sse, UpstreamHandle::noop(), 16);
		session.transition(SessionStatus::Expired).unwrap();
		let err = session.transition(SessionStatus::Draining).unwrap_err();
		assert!(matches!(err, SessionError::AlreadyClosed(_)));
	}
}
