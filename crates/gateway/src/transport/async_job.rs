//! Async job delivery: the client gets a job id back immediately (202)
//! and polls a status endpoint until the upstream call completes. Used
//! by the policy engine for slow upstreams behind clients that can't
//! hold a streaming connection open.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::token::TokenKind;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(clippy::large_enum_variant)]
pub enum JobState {
	Pending,
	Done { result: serde_json::Value },
	Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl std::fmt::Display for JobId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// In-memory job table. Jobs are not persisted across restarts; a client
/// that loses its job id after a gateway restart must retry the original
/// request, since async jobs are tracked on a best-effort basis only.
#[derive(Default, Clone)]
pub struct JobStore {
	jobs: Arc<RwLock<indexmap::IndexMap<JobId, JobState>>>,
}

impl JobStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a job and spawns a task that drains `from_upstream` into
	/// a single terminal `JobState`, then leaves it in the table for
	/// `retention` before evicting it.
	pub fn submit(&self, mut from_upstream: mpsc::Receiver<crate::token::StreamToken>, retention: Duration) -> JobId {
		let id = JobId::new();
		self.jobs.write().insert(id, JobState::Pending);
		let jobs = self.jobs.clone();
		tokio::spawn(async move {
			let mut last_payload = serde_json::Value::Null;
			let terminal = loop {
				match from_upstream.recv().await {
					Some(token) => match token.kind {
						TokenKind::Data => {
							if let Some(payload) = token.payload {
								last_payload = payload;
							}
						},
						TokenKind::End => break JobState::Done { result: last_payload },
						TokenKind::Error => {
							break JobState::Failed {
								reason: token.reason.unwrap_or_else(|| "upstream error".into()),
							};
						},
						TokenKind::Start
						| TokenKind::Metadata
						| TokenKind::Keepalive
						| TokenKind::FallbackTriggered => {},
					},
					None => break JobState::Done { result: last_payload },
				}
			};
			jobs.write().insert(id, terminal);
			tokio::time::sleep(retention).await;
			jobs.write().shift_remove(&id);
		});
		id
	}

	pub fn status(&self, id: &JobId) -> Option<JobState> {
		self.jobs.read().get(id).cloned()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn submit_resolves_to_done_on_end_token() {
		let store = JobStore::new();
		let (tx, rx) = mpsc::channel(4);
		let id = store.submit(rx, Duration::from_millis(50));
		let sid = crate::session::SessionId::new();
		tx
			.send(crate::token::StreamToken::data(
				sid.clone(),
				0,
				serde_json::json!({"ok": true}),
			))
			.await
			.unwrap();
		tx.send(crate::token::StreamToken::end(sid, 1)).await.unwrap();
		drop(tx);

		tokio::time::sleep(Duration::from_millis(20)).await;
		match store.status(&id).unwrap() {
			JobState::Done { result } => assert_eq!(result, serde_json::json!({"ok": true})),
			other => panic!("unexpected state: {other:?}"),
		}
	}

	#[tokio::test]
	async fn job_is_evicted_after_retention() {
		let store = JobStore::new();
		let (tx, rx) = mpsc::channel(4);
		let id = store.submit(rx, Duration::from_millis(10));
		drop(tx);
		tokio::time::sleep(Duration::from_millis(60)).await;
		assert!(store.status(&id).is_none());
	}
}
