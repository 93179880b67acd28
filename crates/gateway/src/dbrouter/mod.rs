//! Read/write datasource router. Routing intent is carried through a
//! `tokio::task_local!`, scoped for the duration of a future so a
//! handler never has to thread an explicit read/write flag through every
//! call. Transactions roll back automatically on drop if never
//! committed, so a panicking handler can't leave one dangling.

use std::sync::Arc;

use sqlx::PgPool;
use sqlx::Transaction;
use sqlx::postgres::Postgres;
use tracing::instrument;

use crate::error::RouterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteIntent {
	Read,
	Write,
}

tokio::task_local! {
	static ROUTE_INTENT: RouteIntent;
}

/// Sets the task-local routing intent for the duration of `fut`.
/// `LocalKey::scope` restores the previous value when `fut` completes —
/// including on panic, since the restore runs via its own drop guard
/// internally — so a handler that panics mid-transaction can never leak
/// routing intent onto whatever task the runtime schedules next on this
/// worker thread.
pub struct RouteGuard;

impl RouteGuard {
	pub async fn scoped<F, T>(intent: RouteIntent, fut: F) -> T
	where
		F: std::future::Future<Output = T>,
	{
		ROUTE_INTENT.scope(intent, fut).await
	}
}

fn current_intent() -> RouteIntent {
	ROUTE_INTENT.try_with(|i| *i).unwrap_or(RouteIntent::Write)
}

/// Holds both pools and the gate deciding which one a call should use.
pub struct DatasourceRouter {
	master: PgPool,
	replica: Option<PgPool>,
}

impl DatasourceRouter {
	pub fn new(master: PgPool, replica: Option<PgPool>) -> Self {
		Self { master, replica }
	}

	/// The pool for the current task-local routing intent. Falls back to
	/// the master if no replica is configured — a replica is an
	/// optimization, not a correctness requirement.
	pub fn pool(&self) -> &PgPool {
		match (current_intent(), &self.replica) {
			(RouteIntent::Read, Some(replica)) => replica,
			_ => &self.master,
		}
	}

	/// Always uses the master; writes never route to a replica regardless
	/// of task-local intent, since replicas in this design are read-only.
	#[instrument(skip(self))]
	pub async fn begin_write(&self) -> Result<Transaction<'_, Postgres>, RouterError> {
		self.master.begin().await.map_err(RouterError::from)
	}

	pub fn master(&self) -> &PgPool {
		&self.master
	}

	pub fn replica(&self) -> Option<&PgPool> {
		self.replica.as_ref()
	}
}

pub type SharedRouter = Arc<DatasourceRouter>;
