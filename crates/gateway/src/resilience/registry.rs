//! Owns one [`CircuitBreaker`] per upstream id, created lazily on first
//! use, and composes breaker + retry + timeout + fallback into a single
//! call. Uses a `parking_lot::RwLock<HashMap<...>>` for the
//! insert-if-absent map rather than an external concurrent-map crate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::error::{ResilienceError, UpstreamError};
use crate::resilience::circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
use crate::resilience::retry::RetryConfig;
use crate::resilience::{retry, time_limiter};
use crate::upstream::UpstreamId;

pub struct ResilienceRegistry {
	breakers: RwLock<HashMap<UpstreamId, Arc<CircuitBreaker>>>,
	breaker_config: CircuitBreakerConfig,
	retry_config: RetryConfig,
	call_timeout: Duration,
}

impl ResilienceRegistry {
	pub fn new(
		breaker_config: CircuitBreakerConfig,
		retry_config: RetryConfig,
		call_timeout: Duration,
	) -> Self {
		Self {
			breakers: RwLock::new(HashMap::new()),
			breaker_config,
			retry_config,
			call_timeout,
		}
	}

	fn breaker_for(&self, upstream: &UpstreamId) -> Arc<CircuitBreaker> {
		if let Some(existing) = self.breakers.read().get(upstream) {
			return existing.clone();
		}
		let mut write = self.breakers.write();
		write
			.entry(upstream.clone())
			.or_insert_with(|| Arc::new(CircuitBreaker::new(upstream.0.clone(), self.breaker_config)))
			.clone()
	}

	/// Current breaker state for an upstream, or `None` if no call has
	/// ever gone through it (and thus no breaker exists yet).
	pub fn get_state(&self, upstream: &UpstreamId) -> Option<BreakerState> {
		self.breakers.read().get(upstream).map(|b| b.state())
	}

	/// Resets an upstream's breaker to a fresh CLOSED state, discarding
	/// its call history. A no-op if the breaker doesn't exist yet.
	pub fn reset(&self, upstream: &UpstreamId) {
		if let Some(breaker) = self.breakers.read().get(upstream) {
			breaker.reset();
		}
	}

	/// Forces an upstream's breaker open, creating it first if needed.
	pub fn force_open(&self, upstream: &UpstreamId) {
		self.breaker_for(upstream).force_open();
	}

	/// Forces an upstream's breaker closed, creating it first if needed.
	pub fn force_closed(&self, upstream: &UpstreamId) {
		self.breaker_for(upstream).force_closed();
	}

	/// Runs `op` with the full protection stack: circuit breaker gate,
	/// bounded retry with backoff, and a per-attempt timeout. On final
	/// failure, falls back to `on_failure` instead of propagating the
	/// error, so the caller decides what a caller-visible failure looks
	/// like rather than leaking the raw upstream error.
	pub async fn execute_with_full_protection<T, Fut>(
		&self,
		upstream: &UpstreamId,
		mut op: impl FnMut() -> Fut,
		on_failure: impl FnOnce(ResilienceError) -> T,
	) -> T
	where
		Fut: std::future::Future<Output = Result<T, UpstreamError>>,
	{
		let breaker = self.breaker_for(upstream);
		if !breaker.call_permitted() {
			return on_failure(ResilienceError::CircuitOpen(upstream.0.clone()));
		}

		let timeout = self.call_timeout;
		let retry_config = self.retry_config;
		let started = Instant::now();
		let result = retry::retry(&retry_config, || {
			let timeout = timeout;
			let fut = op();
			async move {
				time_limiter::with_timeout(timeout, fut)
					.await
					.map_err(|_| UpstreamError::Timeout(timeout))
					.and_then(|inner| inner)
			}
		})
		.await;
		let elapsed = started.elapsed();

		match result {
			Ok(value) => {
				breaker.record_success(elapsed);
				value
			},
			Err(e) => {
				breaker.record_failure(elapsed);
				on_failure(ResilienceError::RetriesExhausted(
					retry_config.max_attempts,
					Box::new(e),
				))
			},
		}
	}
}
