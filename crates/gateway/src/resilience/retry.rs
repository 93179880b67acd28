//! Retry policy: bounded attempts with exponential backoff and jitter,
//! composable with the circuit breaker and time limiter in
//! [`super::registry`].

use std::time::Duration;

use rand::RngExt;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_millis(100),
			max_delay: Duration::from_secs(5),
		}
	}
}

impl RetryConfig {
	/// Delay before attempt number `attempt` (1-indexed, `attempt == 1`
	/// meaning the first retry after the initial call), exponential with
	/// full jitter.
	pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
		let exp = self.base_delay.as_millis().saturating_mul(1u128 << attempt.min(16));
		let capped = exp.min(self.max_delay.as_millis());
		let jittered = rand::rng().random_range(0..=capped.max(1));
		Duration::from_millis(jittered as u64)
	}
}

/// Runs `op` up to `config.max_attempts` times, sleeping
/// `delay_for_attempt` between tries. Returns the last error if every
/// attempt fails. `op` is re-invoked from scratch on every attempt — it
/// must be idempotent, which the session/transport layer guarantees by
/// only retrying requests that haven't produced a partial response yet.
pub async fn retry<T, E, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = Result<T, E>>,
{
	let mut attempt = 0;
	loop {
		match op().await {
			Ok(value) => return Ok(value),
			Err(e) => {
				attempt += 1;
				if attempt >= config.max_attempts {
					return Err(e);
				}
				tokio::time::sleep(config.delay_for_attempt(attempt)).await;
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};

	use super::*;

	#[tokio::test]
	async fn retries_until_success() {
		let calls = AtomicU32::new(0);
		let config = RetryConfig {
			max_attempts: 5,
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(2),
		};
		let result: Result<u32, &str> = retry(&config, || {
			let n = calls.fetch_add(1, Ordering::SeqCst);
			async move {
				if n < 2 {
					Err("not yet")
				} else {
					Ok(n)
				}
			}
		})
		.await;
		assert_eq!(result, Ok(2));
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn gives_up_after_max_attempts() {
		let calls = AtomicU32::new(0);
		let config = RetryConfig {
			max_attempts: 2,
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(2),
		};
		let result: Result<u32, &str> = retry(&config, || {
			calls.fetch_add(1, Ordering::SeqCst);
			async move { Err("always fails") }
		})
		.await;
		assert_eq!(result, Err("always fails"));
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}
}
