//! Per-call timeout, wrapping `tokio::time::timeout` with the error type
//! the rest of the resilience layer expects.

use std::time::Duration;

use crate::error::ResilienceError;

pub async fn with_timeout<T, Fut>(duration: Duration, fut: Fut) -> Result<T, ResilienceError>
where
	Fut: std::future::Future<Output = T>,
{
	tokio::time::timeout(duration, fut)
		.await
		.map_err(|_| ResilienceError::TimedOut(duration))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn completes_before_deadline() {
		let result = with_timeout(Duration::from_millis(50), async { 42 }).await;
		assert_eq!(result.unwrap(), 42);
	}

	#[tokio::test]
	async fn times_out_when_future_is_slow() {
		let result = with_timeout(Duration::from_millis(5), async {
			tokio::time::sleep(Duration::from_millis(50)).await;
			42
		})
		.await;
		assert!(matches!(result, Err(ResilienceError::TimedOut(_))));
	}
}
