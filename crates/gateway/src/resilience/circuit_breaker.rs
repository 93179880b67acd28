//! Per-upstream circuit breaker: a sliding window of the last N call
//! outcomes gates the CLOSED -> OPEN transition, not a bare consecutive
//! failure count, so one failure in a mostly-healthy window never trips
//! it. Strict phase separation: update the state machine under the
//! lock, then drop the lock before emitting any events or logging, so
//! nothing awaits while a lock is held.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
	/// Number of most recent calls used to compute failure/slow rates.
	pub sliding_window_size: usize,
	/// The window must hold at least this many calls before a rate is
	/// evaluated at all; below the floor the breaker cannot open no
	/// matter how bad the outcomes look.
	pub minimum_number_of_calls: usize,
	/// Percentage (0.0-100.0) of calls in the window that must fail to
	/// open the circuit.
	pub failure_rate_threshold: f64,
	/// Percentage (0.0-100.0) of calls in the window that must be slow
	/// to open the circuit.
	pub slow_call_rate_threshold: f64,
	/// A call slower than this counts toward the slow-call rate.
	pub slow_call_duration_threshold: Duration,
	pub wait_duration_in_open_state: Duration,
	pub permitted_calls_in_half_open: usize,
}

impl Default for CircuitBreakerConfig {
	fn default() -> Self {
		Self {
			sliding_window_size: 10,
			minimum_number_of_calls: 5,
			failure_rate_threshold: 50.0,
			slow_call_rate_threshold: 50.0,
			slow_call_duration_threshold: Duration::from_secs(2),
			wait_duration_in_open_state: Duration::from_secs(10),
			permitted_calls_in_half_open: 3,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
	Closed,
	Open,
	HalfOpen,
}

impl BreakerState {
	pub fn is_closed(&self) -> bool {
		matches!(self, Self::Closed)
	}

	pub fn is_open(&self) -> bool {
		matches!(self, Self::Open)
	}
}

#[derive(Debug, Clone, Copy)]
struct CallOutcome {
	failed: bool,
	slow: bool,
}

enum Phase {
	Closed { window: VecDeque<CallOutcome> },
	Open { opened_at: Instant },
	HalfOpen { probes_permitted: usize, probes_seen: usize, failed: bool },
}

/// One breaker for one upstream id. `call_permitted`/`record_success`/
/// `record_failure` only ever touch the `Mutex<Phase>`; any logging
/// happens after the guard is dropped.
pub struct CircuitBreaker {
	id: String,
	config: CircuitBreakerConfig,
	phase: Mutex<Phase>,
}

impl CircuitBreaker {
	pub fn new(id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
		Self {
			id: id.into(),
			config,
			phase: Mutex::new(Phase::Closed {
				window: VecDeque::with_capacity(config.sliding_window_size),
			}),
		}
	}

	pub fn state(&self) -> BreakerState {
		match *self.phase.lock() {
			Phase::Closed { .. } => BreakerState::Closed,
			Phase::Open { .. } => BreakerState::Open,
			Phase::HalfOpen { .. } => BreakerState::HalfOpen,
		}
	}

	/// Whether a call is currently allowed through. Transitions
	/// `Open -> HalfOpen` on its own once `wait_duration_in_open_state`
	/// has elapsed, so callers don't need a separate timer.
	pub fn call_permitted(&self) -> bool {
		let transitioned_to_half_open;
		let permitted = {
			let mut phase = self.phase.lock();
			match &mut *phase {
				Phase::Closed { .. } => {
					transitioned_to_half_open = false;
					true
				},
				Phase::Open { opened_at } => {
					if opened_at.elapsed() >= self.config.wait_duration_in_open_state {
						*phase = Phase::HalfOpen {
							probes_permitted: self.config.permitted_calls_in_half_open,
							probes_seen: 1,
							failed: false,
						};
						transitioned_to_half_open = true;
						true
					} else {
						transitioned_to_half_open = false;
						false
					}
				},
				Phase::HalfOpen { probes_permitted, probes_seen, .. } => {
					transitioned_to_half_open = false;
					if *probes_seen < *probes_permitted {
						*probes_seen += 1;
						true
					} else {
						false
					}
				},
			}
		};
		if transitioned_to_half_open {
			info!(upstream = %self.id, "circuit breaker probing after wait_duration_in_open_state elapsed");
		}
		permitted
	}

	pub fn record_success(&self, elapsed: Duration) {
		self.record(false, elapsed);
	}

	pub fn record_failure(&self, elapsed: Duration) {
		self.record(true, elapsed);
	}

	fn record(&self, failed: bool, elapsed: Duration) {
		let slow = elapsed >= self.config.slow_call_duration_threshold;
		let outcome = CallOutcome { failed, slow };
		let mut transitioned = None;
		{
			let mut phase = self.phase.lock();
			match &mut *phase {
				Phase::Closed { window } => {
					if window.len() >= self.config.sliding_window_size {
						window.pop_front();
					}
					window.push_back(outcome);
					if window.len() >= self.config.minimum_number_of_calls {
						let total = window.len() as f64;
						let failures = window.iter().filter(|o| o.failed).count() as f64;
						let slows = window.iter().filter(|o| o.slow).count() as f64;
						let failure_rate = failures / total * 100.0;
						let slow_rate = slows / total * 100.0;
						if failure_rate >= self.config.failure_rate_threshold
							|| slow_rate >= self.config.slow_call_rate_threshold
						{
							*phase = Phase::Open { opened_at: Instant::now() };
							transitioned = Some(BreakerState::Open);
						}
					}
				},
				Phase::HalfOpen { failed: probe_failed, .. } if failed => {
					*probe_failed = true;
					*phase = Phase::Open { opened_at: Instant::now() };
					transitioned = Some(BreakerState::Open);
				},
				Phase::HalfOpen { probes_permitted, probes_seen, failed: probe_failed } => {
					if !*probe_failed && *probes_seen >= *probes_permitted {
						*phase = Phase::Closed {
							window: VecDeque::with_capacity(self.config.sliding_window_size),
						};
						transitioned = Some(BreakerState::Closed);
					}
				},
				Phase::Open { .. } => {},
			}
		}
		match transitioned {
			Some(BreakerState::Open) => warn!(upstream = %self.id, "circuit breaker opened"),
			Some(BreakerState::Closed) => info!(upstream = %self.id, "circuit breaker closed after successful probes"),
			_ => {},
		}
	}

	/// Forces the breaker fully open regardless of recent call history,
	/// starting a fresh `wait_duration_in_open_state` countdown.
	pub fn force_open(&self) {
		*self.phase.lock() = Phase::Open { opened_at: Instant::now() };
		warn!(upstream = %self.id, "circuit breaker force-opened by operator");
	}

	/// Forces the breaker fully closed and discards the current window.
	pub fn force_closed(&self) {
		*self.phase.lock() = Phase::Closed {
			window: VecDeque::with_capacity(self.config.sliding_window_size),
		};
		info!(upstream = %self.id, "circuit breaker force-closed by operator");
	}

	/// Resets to a fresh CLOSED state with an empty window, the same as
	/// a brand-new breaker.
	pub fn reset(&self) {
		self.force_closed();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn breaker() -> CircuitBreaker {
		CircuitBreaker::new(
			"svc-a",
			CircuitBreakerConfig {
				sliding_window_size: 4,
				minimum_number_of_calls: 4,
				failure_rate_threshold: 50.0,
				slow_call_rate_threshold: 100.0,
				slow_call_duration_threshold: Duration::from_secs(2),
				wait_duration_in_open_state: Duration::from_millis(20),
				permitted_calls_in_half_open: 2,
			},
		)
	}

	fn fast() -> Duration {
		Duration::from_millis(1)
	}

	#[test]
	fn stays_closed_below_minimum_calls_floor() {
		let cb = breaker();
		cb.record_failure(fast());
		cb.record_failure(fast());
		cb.record_failure(fast());
		assert!(cb.state().is_closed(), "below minimum_number_of_calls, rate is never evaluated");
	}

	#[test]
	fn opens_once_failure_rate_crosses_threshold_within_window() {
		let cb = breaker();
		cb.record_failure(fast());
		cb.record_failure(fast());
		cb.record_success(fast());
		cb.record_success(fast());
		assert!(cb.state().is_open(), "50% failure rate meets the >= 50% threshold with 4 calls in the window");
	}

	#[test]
	fn stays_closed_when_failures_are_diluted_by_a_larger_window() {
		let cb = CircuitBreaker::new(
			"svc-b",
			CircuitBreakerConfig {
				sliding_window_size: 10,
				minimum_number_of_calls: 10,
				failure_rate_threshold: 50.0,
				slow_call_rate_threshold: 100.0,
				slow_call_duration_threshold: Duration::from_secs(2),
				wait_duration_in_open_state: Duration::from_millis(20),
				permitted_calls_in_half_open: 2,
			},
		);
		for _ in 0..2 {
			cb.record_failure(fast());
		}
		for _ in 0..8 {
			cb.record_success(fast());
		}
		assert!(cb.state().is_closed());
	}

	#[test]
	fn opens_on_slow_call_rate_even_with_no_failures() {
		let cb = breaker();
		let slow = Duration::from_secs(3);
		cb.record_success(slow);
		cb.record_success(slow);
		cb.record_success(slow);
		cb.record_success(slow);
		assert!(cb.state().is_open());
	}

	#[test]
	fn half_open_after_wait_duration_then_closes_on_successful_probes() {
		let cb = breaker();
		cb.record_failure(fast());
		cb.record_failure(fast());
		cb.record_failure(fast());
		cb.record_failure(fast());
		assert!(cb.state().is_open());
		std::thread::sleep(Duration::from_millis(30));
		assert!(cb.call_permitted());
		assert_eq!(cb.state(), BreakerState::HalfOpen);
		cb.record_success(fast());
		assert!(cb.call_permitted());
		cb.record_success(fast());
		assert!(cb.state().is_closed());
	}

	#[test]
	fn half_open_failure_reopens_circuit() {
		let cb = breaker();
		cb.record_failure(fast());
		cb.record_failure(fast());
		cb.record_failure(fast());
		cb.record_failure(fast());
		std::thread::sleep(Duration::from_millis(30));
		assert!(cb.call_permitted());
		cb.record_failure(fast());
		assert!(cb.state().is_open());
	}

	#[test]
	fn force_open_and_force_closed_bypass_the_window() {
		let cb = breaker();
		cb.force_open();
		assert!(cb.state().is_open());
		assert!(!cb.call_permitted());
		cb.force_closed();
		assert!(cb.state().is_closed());
		assert!(cb.call_permitted());
	}

	#[test]
	fn reset_clears_a_half_open_probe_history() {
		let cb = breaker();
		cb.record_failure(fast());
		cb.record_failure(fast());
		cb.record_failure(fast());
		cb.record_failure(fast());
		assert!(cb.state().is_open());
		cb.reset();
		assert!(cb.state().is_closed());
		assert!(cb.call_permitted());
	}
}
