//! Observability facade. Metrics/tracing exporters are external
//! collaborators reached through trait seams rather than a built-in OTLP
//! pipeline: every event logs through `tracing` unconditionally,
//! regardless of whether a sink is configured, and tokio runtime stats
//! are exposed as `prometheus_client` gauges via
//! `gateway_core::tokio_metrics`.

use std::sync::Arc;

use gateway_core::tokio_metrics::TokioCollector;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use tracing::{debug, error, warn};

use crate::session::SessionId;

#[derive(Debug, Clone)]
pub enum StreamEvent {
	Decided { session_id: SessionId, rule_id: &'static str },
	FallbackTriggered { session_id: SessionId, from: &'static str, reason: String },
	BufferOverflow { session_id: SessionId, pending: usize },
	CircuitOpened { upstream: String },
	CircuitClosed { upstream: String },
	SessionExpired { session_id: SessionId },
	Fatal { session_id: SessionId, error: String },
}

impl StreamEvent {
	fn log(&self) {
		match self {
			StreamEvent::Decided { session_id, rule_id } => {
				debug!(session_id = %session_id, rule_id, "stream decision made");
			},
			StreamEvent::FallbackTriggered { session_id, from, reason } => {
				warn!(session_id = %session_id, from, reason, "delivery mode fell back");
			},
			StreamEvent::BufferOverflow { session_id, pending } => {
				warn!(session_id = %session_id, pending, "stream buffer overflowed");
			},
			StreamEvent::CircuitOpened { upstream } => {
				warn!(upstream, "circuit breaker opened");
			},
			StreamEvent::CircuitClosed { upstream } => {
				debug!(upstream, "circuit breaker closed");
			},
			StreamEvent::SessionExpired { session_id } => {
				debug!(session_id = %session_id, "session expired");
			},
			StreamEvent::Fatal { session_id, error } => {
				error!(session_id = %session_id, error, "fatal stream error");
			},
		}
	}
}

/// Where [`StreamEvent`]s go beyond the log stream. An operator with no
/// sink configured still gets full visibility through `tracing` — see
/// [`StreamEvent::log`], called unconditionally by [`EventBus::emit`].
pub trait EventSink: Send + Sync {
	fn handle(&self, event: &StreamEvent);
}

pub trait MetricsSink: Send + Sync {
	fn record_decision(&self, rule_id: &'static str);
	fn record_fallback(&self);
}

#[derive(Clone, Hash, PartialEq, Eq, Debug, prometheus_client::encoding::EncodeLabelSet)]
struct RuleLabel {
	rule_id: String,
}

pub struct PrometheusMetrics {
	decisions: Family<RuleLabel, Counter>,
	fallbacks: Counter,
}

impl Default for PrometheusMetrics {
	fn default() -> Self {
		Self {
			decisions: Family::default(),
			fallbacks: Counter::default(),
		}
	}
}

impl PrometheusMetrics {
	pub fn register(registry: &mut Registry) -> Arc<Self> {
		let metrics = Arc::new(Self::default());
		registry.register(
			"stream_decisions",
			"stream policy decisions by rule id",
			metrics.decisions.clone(),
		);
		registry.register(
			"stream_fallbacks",
			"mid-stream delivery mode fallbacks",
			metrics.fallbacks.clone(),
		);
		metrics
	}
}

impl MetricsSink for PrometheusMetrics {
	fn record_decision(&self, rule_id: &'static str) {
		self
			.decisions
			.get_or_create(&RuleLabel { rule_id: rule_id.to_string() })
			.inc();
	}

	fn record_fallback(&self) {
		self.fallbacks.inc();
	}
}

/// Fans every event out to `tracing` plus whichever `EventSink`s and
/// `MetricsSink`s are configured.
pub struct EventBus {
	sinks: Vec<Arc<dyn EventSink>>,
	metrics: Vec<Arc<dyn MetricsSink>>,
}

impl EventBus {
	pub fn new(sinks: Vec<Arc<dyn EventSink>>, metrics: Vec<Arc<dyn MetricsSink>>) -> Self {
		Self { sinks, metrics }
	}

	pub fn emit(&self, event: StreamEvent) {
		event.log();
		for sink in &self.sinks {
			sink.handle(&event);
		}
	}

	pub fn record_decision(&self, rule_id: &'static str) {
		for m in &self.metrics {
			m.record_decision(rule_id);
		}
	}

	pub fn record_fallback(&self) {
		for m in &self.metrics {
			m.record_fallback();
		}
	}
}

/// Builds the admin-surface `/metrics` body: tokio runtime stats plus
/// every registered gauge/counter, OpenMetrics text format.
pub fn build_registry(runtime: &tokio::runtime::Handle) -> (Registry, Arc<PrometheusMetrics>) {
	let mut registry = Registry::default();
	TokioCollector::register(&mut registry, runtime);
	let metrics = PrometheusMetrics::register(&mut registry);
	(registry, metrics)
}

pub fn encode_metrics(registry: &Registry) -> Result<String, std::fmt::Error> {
	let mut buf = String::new();
	encode(&mut buf, registry)?;
	Ok(buf)
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Captured(parking_lot::Mutex<Vec<String>>);

	impl EventSink for Captured {
		fn handle(&self, event: &StreamEvent) {
			self.0.lock().push(format!("{event:?}"));
		}
	}

	#[test]
	fn emit_reaches_every_sink() {
		let captured = Arc::new(Captured(parking_lot::Mutex::new(Vec::new())));
		let bus = EventBus::new(vec![captured.clone()], vec![]);
		bus.emit(StreamEvent::SessionExpired {
			session_id: SessionId::new(),
		});
		assert_eq!(captured.0.lock().len(), 1);
	}

	#[test]
	fn prometheus_metrics_count_decisions_by_rule() {
		let mut registry = Registry::default();
		let metrics = PrometheusMetrics::register(&mut registry);
		metrics.record_decision("R7");
		metrics.record_decision("R7");
		let encoded = encode_metrics(&registry).unwrap();
		assert!(encoded.contains("stream_decisions"));
	}
}
