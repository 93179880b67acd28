//! Raw → resolved configuration. `RawConfig` is all-`Option`,
//! `deny_unknown_fields`, `kebab-case` (matching the documented config
//! key surface), and `Config::from_raw` fills in every default so the
//! rest of the crate never has to think about missing values again.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::balancer::Strategy;
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use crate::upstream::UpstreamTarget;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawCircuitBreaker {
	pub failure_rate_threshold: Option<f64>,
	pub sliding_window_size: Option<usize>,
	pub minimum_number_of_calls: Option<usize>,
	/// Seconds; the breaker stays OPEN for this long before probing.
	pub wait_duration_in_open_state: Option<u64>,
	pub permitted_calls_in_half_open: Option<usize>,
	pub slow_call_rate_threshold: Option<f64>,
	/// Seconds; a call slower than this counts toward the slow-call rate.
	pub slow_call_duration_threshold: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawRetry {
	pub max_attempts: Option<u32>,
	/// Milliseconds; retries use this as a fixed wait rather than a
	/// backoff range, so it's applied as both floor and ceiling of the
	/// underlying exponential-backoff retrier.
	pub wait_duration: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawTimeout {
	/// Milliseconds.
	pub duration: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawStream {
	pub max_latency_for_streaming_seconds: Option<u64>,
	pub enable_sse_through_api_gateway: Option<bool>,
	pub enable_sse_through_cdn: Option<bool>,
	/// Not part of the documented decision-engine surface, but still
	/// needed to size the per-session resume buffer and cadence the
	/// idle-timeout heartbeat.
	pub buffer_capacity: Option<usize>,
	pub keepalive_interval_seconds: Option<u64>,
	pub ttfb_budget_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawDatasource {
	pub master_url: Option<String>,
	pub replica_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawMcp {
	pub circuit_breaker: Option<RawCircuitBreaker>,
	pub retry: Option<RawRetry>,
	pub timeout: Option<RawTimeout>,
	pub stream: Option<RawStream>,
	pub load_balancer: Option<RawLoadBalancer>,
	pub session: Option<RawSession>,
	pub datasource: Option<RawDatasource>,
	pub bind_addr: Option<String>,
	pub admin_addr: Option<String>,
	#[serde(default)]
	pub upstreams: Vec<UpstreamTarget>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawLoadBalancer {
	pub default_strategy: Option<Strategy>,
	pub unhealthy_threshold: Option<u32>,
	/// `health-check.*` is accepted but not validated against a fixed
	/// sub-schema: this balancer only ever infers health passively from
	/// call outcomes (see `balancer::ServerInstance`), so there's no
	/// active prober to configure yet. Kept permissive rather than
	/// rejected so existing config files aren't broken by a field this
	/// build doesn't act on.
	pub health_check: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawSession {
	/// Seconds.
	pub expiration: Option<u64>,
	pub sweep_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RawConfig {
	pub mcp: Option<RawMcp>,
	pub logging: Option<gateway_core::logging::Config>,
}

/// Fully-populated config every other module reads from. Never
/// `Option`-heavy past this point — a missing value in `RawConfig` is a
/// decision made once, here, not scattered across call sites.
#[derive(Debug, Clone)]
pub struct Config {
	pub circuit_breaker: CircuitBreakerConfig,
	pub retry: RetryConfig,
	pub call_timeout: Duration,
	pub stream_buffer_capacity: usize,
	pub keepalive_interval: Duration,
	pub ttfb_budget: Duration,
	/// Ceiling past which the stream policy ladder routes a request to
	/// `ASYNC_JOB` regardless of client capability (rule 3).
	pub max_latency_for_streaming: Duration,
	pub sse_through_api_gateway_enabled: bool,
	pub sse_through_cdn_enabled: bool,
	pub load_balancer_strategy: Strategy,
	pub unhealthy_threshold: u32,
	pub session_expiration: Duration,
	pub session_sweep_interval: Duration,
	pub master_url: Option<String>,
	pub replica_url: Option<String>,
	pub bind_addr: SocketAddr,
	pub admin_addr: SocketAddr,
	pub logging: gateway_core::logging::Config,
	pub upstreams: Vec<UpstreamTarget>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			circuit_breaker: CircuitBreakerConfig::default(),
			retry: RetryConfig::default(),
			call_timeout: Duration::from_secs(5),
			stream_buffer_capacity: 1024,
			keepalive_interval: Duration::from_secs(15),
			ttfb_budget: Duration::from_secs(1),
			max_latency_for_streaming: Duration::from_secs(20),
			sse_through_api_gateway_enabled: false,
			sse_through_cdn_enabled: false,
			load_balancer_strategy: Strategy::RoundRobin,
			unhealthy_threshold: 3,
			session_expiration: Duration::from_secs(60 * 60),
			session_sweep_interval: Duration::from_secs(60),
			master_url: None,
			replica_url: None,
			bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8080),
			admin_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8081),
			logging: gateway_core::logging::Config::default(),
			upstreams: Vec::new(),
		}
	}
}

impl Config {
	pub fn from_raw(raw: RawConfig) -> anyhow::Result<Self> {
		let mut config = Self::default();
		let Some(mcp) = raw.mcp else {
			if let Some(logging) = raw.logging {
				config.logging = logging;
			}
			return Ok(config);
		};

		if let Some(cb) = mcp.circuit_breaker {
			if let Some(v) = cb.failure_rate_threshold {
				config.circuit_breaker.failure_rate_threshold = v;
			}
			if let Some(v) = cb.sliding_window_size {
				config.circuit_breaker.sliding_window_size = v;
			}
			if let Some(v) = cb.minimum_number_of_calls {
				config.circuit_breaker.minimum_number_of_calls = v;
			}
			if let Some(v) = cb.wait_duration_in_open_state {
				config.circuit_breaker.wait_duration_in_open_state = Duration::from_secs(v);
			}
			if let Some(v) = cb.permitted_calls_in_half_open {
				config.circuit_breaker.permitted_calls_in_half_open = v;
			}
			if let Some(v) = cb.slow_call_rate_threshold {
				config.circuit_breaker.slow_call_rate_threshold = v;
			}
			if let Some(v) = cb.slow_call_duration_threshold {
				config.circuit_breaker.slow_call_duration_threshold = Duration::from_secs(v);
			}
		}
		if let Some(retry) = mcp.retry {
			if let Some(v) = retry.max_attempts {
				config.retry.max_attempts = v;
			}
			if let Some(v) = retry.wait_duration {
				config.retry.base_delay = Duration::from_millis(v);
				config.retry.max_delay = Duration::from_millis(v);
			}
		}
		if let Some(timeout) = mcp.timeout
			&& let Some(v) = timeout.duration
		{
			config.call_timeout = Duration::from_millis(v);
		}
		if let Some(stream) = mcp.stream {
			if let Some(v) = stream.max_latency_for_streaming_seconds {
				config.max_latency_for_streaming = Duration::from_secs(v);
			}
			if let Some(v) = stream.enable_sse_through_api_gateway {
				config.sse_through_api_gateway_enabled = v;
			}
			if let Some(v) = stream.enable_sse_through_cdn {
				config.sse_through_cdn_enabled = v;
			}
			if let Some(v) = stream.buffer_capacity {
				config.stream_buffer_capacity = v;
			}
			if let Some(v) = stream.keepalive_interval_seconds {
				config.keepalive_interval = Duration::from_secs(v);
			}
			if let Some(v) = stream.ttfb_budget_ms {
				config.ttfb_budget = Duration::from_millis(v);
			}
		}
		if let Some(lb) = mcp.load_balancer {
			if let Some(strategy) = lb.default_strategy {
				config.load_balancer_strategy = strategy;
			}
			if let Some(v) = lb.unhealthy_threshold {
				config.unhealthy_threshold = v;
			}
		}
		if let Some(session) = mcp.session {
			if let Some(v) = session.expiration {
				config.session_expiration = Duration::from_secs(v);
			}
			if let Some(v) = session.sweep_interval_seconds {
				config.session_sweep_interval = Duration::from_secs(v);
			}
		}
		if let Some(ds) = mcp.datasource {
			config.master_url = ds.master_url;
			config.replica_url = ds.replica_url;
		}
		if let Some(addr) = mcp.bind_addr {
			config.bind_addr = addr.parse()?;
		}
		if let Some(addr) = mcp.admin_addr {
			config.admin_addr = addr.parse()?;
		}
		config.upstreams = mcp.upstreams;
		if let Some(logging) = raw.logging {
			config.logging = logging;
		}
		Ok(config)
	}

	pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
		let raw: RawConfig = serde_yaml::from_str(text)?;
		Self::from_raw(raw)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_raw_config_uses_defaults() {
		let config = Config::from_raw(RawConfig::default()).unwrap();
		assert_eq!(config.retry.max_attempts, RetryConfig::default().max_attempts);
	}

	#[test]
	fn default_session_expiration_is_one_hour() {
		assert_eq!(Config::default().session_expiration, Duration::from_secs(3600));
	}

	#[test]
	fn yaml_overrides_only_specified_fields() {
		let yaml = r#"
mcp:
  circuit-breaker:
    failure-rate-threshold: 75.0
  session:
    expiration: 120
"#;
		let config = Config::from_yaml(yaml).unwrap();
		assert_eq!(config.circuit_breaker.failure_rate_threshold, 75.0);
		assert_eq!(config.session_expiration, Duration::from_secs(120));
		// Untouched fields keep their defaults.
		assert_eq!(config.retry.max_attempts, RetryConfig::default().max_attempts);
	}

	#[test]
	fn stream_policy_keys_round_trip() {
		let yaml = r#"
mcp:
  stream:
    max-latency-for-streaming-seconds: 5
    enable-sse-through-api-gateway: true
    enable-sse-through-cdn: false
"#;
		let config = Config::from_yaml(yaml).unwrap();
		assert_eq!(config.max_latency_for_streaming, Duration::from_secs(5));
		assert!(config.sse_through_api_gateway_enabled);
		assert!(!config.sse_through_cdn_enabled);
	}

	#[test]
	fn load_balancer_keys_round_trip() {
		let yaml = r#"
mcp:
  load-balancer:
    default-strategy: ip-hash
    unhealthy-threshold: 7
"#;
		let config = Config::from_yaml(yaml).unwrap();
		assert_eq!(config.load_balancer_strategy, Strategy::IpHash);
		assert_eq!(config.unhealthy_threshold, 7);
	}

	#[test]
	fn unknown_field_is_rejected() {
		let yaml = "mcp:\n  bogus-field: true\n";
		assert!(Config::from_yaml(yaml).is_err());
	}
}
