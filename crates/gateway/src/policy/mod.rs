//! Stream policy & delivery engine. `decide` and `fallback` are pure:
//! no I/O, no locking, no clock reads — they only look at the
//! [`StreamContext`] the caller built. This separation is what makes the
//! rule ladder exhaustively unit-testable without spinning up a server.

use std::time::Duration;

use crate::transport::TransportKind;

/// Last network element in front of the gateway, as seen by this request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTopology {
	Direct,
	ApiGateway,
	Cdn,
	Alb,
	Nlb,
	ReverseProxy,
	Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientType {
	Browser,
	Cli,
	Sdk,
	Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
	SseDirect,
	WsPush,
	AsyncJob,
	Sync,
}

impl DeliveryMode {
	/// The transport adapter that carries this mode's bytes. `Sync` and
	/// `AsyncJob` reuse the plain request/response and polling adapters
	/// respectively; NDJSON and STDIO are client transports the ladder
	/// never selects into, since neither appears in the rule set.
	pub fn transport_kind(self) -> TransportKind {
		match self {
			Self::SseDirect => TransportKind::Sse,
			Self::WsPush => TransportKind::WebSocket,
			Self::AsyncJob => TransportKind::AsyncJob,
			Self::Sync => TransportKind::Sync,
		}
	}

	/// Label used on `StreamEvent`s and metrics; matches the mode names
	/// used in the rule ladder's own doc comments.
	pub fn as_label(self) -> &'static str {
		match self {
			Self::SseDirect => "SSE_DIRECT",
			Self::WsPush => "WS_PUSH",
			Self::AsyncJob => "ASYNC_JOB",
			Self::Sync => "SYNC",
		}
	}
}

/// Everything the rule ladder is allowed to see. Built once per request
/// by the HTTP layer from headers, the resolved entry topology, and
/// static config — never re-derived mid-decision.
#[derive(Debug, Clone)]
pub struct StreamContext {
	pub request_id: String,
	pub client_type: ClientType,
	pub entry_topology: EntryTopology,
	/// Latency this request is expected to take, from prior observations
	/// or static config for the target operation.
	pub expected_latency: Duration,
	/// Ceiling past which a streaming mode is no longer worth holding
	/// open; rule 3 routes anything slower than this to `ASYNC_JOB`.
	pub max_latency_for_streaming: Duration,
	pub persistence_allowed: bool,
	pub cost_budget: Option<f64>,
	pub streaming_requested: bool,
	pub sse_supported: bool,
	pub ws_supported: bool,
	/// Whether the entry point in front of the gateway is known to let
	/// SSE bytes through without buffering; only consulted when
	/// `entry_topology == ApiGateway`.
	pub sse_through_api_gateway_enabled: bool,
	/// Same, for `entry_topology == Cdn`.
	pub sse_through_cdn_enabled: bool,
	pub user_id: Option<String>,
	pub client_ip: Option<String>,
	pub user_agent: Option<String>,
	pub accept_header: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamDecision {
	pub mode: DeliveryMode,
	/// Never empty; a decision without a reason is invalid and callers
	/// must not act on one (see `StreamDecision::new`, the only
	/// constructor, which always sets a non-empty `&'static str`).
	pub reason: &'static str,
	/// Whether the upstream connector for this decision should be opened
	/// as a live multi-chunk stream. True for the two native-push modes;
	/// false for `ASYNC_JOB`/`SYNC`, which never forward chunks to the
	/// client incrementally regardless of how the upstream behaves.
	pub upstream_streaming: bool,
	pub confidence: f64,
	pub rule_id: &'static str,
	pub is_fallback: bool,
	pub original_mode: Option<DeliveryMode>,
	pub fallback_reason: Option<String>,
}

impl StreamDecision {
	fn new(rule_id: &'static str, mode: DeliveryMode, reason: &'static str) -> Self {
		Self {
			mode,
			reason,
			upstream_streaming: matches!(mode, DeliveryMode::SseDirect | DeliveryMode::WsPush),
			confidence: 1.0,
			rule_id,
			is_fallback: false,
			original_mode: None,
			fallback_reason: None,
		}
	}
}

/// First-match-wins rule ladder, 13 rules deep. Every arm returns
/// immediately, so later rules only ever see contexts none of the
/// earlier rules matched.
pub fn decide(ctx: &StreamContext) -> StreamDecision {
	if ctx.entry_topology == EntryTopology::ApiGateway && !ctx.sse_through_api_gateway_enabled {
		return StreamDecision::new("R1", DeliveryMode::AsyncJob, "api_gateway_blocks_streaming");
	}

	if ctx.entry_topology == EntryTopology::Cdn && !ctx.sse_through_cdn_enabled {
		return StreamDecision::new("R2", DeliveryMode::AsyncJob, "cdn_blocks_streaming");
	}

	if ctx.expected_latency > ctx.max_latency_for_streaming {
		return StreamDecision::new(
			"R3",
			DeliveryMode::AsyncJob,
			"expected_latency_exceeds_streaming_budget",
		);
	}

	if !ctx.sse_supported && !ctx.ws_supported {
		return StreamDecision::new("R4", DeliveryMode::Sync, "client_cannot_receive_push");
	}

	if !ctx.streaming_requested {
		return StreamDecision::new("R5", DeliveryMode::Sync, "streaming_not_requested");
	}

	if ctx.ws_supported && ctx.client_type == ClientType::Sdk {
		return StreamDecision::new("R6", DeliveryMode::WsPush, "sdk_client_prefers_websocket");
	}

	if ctx.entry_topology == EntryTopology::Unknown {
		if ctx.client_type == ClientType::Browser && ctx.sse_supported {
			return StreamDecision::new("R7", DeliveryMode::SseDirect, "unknown_topology_browser_sse_capable");
		}
		return StreamDecision::new("R7", DeliveryMode::AsyncJob, "unknown_topology_defaults_to_async");
	}

	if ctx.entry_topology == EntryTopology::ReverseProxy
		&& matches!(ctx.client_type, ClientType::Browser | ClientType::Cli)
	{
		return StreamDecision::new("R8", DeliveryMode::SseDirect, "reverse_proxy_sse_safe");
	}

	if ctx.entry_topology == EntryTopology::Alb {
		return StreamDecision::new("R9", DeliveryMode::AsyncJob, "alb_buffers_sse");
	}

	if ctx.entry_topology == EntryTopology::Nlb {
		return StreamDecision::new("R10", DeliveryMode::SseDirect, "nlb_direct_streaming_safe");
	}

	if ctx.entry_topology == EntryTopology::Direct {
		if ctx.sse_supported {
			return StreamDecision::new("R11", DeliveryMode::SseDirect, "direct_topology_sse_capable");
		}
		if ctx.ws_supported {
			return StreamDecision::new("R11", DeliveryMode::WsPush, "direct_topology_websocket_capable");
		}
	}

	if !ctx.persistence_allowed {
		return StreamDecision::new("R12", DeliveryMode::SseDirect, "stateless_path_prefers_sse");
	}

	if ctx.sse_supported {
		StreamDecision::new("R13", DeliveryMode::SseDirect, "default_sse_capable")
	} else {
		StreamDecision::new("R13", DeliveryMode::AsyncJob, "default_async_fallback")
	}
}

/// Mid-stream failure (timeout, non-2xx establishment, first-byte
/// timeout, flush failure) always steps down to `ASYNC_JOB` — fallback
/// is a success path, not a narrower ladder walk, so the context plays
/// no role in choosing the new mode. Callers must emit
/// `FALLBACK_TRIGGERED` before the first byte flows in the new mode.
pub fn fallback(_ctx: &StreamContext, original: DeliveryMode, reason: &str) -> StreamDecision {
	StreamDecision {
		mode: DeliveryMode::AsyncJob,
		reason: "stream_fallback_to_async_job",
		upstream_streaming: false,
		confidence: 1.0,
		rule_id: "FALLBACK",
		is_fallback: true,
		original_mode: Some(original),
		fallback_reason: Some(reason.to_string()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn base_ctx() -> StreamContext {
		StreamContext {
			request_id: "req-1".to_string(),
			client_type: ClientType::Cli,
			entry_topology: EntryTopology::Direct,
			expected_latency: Duration::from_millis(100),
			max_latency_for_streaming: Duration::from_secs(20),
			persistence_allowed: true,
			cost_budget: None,
			streaming_requested: true,
			sse_supported: true,
			ws_supported: false,
			sse_through_api_gateway_enabled: false,
			sse_through_cdn_enabled: false,
			user_id: None,
			client_ip: None,
			user_agent: None,
			accept_header: None,
		}
	}

	#[test]
	fn every_decision_has_a_non_empty_reason() {
		let d = decide(&base_ctx());
		assert!(!d.reason.is_empty());
	}

	#[test]
	fn s1_happy_sse_via_nlb() {
		let ctx = StreamContext {
			client_type: ClientType::Browser,
			entry_topology: EntryTopology::Nlb,
			sse_supported: true,
			streaming_requested: true,
			..base_ctx()
		};
		let d = decide(&ctx);
		assert_eq!(d.mode, DeliveryMode::SseDirect);
		assert_eq!(d.reason, "nlb_direct_streaming_safe");
		assert_eq!(d.rule_id, "R10");
	}

	#[test]
	fn s2_api_gateway_forces_async() {
		let ctx = StreamContext {
			entry_topology: EntryTopology::ApiGateway,
			sse_supported: true,
			sse_through_api_gateway_enabled: false,
			..base_ctx()
		};
		let d = decide(&ctx);
		assert_eq!(d.mode, DeliveryMode::AsyncJob);
		assert_eq!(d.reason, "api_gateway_blocks_streaming");
		assert_eq!(d.rule_id, "R1");
	}

	#[test]
	fn rule2_cdn_blocks_streaming() {
		let ctx = StreamContext {
			entry_topology: EntryTopology::Cdn,
			sse_through_cdn_enabled: false,
			..base_ctx()
		};
		assert_eq!(decide(&ctx).rule_id, "R2");
	}

	#[test]
	fn rule3_slow_expected_latency_goes_async() {
		let ctx = StreamContext {
			expected_latency: Duration::from_secs(25),
			max_latency_for_streaming: Duration::from_secs(20),
			..base_ctx()
		};
		let d = decide(&ctx);
		assert_eq!(d.rule_id, "R3");
		assert_eq!(d.mode, DeliveryMode::AsyncJob);
	}

	#[test]
	fn rule4_no_push_support_uses_sync() {
		let ctx = StreamContext {
			sse_supported: false,
			ws_supported: false,
			..base_ctx()
		};
		let d = decide(&ctx);
		assert_eq!(d.rule_id, "R4");
		assert_eq!(d.mode, DeliveryMode::Sync);
	}

	#[test]
	fn rule5_streaming_not_requested_uses_sync() {
		let ctx = StreamContext {
			streaming_requested: false,
			..base_ctx()
		};
		let d = decide(&ctx);
		assert_eq!(d.rule_id, "R5");
		assert_eq!(d.mode, DeliveryMode::Sync);
	}

	#[test]
	fn rule6_sdk_client_prefers_websocket() {
		let ctx = StreamContext {
			client_type: ClientType::Sdk,
			ws_supported: true,
			..base_ctx()
		};
		let d = decide(&ctx);
		assert_eq!(d.rule_id, "R6");
		assert_eq!(d.mode, DeliveryMode::WsPush);
	}

	#[test]
	fn rule7_unknown_topology_browser_gets_sse() {
		let ctx = StreamContext {
			client_type: ClientType::Browser,
			entry_topology: EntryTopology::Unknown,
			sse_supported: true,
			..base_ctx()
		};
		let d = decide(&ctx);
		assert_eq!(d.rule_id, "R7");
		assert_eq!(d.mode, DeliveryMode::SseDirect);
	}

	#[test]
	fn rule7_unknown_topology_non_browser_defaults_async() {
		let ctx = StreamContext {
			client_type: ClientType::Cli,
			entry_topology: EntryTopology::Unknown,
			..base_ctx()
		};
		let d = decide(&ctx);
		assert_eq!(d.rule_id, "R7");
		assert_eq!(d.mode, DeliveryMode::AsyncJob);
	}

	#[test]
	fn rule8_reverse_proxy_browser_or_cli_gets_sse() {
		let ctx = StreamContext {
			client_type: ClientType::Cli,
			entry_topology: EntryTopology::ReverseProxy,
			..base_ctx()
		};
		let d = decide(&ctx);
		assert_eq!(d.rule_id, "R8");
		assert_eq!(d.mode, DeliveryMode::SseDirect);
	}

	#[test]
	fn rule9_alb_forces_async() {
		let ctx = StreamContext {
			entry_topology: EntryTopology::Alb,
			..base_ctx()
		};
		let d = decide(&ctx);
		assert_eq!(d.rule_id, "R9");
		assert_eq!(d.mode, DeliveryMode::AsyncJob);
	}

	#[test]
	fn rule10_nlb_gets_sse() {
		let ctx = StreamContext {
			entry_topology: EntryTopology::Nlb,
			..base_ctx()
		};
		assert_eq!(decide(&ctx).rule_id, "R10");
	}

	#[test]
	fn rule11_direct_prefers_sse_then_websocket() {
		let sse_ctx = StreamContext {
			entry_topology: EntryTopology::Direct,
			sse_supported: true,
			..base_ctx()
		};
		let d = decide(&sse_ctx);
		assert_eq!(d.rule_id, "R11");
		assert_eq!(d.mode, DeliveryMode::SseDirect);

		let ws_ctx = StreamContext {
			entry_topology: EntryTopology::Direct,
			sse_supported: false,
			ws_supported: true,
			..base_ctx()
		};
		let d = decide(&ws_ctx);
		assert_eq!(d.rule_id, "R11");
		assert_eq!(d.mode, DeliveryMode::WsPush);
	}

	#[test]
	fn rule12_stateless_path_prefers_sse() {
		// Picks a topology none of rules 1-11 matches so the ladder falls
		// through to the persistence check.
		let ctx = StreamContext {
			entry_topology: EntryTopology::ReverseProxy,
			client_type: ClientType::Sdk,
			ws_supported: false,
			persistence_allowed: false,
			..base_ctx()
		};
		let d = decide(&ctx);
		assert_eq!(d.rule_id, "R12");
		assert_eq!(d.mode, DeliveryMode::SseDirect);
	}

	#[test]
	fn rule13_default_sse_when_capable() {
		let ctx = StreamContext {
			entry_topology: EntryTopology::ReverseProxy,
			client_type: ClientType::Sdk,
			ws_supported: false,
			sse_supported: true,
			persistence_allowed: true,
			..base_ctx()
		};
		let d = decide(&ctx);
		assert_eq!(d.rule_id, "R13");
		assert_eq!(d.mode, DeliveryMode::SseDirect);
	}

	#[test]
	fn rule13_default_async_when_not_sse_capable() {
		// `Unknown` client type dodges rule 6 (SDK) and rule 8
		// (browser/CLI), and `ws_supported=true` dodges rule 4, so this
		// reaches the bottom of the ladder with SSE unsupported.
		let ctx = StreamContext {
			entry_topology: EntryTopology::ReverseProxy,
			client_type: ClientType::Unknown,
			ws_supported: true,
			sse_supported: false,
			persistence_allowed: true,
			..base_ctx()
		};
		let d = decide(&ctx);
		assert_eq!(d.rule_id, "R13");
		assert_eq!(d.mode, DeliveryMode::AsyncJob);
	}

	#[test]
	fn s3_first_byte_timeout_falls_back_to_async_job() {
		let ctx = base_ctx();
		let d = fallback(&ctx, DeliveryMode::SseDirect, "ttfb_exceeded");
		assert!(d.is_fallback);
		assert_eq!(d.mode, DeliveryMode::AsyncJob);
		assert_eq!(d.original_mode, Some(DeliveryMode::SseDirect));
		assert_eq!(d.fallback_reason.as_deref(), Some("ttfb_exceeded"));
	}
}
