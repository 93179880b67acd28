//! HTTP surface: the ten streaming data-plane endpoints plus the admin
//! metrics endpoint, wired onto one axum [`Router`].

mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use crate::GatewayState;

pub fn router(state: Arc<GatewayState>) -> Router {
	Router::new()
		.route(
			"/api/v1/mcp-server/{server_id}/sessions",
			post(handlers::create_session),
		)
		.route("/api/v1/sessions/{session_id}/sse", get(handlers::sse_subscribe))
		.route("/api/v1/sse/message", post(handlers::sse_message))
		.route(
			"/api/v1/sessions/{session_id}/streamable-http",
			get(handlers::streamable_http_subscribe),
		)
		.route("/api/v1/streamable-http/message", post(handlers::streamable_http_message))
		.route(
			"/api/v1/sessions/{session_id}/stdio",
			get(handlers::stdio_subscribe).delete(handlers::stdio_close),
		)
		.route("/api/v1/sessions/stdio/message", post(handlers::stdio_message))
		.route("/ws/sessions/{session_id}", get(handlers::websocket_upgrade))
		.route("/result/{request_id}", get(handlers::async_result))
		.route("/metrics", get(handlers::metrics))
		.with_state(state)
}
