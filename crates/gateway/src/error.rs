//! Typed error taxonomy. Every variant maps to exactly one disposition a
//! client-facing handler needs: an HTTP status, a machine-readable `code`,
//! and a human `message`. Nothing here is an `anyhow::Error` — those only
//! appear at the config/startup boundary in [`crate::config`].

use axum::Json;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::session::SessionId;

/// The `{code, message, path, timestamp}` body returned for every
/// non-2xx response from the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
	pub code: &'static str,
	pub message: String,
	pub path: String,
	pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorBody {
	pub fn new(code: &'static str, message: impl Into<String>, path: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
			path: path.into(),
			timestamp: chrono::Utc::now(),
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
	#[error("unknown session {0}")]
	Unknown(SessionId),
	#[error("session {0} already exists")]
	AlreadyExists(SessionId),
	#[error("session {0}'s stream has already been subscribed to")]
	AlreadyConsumed(SessionId),
	#[error("session {0} expired")]
	Expired(SessionId),
	#[error("session {0} is already closed")]
	AlreadyClosed(SessionId),
	#[error("session id header missing")]
	MissingId,
	#[error("invalid session id: {0}")]
	InvalidId(String),
}

impl SessionError {
	pub fn code(&self) -> &'static str {
		match self {
			SessionError::Unknown(_) => "SESSION_NOT_FOUND",
			SessionError::AlreadyExists(_) => "SESSION_CONFLICT",
			SessionError::AlreadyConsumed(_) => "SESSION_ALREADY_CONSUMED",
			SessionError::Expired(_) => "SESSION_EXPIRED",
			SessionError::AlreadyClosed(_) => "SESSION_ALREADY_CLOSED",
			SessionError::MissingId | SessionError::InvalidId(_) => "SESSION_ID_INVALID",
		}
	}

	pub fn status(&self) -> http::StatusCode {
		match self {
			SessionError::Unknown(_) | SessionError::Expired(_) => http::StatusCode::NOT_FOUND,
			SessionError::AlreadyExists(_)
			| SessionError::AlreadyConsumed(_)
			| SessionError::AlreadyClosed(_) => http::StatusCode::CONFLICT,
			SessionError::MissingId | SessionError::InvalidId(_) => http::StatusCode::BAD_REQUEST,
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
	#[error("unsupported delivery mode for this transport")]
	UnsupportedMode,
	#[error("frame decode error: {0}")]
	Decode(String),
	#[error("buffer overflow: {0} tokens pending, limit {1}")]
	BufferOverflow(usize, usize),
	#[error("client disconnected")]
	ClientGone,
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
	#[error("connect failed: {0}")]
	Connect(String),
	#[error("upstream closed the stream")]
	Closed,
	#[error("upstream sent invalid json-rpc: {0}")]
	InvalidMessage(String),
	#[error("request timed out after {0:?}")]
	Timeout(std::time::Duration),
	#[error("send failed: {0}")]
	Send(String),
	#[error("receive failed: {0}")]
	Recv(String),
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ResilienceError {
	#[error("circuit open for upstream {0}")]
	CircuitOpen(String),
	#[error("retries exhausted after {0} attempts: {1}")]
	RetriesExhausted(u32, Box<UpstreamError>),
	#[error("call timed out after {0:?}")]
	TimedOut(std::time::Duration),
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
	#[error("no instances available for pool {0}")]
	PoolEmpty(String),
	#[error("datasource error: {0}")]
	Datasource(#[from] sqlx::Error),
}

/// Top-level error returned by HTTP handlers; `IntoResponse` turns this
/// into an `ErrorBody` plus the right status code.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
	#[error(transparent)]
	Session(#[from] SessionError),
	#[error(transparent)]
	Transport(#[from] TransportError),
	#[error(transparent)]
	Upstream(#[from] UpstreamError),
	#[error(transparent)]
	Resilience(#[from] ResilienceError),
	#[error(transparent)]
	Router(#[from] RouterError),
	#[error("method not allowed")]
	MethodNotAllowed,
	#[error("invalid request body: {0}")]
	InvalidBody(String),
}

impl GatewayError {
	pub fn code(&self) -> &'static str {
		match self {
			GatewayError::Session(e) => e.code(),
			GatewayError::Transport(_) => "TRANSPORT_ERROR",
			GatewayError::Upstream(_) => "UPSTREAM_ERROR",
			GatewayError::Resilience(ResilienceError::CircuitOpen(_)) => "CIRCUIT_OPEN",
			GatewayError::Resilience(_) => "RESILIENCE_ERROR",
			GatewayError::Router(_) => "ROUTER_ERROR",
			GatewayError::MethodNotAllowed => "METHOD_NOT_ALLOWED",
			GatewayError::InvalidBody(_) => "INVALID_BODY",
		}
	}

	pub fn status(&self) -> http::StatusCode {
		match self {
			GatewayError::Session(e) => e.status(),
			GatewayError::Transport(_) => http::StatusCode::BAD_GATEWAY,
			GatewayError::Upstream(_) => http::StatusCode::BAD_GATEWAY,
			GatewayError::Resilience(ResilienceError::CircuitOpen(_)) => {
				http::StatusCode::SERVICE_UNAVAILABLE
			},
			GatewayError::Resilience(_) => http::StatusCode::GATEWAY_TIMEOUT,
			GatewayError::Router(_) => http::StatusCode::SERVICE_UNAVAILABLE,
			GatewayError::MethodNotAllowed => http::StatusCode::METHOD_NOT_ALLOWED,
			GatewayError::InvalidBody(_) => http::StatusCode::BAD_REQUEST,
		}
	}
}

impl IntoResponse for GatewayError {
	fn into_response(self) -> Response {
		let status = self.status();
		let body = ErrorBody::new(self.code(), self.to_string(), "");
		(status, Json(body)).into_response()
	}
}
