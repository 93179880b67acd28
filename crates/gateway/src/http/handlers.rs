use std::sync::Arc;

use axum::Json;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::GatewayState;
use crate::error::{GatewayError, SessionError, UpstreamError};
use crate::parse;
use crate::policy::{self, ClientType, DeliveryMode, EntryTopology, StreamContext};
use crate::session::{Session, SessionDropper, SessionId};
use crate::telemetry::StreamEvent;
use crate::transport::{TransportKind, async_job, ndjson, sse, sync, websocket};
use crate::upstream::{self, UpstreamId};

/// Best-effort classification from the `User-Agent` header; the gateway
/// has no dedicated client-detection middleware, so this only recognizes
/// the handful of tokens common to browsers and SDK HTTP clients.
fn infer_client_type(user_agent: Option<&str>) -> ClientType {
	let Some(ua) = user_agent else {
		return ClientType::Unknown;
	};
	let lower = ua.to_ascii_lowercase();
	if ["mozilla", "chrome", "safari", "firefox"].iter().any(|t| lower.contains(t)) {
		ClientType::Browser
	} else if ["python", "node", "go-http-client", "okhttp"].iter().any(|t| lower.contains(t)) {
		ClientType::Sdk
	} else {
		ClientType::Cli
	}
}

/// Builds the context the stream policy ladder decides against. There is
/// no topology-classifying middleware in front of this gateway yet, so
/// `entry_topology` is always `Unknown` — rule 7 of the ladder handles
/// that case explicitly rather than falling through to a default.
fn build_stream_context(
	state: &GatewayState,
	client_transport: TransportKind,
	headers: &HeaderMap,
) -> StreamContext {
	let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
	let accept_header = header_str("accept");
	let user_agent = header_str("user-agent");
	let client_ip = header_str("x-forwarded-for");

	StreamContext {
		request_id: uuid::Uuid::new_v4().to_string(),
		client_type: infer_client_type(user_agent.as_deref()),
		entry_topology: EntryTopology::Unknown,
		expected_latency: std::time::Duration::from_millis(100),
		max_latency_for_streaming: state.config.max_latency_for_streaming,
		persistence_allowed: true,
		cost_budget: None,
		streaming_requested: client_transport.is_streaming(),
		sse_supported: matches!(client_transport, TransportKind::Sse | TransportKind::Ndjson)
			|| accept_header.as_deref().is_some_and(|a| a.contains("text/event-stream")),
		ws_supported: matches!(client_transport, TransportKind::WebSocket),
		sse_through_api_gateway_enabled: state.config.sse_through_api_gateway_enabled,
		sse_through_cdn_enabled: state.config.sse_through_cdn_enabled,
		user_id: None,
		client_ip,
		user_agent,
		accept_header,
	}
}

/// The closest [`DeliveryMode`] counterpart to a client-chosen
/// [`TransportKind`], used only to label a fallback event; NDJSON and
/// STDIO have no ladder mode of their own, so they're reported as the
/// native-push mode they most resemble.
fn approximate_delivery_mode(kind: TransportKind) -> DeliveryMode {
	match kind {
		TransportKind::Sse | TransportKind::Ndjson | TransportKind::Stdio => DeliveryMode::SseDirect,
		TransportKind::WebSocket => DeliveryMode::WsPush,
		TransportKind::AsyncJob => DeliveryMode::AsyncJob,
		TransportKind::Sync => DeliveryMode::Sync,
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
	#[serde(default)]
	pub transport: Option<TransportKind>,
	/// The JSON-RPC (or legacy) request to run immediately. Required for
	/// [`TransportKind::Sync`] and [`TransportKind::AsyncJob`], which have
	/// no separate message endpoint; ignored for the streaming transports,
	/// which take their first message through their own `.../message`
	/// endpoint instead.
	#[serde(default)]
	pub request: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
	pub session_id: SessionId,
	pub endpoints: SessionEndpoints,
	pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndpoints {
	pub subscribe: String,
	pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncJobCreated {
	pub request_id: uuid::Uuid,
	pub poll: String,
}

pub async fn create_session(
	State(state): State<Arc<GatewayState>>,
	Path(server_id): Path<String>,
	headers: HeaderMap,
	Json(body): Json<CreateSessionRequest>,
) -> Result<Response, GatewayError> {
	let upstream_id = UpstreamId(server_id);
	let target = state
		.upstreams
		.get(&upstream_id)
		.ok_or_else(|| GatewayError::InvalidBody(format!("unknown server id {upstream_id}")))?;

	let client_transport = body.transport.unwrap_or(target.kind);
	let session_id = SessionId::new();

	// The explicit transport request (or the upstream's own default)
	// still wins outright: the ladder's four delivery modes are a
	// narrower concept than the five wire transports this gateway
	// speaks, so it can't safely override the client's choice here. It
	// still runs on every request so its decision is observable.
	let ctx = build_stream_context(&state, client_transport, &headers);
	let decision = policy::decide(&ctx);
	state.events.emit(StreamEvent::Decided {
		session_id: session_id.clone(),
		rule_id: decision.rule_id,
	});
	state.events.record_decision(decision.rule_id);

	let handle: Result<upstream::UpstreamHandle, GatewayError> = state
		.resilience
		.execute_with_full_protection(
			&upstream_id,
			|| {
				let client = state.http_client.clone();
				let target = target.clone();
				let session_id = session_id.clone();
				async move { upstream::connect(client, &target, session_id).await.map(Ok) }
			},
			|e| Err(GatewayError::from(e)),
		)
		.await;

	if handle.is_err() && client_transport.is_streaming() {
		let original = approximate_delivery_mode(client_transport);
		let fallback_decision = policy::fallback(&ctx, original, "upstream_connect_failed");
		state.events.emit(StreamEvent::FallbackTriggered {
			session_id: session_id.clone(),
			from: original.as_label(),
			reason: fallback_decision.fallback_reason.clone().unwrap_or_default(),
		});
		state.events.record_fallback();
	}
	let handle = handle?;

	if let Some(request) = &body.request {
		handle.send(request.clone()).await?;
	}

	// Sync and async-job sessions are one-shot: the whole exchange runs
	// to completion right here, so there's nothing left to track in the
	// session manager once it's done.
	if !client_transport.is_streaming() {
		let receiver = handle
			.take_receiver()
			.await
			.ok_or(SessionError::AlreadyConsumed(session_id))?;
		return match client_transport {
			TransportKind::Sync => sync::respond(receiver, state.config.ttfb_budget).await,
			TransportKind::AsyncJob => {
				let job_id = state.job_store.submit(receiver, state.config.session_expiration);
				Ok(Json(AsyncJobCreated {
					request_id: job_id.0,
					poll: format!("/result/{}", job_id.0),
				})
				.into_response())
			},
			_ => unreachable!("is_streaming() already filtered to Sync/AsyncJob"),
		};
	}

	let session = Session::with_id(
		session_id,
		client_transport,
		handle,
		state.config.stream_buffer_capacity,
	);
	let session_id = session.id.clone();
	state.sessions.insert(session);

	let (subscribe, message) = endpoints_for(client_transport, &session_id);
	Ok(Json(CreateSessionResponse {
		session_id,
		endpoints: SessionEndpoints { subscribe, message },
		expires_at: chrono::Utc::now()
			+ chrono::Duration::from_std(state.config.session_expiration)
				.unwrap_or_else(|_| chrono::Duration::zero()),
	})
	.into_response())
}

fn endpoints_for(transport: TransportKind, id: &SessionId) -> (String, String) {
	match transport {
		TransportKind::Sse => (
			format!("/api/v1/sessions/{id}/sse"),
			format!("/api/v1/sse/message?sessionId={id}"),
		),
		TransportKind::Ndjson => (
			format!("/api/v1/sessions/{id}/streamable-http"),
			format!("/api/v1/streamable-http/message?sessionId={id}"),
		),
		TransportKind::Stdio => (
			format!("/api/v1/sessions/{id}/stdio"),
			format!("/api/v1/sessions/stdio/message?sessionId={id}"),
		),
		TransportKind::WebSocket => (format!("/ws/sessions/{id}"), String::new()),
		TransportKind::AsyncJob | TransportKind::Sync => (format!("/result/{id}"), String::new()),
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdQuery {
	pub session_id: SessionId,
}

pub async fn sse_subscribe(
	State(state): State<Arc<GatewayState>>,
	Path(session_id): Path<SessionId>,
) -> Result<Response, GatewayError> {
	let session = state.sessions.get(&session_id)?;
	let receiver = session
		.upstream
		.take_receiver()
		.await
		.ok_or(SessionError::AlreadyConsumed(session_id.clone()))?;
	let dropper = SessionDropper::new(state.sessions.clone(), session_id);
	Ok(sse::respond(
		ReceiverStream::new(receiver),
		state.config.keepalive_interval,
		dropper,
	))
}

pub async fn sse_message(
	State(state): State<Arc<GatewayState>>,
	Query(query): Query<SessionIdQuery>,
	Json(envelope): Json<Value>,
) -> Result<Json<Value>, GatewayError> {
	send_envelope(&state, &query.session_id, envelope).await?;
	Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn streamable_http_subscribe(
	State(state): State<Arc<GatewayState>>,
	Path(session_id): Path<SessionId>,
) -> Result<Response, GatewayError> {
	let session = state.sessions.get(&session_id)?;
	let receiver = session
		.upstream
		.take_receiver()
		.await
		.ok_or(SessionError::AlreadyConsumed(session_id.clone()))?;
	Ok(ndjson::respond(ReceiverStream::new(receiver)))
}

pub async fn streamable_http_message(
	State(state): State<Arc<GatewayState>>,
	Query(query): Query<SessionIdQuery>,
	Json(envelope): Json<Value>,
) -> Result<Json<Value>, GatewayError> {
	send_envelope(&state, &query.session_id, envelope).await?;
	Ok(Json(serde_json::json!({ "status": "Message sent" })))
}

pub async fn stdio_subscribe(
	State(state): State<Arc<GatewayState>>,
	Path(session_id): Path<SessionId>,
) -> Result<Response, GatewayError> {
	let session = state.sessions.get(&session_id)?;
	let receiver = session
		.upstream
		.take_receiver()
		.await
		.ok_or(SessionError::AlreadyConsumed(session_id.clone()))?;
	let body_stream = ReceiverStream::new(receiver).map(|token| {
		let mut line = token.payload.map(|p| p.to_string()).unwrap_or_default();
		line.push('\n');
		Ok::<_, std::io::Error>(bytes::Bytes::from(line))
	});
	Ok(
		axum::http::Response::builder()
			.status(axum::http::StatusCode::OK)
			.header(axum::http::header::CONTENT_TYPE, "text/plain")
			.body(axum::body::Body::from_stream(body_stream))
			.expect("valid response"),
	)
}

pub async fn stdio_message(
	State(state): State<Arc<GatewayState>>,
	Query(query): Query<SessionIdQuery>,
	Json(envelope): Json<Value>,
) -> Result<Json<Value>, GatewayError> {
	send_envelope(&state, &query.session_id, envelope).await?;
	Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn stdio_close(
	State(state): State<Arc<GatewayState>>,
	Path(session_id): Path<SessionId>,
) -> Result<Json<Value>, GatewayError> {
	if let Some(session) = state.sessions.remove(&session_id) {
		session.upstream.close().await;
	}
	Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn websocket_upgrade(
	State(state): State<Arc<GatewayState>>,
	Path(session_id): Path<SessionId>,
	ws: WebSocketUpgrade,
) -> Result<Response, GatewayError> {
	let session = state.sessions.get(&session_id)?;
	let receiver = session
		.upstream
		.take_receiver()
		.await
		.ok_or(SessionError::AlreadyConsumed(session_id.clone()))?;
	let to_upstream = session_send_channel(&session);
	let dropper = SessionDropper::new(state.sessions.clone(), session_id);
	Ok(ws.on_upgrade(move |socket| async move {
		websocket::drive(socket, to_upstream, receiver).await;
		drop(dropper);
	}))
}

/// Builds an internal channel that forwards every inbound client message
/// straight to the session's upstream handle, so [`websocket::drive`]
/// doesn't need to know about resilience or upstream errors directly.
fn session_send_channel(session: &Arc<Session>) -> tokio::sync::mpsc::Sender<Value> {
	let (tx, mut rx) = tokio::sync::mpsc::channel::<Value>(64);
	let session = session.clone();
	tokio::spawn(async move {
		while let Some(value) = rx.recv().await {
			if let Err(e) = session.upstream.send(value).await {
				warn!(session_id = %session.id, error = %e, "failed to forward client message upstream");
				break;
			}
		}
	});
	tx
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncResultResponse {
	pub tokens: Vec<Value>,
	pub next: u64,
	pub terminal: bool,
}

#[derive(Debug, Deserialize)]
pub struct AsyncResultQuery {
	#[serde(default)]
	pub cursor: u64,
}

pub async fn async_result(
	State(state): State<Arc<GatewayState>>,
	Path(request_id): Path<uuid::Uuid>,
	Query(query): Query<AsyncResultQuery>,
) -> Result<Json<AsyncResultResponse>, GatewayError> {
	let job_id = async_job::JobId(request_id);
	match state.job_store.status(&job_id) {
		Some(async_job::JobState::Pending) => Ok(Json(AsyncResultResponse {
			tokens: vec![],
			next: query.cursor,
			terminal: false,
		})),
		Some(async_job::JobState::Done { result }) => Ok(Json(AsyncResultResponse {
			tokens: vec![result],
			next: query.cursor + 1,
			terminal: true,
		})),
		Some(async_job::JobState::Failed { reason }) => {
			Err(UpstreamError::InvalidMessage(reason).into())
		},
		None => Err(GatewayError::InvalidBody(format!("unknown request id {request_id}"))),
	}
}

pub async fn metrics(State(state): State<Arc<GatewayState>>) -> Response {
	let registry = state.metrics_registry.lock();
	match crate::telemetry::encode_metrics(&registry) {
		Ok(body) => (
			axum::http::StatusCode::OK,
			[(axum::http::header::CONTENT_TYPE, "application/openmetrics-text")],
			body,
		)
			.into_response(),
		Err(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Config;
	use crate::GatewayState;

	async fn test_state() -> Arc<GatewayState> {
		let runtime = tokio::runtime::Handle::current();
		GatewayState::new(Config::default(), &runtime).await.unwrap()
	}

	async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
		let bytes = http_body_util::BodyExt::collect(response.into_body())
			.await
			.unwrap()
			.to_bytes();
		serde_json::from_slice(&bytes).unwrap()
	}

	#[tokio::test]
	async fn create_session_rejects_unknown_server_id() {
		let state = test_state().await;
		let err = create_session(
			State(state),
			Path("does-not-exist".to_string()),
			HeaderMap::new(),
			Json(CreateSessionRequest {
				transport: None,
				request: None,
			}),
		)
		.await
		.unwrap_err();
		assert!(matches!(err, GatewayError::InvalidBody(_)));
	}

	#[tokio::test]
	async fn create_session_registers_session_with_requested_transport() {
		let state = test_state().await;
		state.upstreams.insert(upstream::UpstreamTarget {
			id: UpstreamId("weather".to_string()),
			kind: TransportKind::Sse,
			address: "http://localhost:9999".to_string(),
		});

		let response = create_session(
			State(state.clone()),
			Path("weather".to_string()),
			HeaderMap::new(),
			Json(CreateSessionRequest {
				transport: Some(TransportKind::Ndjson),
				request: None,
			}),
		)
		.await
		.unwrap();

		assert_eq!(state.sessions.len(), 1);
		let body: CreateSessionResponse = body_json(response).await;
		assert!(body.endpoints.subscribe.contains("streamable-http"));
	}

	#[tokio::test]
	async fn create_session_async_job_submits_and_skips_session_tracking() {
		let state = test_state().await;
		state.upstreams.insert(upstream::UpstreamTarget {
			id: UpstreamId("slow".to_string()),
			kind: TransportKind::AsyncJob,
			address: "http://localhost:9999".to_string(),
		});

		let response = create_session(
			State(state.clone()),
			Path("slow".to_string()),
			HeaderMap::new(),
			Json(CreateSessionRequest {
				transport: None,
				request: Some(serde_json::json!({"jsonrpc": "2.0", "method": "ping", "id": 1})),
			}),
		)
		.await
		.unwrap();

		assert_eq!(state.sessions.len(), 0);
		let body: AsyncJobCreated = body_json(response).await;
		assert!(body.poll.starts_with("/result/"));
	}

	#[tokio::test]
	async fn sse_subscribe_unknown_session_errors() {
		let state = test_state().await;
		let err = sse_subscribe(State(state), Path(SessionId::from("nope")))
			.await
			.unwrap_err();
		assert!(matches!(err, GatewayError::Session(SessionError::Unknown(_))));
	}

	#[tokio::test]
	async fn sse_subscribe_can_only_be_taken_once() {
		let state = test_state().await;
		let session = Session::new(TransportKind::Sse, upstream::UpstreamHandle::noop(), 16);
		let id = session.id.clone();
		state.sessions.insert(session);

		assert!(sse_subscribe(State(state.clone()), Path(id.clone())).await.is_ok());
		let err = sse_subscribe(State(state), Path(id)).await.unwrap_err();
		assert!(matches!(
			err,
			GatewayError::Session(SessionError::AlreadyConsumed(_))
		));
	}

	#[tokio::test]
	async fn stdio_close_on_unknown_session_is_a_noop() {
		let state = test_state().await;
		let response = stdio_close(State(state), Path(SessionId::from("nope"))).await;
		assert!(response.is_ok());
	}

	#[tokio::test]
	async fn async_result_unknown_request_id_errors() {
		let state = test_state().await;
		let err = async_result(
			State(state),
			Path(uuid::Uuid::new_v4()),
			Query(AsyncResultQuery { cursor: 0 }),
		)
		.await
		.unwrap_err();
		assert!(matches!(err, GatewayError::InvalidBody(_)));
	}

	#[tokio::test]
	async fn send_envelope_rejects_malformed_message() {
		let state = test_state().await;
		let session = Session::new(TransportKind::Sse, upstream::UpstreamHandle::noop(), 16);
		let id = session.id.clone();
		state.sessions.insert(session);

		let err = send_envelope(&state, &id, serde_json::json!({"nope": true}))
			.await
			.unwrap_err();
		assert!(matches!(err, GatewayError::InvalidBody(_)));
	}

	#[tokio::test]
	async fn metrics_handler_returns_ok() {
		let state = test_state().await;
		let response = metrics(State(state)).await;
		assert_eq!(response.status(), axum::http::StatusCode::OK);
	}
}

/// Validates `raw` as either a JSON-RPC 2.0 or legacy envelope before
/// forwarding it upstream unchanged — the normalization only needs to
/// produce a uniform `effectiveMethod`/`effectiveArguments` view for
/// gateway-side decisions, not rewrite what the upstream receives.
async fn send_envelope(
	state: &Arc<GatewayState>,
	session_id: &SessionId,
	raw: Value,
) -> Result<(), GatewayError> {
	let message =
		parse::parse_value(raw.clone()).map_err(|e| GatewayError::InvalidBody(e.to_string()))?;
	let session = state.sessions.get(session_id)?;
	session.touch();
	tracing::trace!(
		session_id = %session_id,
		method = message.effective_method().unwrap_or(""),
		"dispatching client message"
	);
	session.upstream.send(raw).await?;
	Ok(())
}
