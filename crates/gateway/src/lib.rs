//! MCP gateway: a reverse proxy mediating JSON-RPC 2.0 streaming between
//! clients and upstream MCP servers over SSE, WebSocket, NDJSON and
//! STDIO, with a resilience layer and a read/write datasource router in
//! front of the session store.

pub mod balancer;
pub mod config;
pub mod dbrouter;
pub mod error;
pub mod http;
pub mod parse;
pub mod policy;
pub mod resilience;
pub mod session;
pub mod token;
pub mod transport;
pub mod upstream;

pub mod telemetry;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

pub use config::Config;
use resilience::ResilienceRegistry;
use session::SessionManager;
use upstream::UpstreamRegistry;

/// Everything a request handler needs, built once at startup and shared
/// behind `Arc` for the lifetime of the process.
pub struct GatewayState {
	pub config: Config,
	pub sessions: Arc<SessionManager>,
	pub resilience: Arc<ResilienceRegistry>,
	pub upstreams: UpstreamRegistry,
	pub router: Option<dbrouter::SharedRouter>,
	pub events: Arc<telemetry::EventBus>,
	pub metrics_registry: parking_lot::Mutex<prometheus_client::registry::Registry>,
	pub job_store: transport::async_job::JobStore,
	pub http_client: reqwest::Client,
}

impl GatewayState {
	pub async fn new(config: Config, runtime: &tokio::runtime::Handle) -> anyhow::Result<Arc<Self>> {
		let sessions = SessionManager::new(config.session_expiration);
		let resilience = Arc::new(ResilienceRegistry::new(
			config.circuit_breaker,
			config.retry,
			config.call_timeout,
		));
		let (registry, metrics) = telemetry::build_registry(runtime);
		let events = Arc::new(telemetry::EventBus::new(vec![], vec![metrics]));

		let router = if let Some(master_url) = &config.master_url {
			let master = sqlx::postgres::PgPoolOptions::new()
				.max_connections(10)
				.connect(master_url)
				.await?;
			let replica = match &config.replica_url {
				Some(url) => Some(
					sqlx::postgres::PgPoolOptions::new()
						.max_connections(10)
						.connect(url)
						.await?,
				),
				None => None,
			};
			Some(Arc::new(dbrouter::DatasourceRouter::new(master, replica)))
		} else {
			None
		};

		let upstreams = UpstreamRegistry::new(config.upstreams.clone());

		Ok(Arc::new(Self {
			config,
			sessions,
			resilience,
			upstreams,
			router,
			events,
			metrics_registry: parking_lot::Mutex::new(registry),
			job_store: transport::async_job::JobStore::new(),
			http_client: reqwest::Client::new(),
		}))
	}
}

/// Starts the gateway: binds the listener, spawns the session sweeper,
/// and serves until the process is signaled to stop.
pub async fn run(config: Config) -> anyhow::Result<()> {
	gateway_core::logging::init(&config.logging);
	info!(version = %gateway_core::version::BUILD_INFO, "starting gateway");

	let runtime = tokio::runtime::Handle::current();
	let state = GatewayState::new(config, &runtime).await?;

	let sweeper_sessions = state.sessions.clone();
	let sweep_interval = state.config.session_sweep_interval;
	let sweeper_events = state.events.clone();
	tokio::spawn(async move {
		sweeper_sessions.run_sweeper(sweep_interval, sweeper_events).await;
	});

	let bind_addr = state.config.bind_addr;
	let app = http::router(state);
	let listener = TcpListener::bind(bind_addr).await?;
	info!(%bind_addr, "listening");
	axum::serve(listener, app).await?;
	Ok(())
}
