use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Resolved logging configuration, built from `RawLogging` (see the
/// `gateway` crate's config module) plus whatever `RUST_LOG` says.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
	/// `tracing_subscriber::EnvFilter` directive string. Falls back to
	/// `RUST_LOG`, then to `info`.
	pub filter: Option<String>,
	/// Extra fields every log line should carry (e.g. `region=us-east`).
	#[serde(default)]
	pub add_fields: HashSet<String>,
	/// Fields to suppress even if the event carries them.
	#[serde(default)]
	pub remove_fields: HashSet<String>,
	/// Emit newline-delimited JSON instead of the human formatter.
	#[serde(default)]
	pub json: bool,
}

/// Installs the process-wide `tracing` subscriber. Idempotent only in the
/// sense that calling it twice panics (tracing disallows a second global
/// subscriber) — callers must call it exactly once, from `main`.
pub fn init(cfg: &Config) {
	let filter = cfg
		.filter
		.clone()
		.map(EnvFilter::new)
		.unwrap_or_else(|| EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

	let registry = tracing_subscriber::registry().with(filter);

	if cfg.json {
		registry
			.with(tracing_subscriber::fmt::layer().json().flatten_event(true))
			.init();
	} else {
		registry.with(tracing_subscriber::fmt::layer()).init();
	}
}
