use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use gateway::config::{Config, RawConfig};

/// MCP gateway: proxies JSON-RPC streaming sessions between clients and
/// upstream MCP servers.
#[derive(Debug, Parser)]
#[command(name = "gateway", version = gateway_core::version::BUILD_INFO.version)]
struct Args {
	/// Path to a YAML config file. Without one, every setting falls back
	/// to its documented default.
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Overrides `mcp.bindAddr` from the config file.
	#[arg(long)]
	bind_addr: Option<String>,
}

fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let raw: RawConfig = match &args.config {
		Some(path) => {
			let text = std::fs::read_to_string(path)
				.with_context(|| format!("reading config file {}", path.display()))?;
			serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
		},
		None => RawConfig::default(),
	};
	let mut config = Config::from_raw(raw)?;
	if let Some(bind_addr) = args.bind_addr {
		config.bind_addr = bind_addr.parse().context("parsing --bind-addr")?;
	}

	tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.build()
		.context("building tokio runtime")?
		.block_on(gateway::run(config))
}
