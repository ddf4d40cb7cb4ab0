#![forbid(unsafe_code)]

mod config;
mod server;
mod util;

use rondo_domain::ChannelId;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::server::directory::Directory;
use crate::server::registry::ChannelRegistry;
use crate::server::router::{Router, RouterConfig};
use crate::server::store::Store;
use crate::server::ws::run_listener;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: rondo_server [--bind host:port]\n\
\n\
Options:\n\
\t--bind    Websocket bind address (default: 127.0.0.1:4000)\n\
\t--help   Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> Option<String> {
	let mut bind = None;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--bind must be non-empty (expected host:port)");
					usage_and_exit();
				}
				bind = Some(v);
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	bind
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,rondo_server=debug".to_string());

	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false))
		.init();
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let config_path = crate::config::default_config_path()?;
	let mut server_cfg = crate::config::load_server_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	if let Some(bind) = parse_args() {
		server_cfg.server.bind = bind;
	}

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let store = if server_cfg.persistence.enabled {
		let Some(database_url) = server_cfg.persistence.database_url.as_deref() else {
			return Err(anyhow::anyhow!("persistence enabled but no database_url configured"));
		};
		let store = Store::connect(database_url).await?;
		info!("persistence enabled");
		store
	} else {
		Store::disabled()
	};

	let profiles = store.load_profiles().await?;
	let modifiers = store.load_modifiers().await?;
	info!(profiles = profiles.len(), modifiers = modifiers.len(), "loaded directory");
	let directory = Directory::new(profiles, modifiers);

	let lobbies = server_cfg
		.channels
		.lobbies
		.iter()
		.filter_map(|name| match name.parse::<ChannelId>() {
			Ok(id) => Some(id),
			Err(e) => {
				warn!(error = %e, name, "skipping invalid lobby id");
				None
			}
		})
		.collect();
	let registry = ChannelRegistry::new(lobbies);

	let (router, events) = Router::new(RouterConfig::from_server_config(&server_cfg), directory, registry, store);
	tokio::spawn(router.run());

	run_listener(&server_cfg.server.bind, events).await
}
