#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::{info, warn};

/// Default config path: `~/.rondo/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".rondo").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
pub fn load_server_config() -> anyhow::Result<ServerConfig> {
	let path = default_config_path()?;
	load_server_config_from_path(&path)
}

/// Same as `load_server_config` but with an explicit config path.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Which bearer token format the server mints and validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenSchemeConfig {
	/// `<24 hex>.<uuid>`, unsigned.
	Legacy,
	/// `v1.<payload>.<hmac>`, requires a signing secret.
	#[default]
	Signed,
}

/// Server config (v1).
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub channels: ChannelSettings,
	pub limits: LimitSettings,
	pub persistence: PersistenceSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Websocket bind address (host:port).
	pub bind: String,
	/// Message of the day sent in the welcome frame.
	pub motd: String,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Token scheme for minting and validation.
	pub token_scheme: TokenSchemeConfig,
	/// HMAC secret for signed tokens.
	pub token_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
	/// Permanent lobby channels created at startup.
	pub lobbies: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LimitSettings {
	pub chat_per_window: u32,
	pub profile_per_window: u32,
	pub cursor_per_window: u32,
}

#[derive(Debug, Clone, Default)]
pub struct PersistenceSettings {
	pub enabled: bool,
	/// Database URL (sqlite:).
	pub database_url: Option<String>,
}

impl Default for ServerSettings {
	fn default() -> Self {
		Self {
			bind: "127.0.0.1:4000".to_string(),
			motd: "welcome".to_string(),
			metrics_bind: None,
			token_scheme: TokenSchemeConfig::default(),
			token_secret: None,
		}
	}
}

impl Default for ChannelSettings {
	fn default() -> Self {
		Self {
			lobbies: vec!["lobby".to_string(), "test/awkward".to_string()],
		}
	}
}

impl Default for LimitSettings {
	fn default() -> Self {
		Self {
			chat_per_window: 10,
			profile_per_window: 5,
			cursor_per_window: 20,
		}
	}
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			server: ServerSettings::default(),
			channels: ChannelSettings::default(),
			limits: LimitSettings::default(),
			persistence: PersistenceSettings::default(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	channels: FileChannelSettings,

	#[serde(default)]
	limits: FileLimitSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	bind: Option<String>,
	motd: Option<String>,
	metrics_bind: Option<String>,
	token_scheme: Option<String>,
	token_secret: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileChannelSettings {
	lobbies: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileLimitSettings {
	chat_per_window: Option<u32>,
	profile_per_window: Option<u32>,
	cursor_per_window: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	enabled: Option<bool>,
	database_url: Option<String>,
}

fn parse_token_scheme(v: &str) -> Option<TokenSchemeConfig> {
	match v.trim().to_ascii_lowercase().as_str() {
		"legacy" => Some(TokenSchemeConfig::Legacy),
		"signed" => Some(TokenSchemeConfig::Signed),
		_ => None,
	}
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = ServerConfig::default();

		let token_scheme = file
			.server
			.token_scheme
			.as_deref()
			.and_then(parse_token_scheme)
			.unwrap_or(defaults.server.token_scheme);

		Self {
			server: ServerSettings {
				bind: file.server.bind.filter(|s| !s.trim().is_empty()).unwrap_or(defaults.server.bind),
				motd: file.server.motd.filter(|s| !s.trim().is_empty()).unwrap_or(defaults.server.motd),
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				token_scheme,
				token_secret: file.server.token_secret.filter(|s| !s.trim().is_empty()),
			},
			channels: ChannelSettings {
				lobbies: file
					.channels
					.lobbies
					.filter(|l| !l.is_empty())
					.unwrap_or(defaults.channels.lobbies),
			},
			limits: LimitSettings {
				chat_per_window: file.limits.chat_per_window.unwrap_or(defaults.limits.chat_per_window),
				profile_per_window: file.limits.profile_per_window.unwrap_or(defaults.limits.profile_per_window),
				cursor_per_window: file.limits.cursor_per_window.unwrap_or(defaults.limits.cursor_per_window),
			},
			persistence: PersistenceSettings {
				enabled: file.persistence.enabled.unwrap_or(false),
				database_url: file.persistence.database_url.filter(|s| !s.trim().is_empty()),
			},
		}
	}

	/// A signed scheme without a secret cannot validate or mint; fall
	/// back to legacy tokens in that case.
	pub fn effective_token_scheme(&self) -> TokenSchemeConfig {
		if self.server.token_scheme == TokenSchemeConfig::Signed && self.server.token_secret.is_none() {
			warn!("token scheme is signed but no token_secret is configured; using legacy tokens");
			return TokenSchemeConfig::Legacy;
		}
		self.server.token_scheme
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Ok(v) = std::env::var("RONDO_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.bind = v;
			info!("server config: bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("RONDO_MOTD") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.motd = v;
			info!("server config: motd overridden by env");
		}
	}

	if let Ok(v) = std::env::var("RONDO_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("RONDO_TOKEN_SCHEME")
		&& let Some(scheme) = parse_token_scheme(&v)
	{
		cfg.server.token_scheme = scheme;
		info!(?scheme, "server config: token_scheme overridden by env");
	}

	if let Ok(v) = std::env::var("RONDO_TOKEN_SECRET") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.token_secret = Some(v);
			info!("server config: token_secret overridden by env");
		}
	}

	if let Ok(v) = std::env::var("RONDO_LOBBIES") {
		let lobbies: Vec<String> = v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
		if !lobbies.is_empty() {
			cfg.channels.lobbies = lobbies;
			info!("server config: lobbies overridden by env");
		}
	}

	if let Ok(v) = std::env::var("RONDO_CHAT_PER_WINDOW")
		&& let Ok(max) = v.trim().parse::<u32>()
	{
		cfg.limits.chat_per_window = max;
		info!(max, "server config: chat_per_window overridden by env");
	}

	if let Ok(v) = std::env::var("RONDO_PROFILE_PER_WINDOW")
		&& let Ok(max) = v.trim().parse::<u32>()
	{
		cfg.limits.profile_per_window = max;
		info!(max, "server config: profile_per_window overridden by env");
	}

	if let Ok(v) = std::env::var("RONDO_CURSOR_PER_WINDOW")
		&& let Ok(max) = v.trim().parse::<u32>()
	{
		cfg.limits.cursor_per_window = max;
		info!(max, "server config: cursor_per_window overridden by env");
	}

	if let Ok(v) = std::env::var("RONDO_PERSISTENCE_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.persistence.enabled = enabled;
		info!(enabled, "persistence: enabled overridden by env");
	}

	if let Ok(v) = std::env::var("RONDO_PERSISTENCE_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.persistence.database_url = Some(v);
			info!("persistence: database_url overridden by env");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_fill_empty_file() {
		let cfg = ServerConfig::from_file(FileConfig::default());
		assert_eq!(cfg.server.bind, "127.0.0.1:4000");
		assert_eq!(cfg.channels.lobbies, vec!["lobby".to_string(), "test/awkward".to_string()]);
		assert_eq!(cfg.limits.chat_per_window, 10);
		assert!(!cfg.persistence.enabled);
	}

	#[test]
	fn file_values_override_defaults() {
		let file: FileConfig = toml::from_str(
			r#"
			[server]
			bind = "0.0.0.0:9000"
			token_scheme = "legacy"

			[channels]
			lobbies = ["hall"]

			[limits]
			cursor_per_window = 40
			"#,
		)
		.unwrap();

		let cfg = ServerConfig::from_file(file);
		assert_eq!(cfg.server.bind, "0.0.0.0:9000");
		assert_eq!(cfg.server.token_scheme, TokenSchemeConfig::Legacy);
		assert_eq!(cfg.channels.lobbies, vec!["hall".to_string()]);
		assert_eq!(cfg.limits.cursor_per_window, 40);
		assert_eq!(cfg.limits.chat_per_window, 10);
	}

	#[test]
	fn signed_without_secret_falls_back_to_legacy() {
		let cfg = ServerConfig::default();
		assert_eq!(cfg.effective_token_scheme(), TokenSchemeConfig::Legacy);

		let mut cfg = ServerConfig::default();
		cfg.server.token_secret = Some("s3cret".to_string());
		assert_eq!(cfg.effective_token_scheme(), TokenSchemeConfig::Signed);
	}
}
