#![forbid(unsafe_code)]

use std::collections::HashMap;

use anyhow::{Context, anyhow};
use rondo_domain::{Participant, ParticipantModifier};

/// Token-keyed persistence for participant profiles and modifiers.
///
/// Rows are JSON blobs keyed by the bearer token; the whole store is
/// loaded at startup and written through on change. A store built with
/// `disabled()` keeps everything in memory only.
#[derive(Clone)]
pub struct Store {
	backend: Option<sqlx::SqlitePool>,
}

impl Store {
	pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
		if !database_url.starts_with("sqlite:") {
			return Err(anyhow!("unsupported database_url for store"));
		}

		let pool = sqlx::SqlitePool::connect(database_url).await.context("connect sqlite")?;
		sqlx::query("CREATE TABLE IF NOT EXISTS profiles (token TEXT PRIMARY KEY, data TEXT NOT NULL)")
			.execute(&pool)
			.await
			.context("create profiles table")?;
		sqlx::query("CREATE TABLE IF NOT EXISTS modifiers (token TEXT PRIMARY KEY, data TEXT NOT NULL)")
			.execute(&pool)
			.await
			.context("create modifiers table")?;

		Ok(Self { backend: Some(pool) })
	}

	pub fn disabled() -> Self {
		Self { backend: None }
	}

	pub async fn load_profiles(&self) -> anyhow::Result<HashMap<String, Participant>> {
		let Some(pool) = &self.backend else {
			return Ok(HashMap::new());
		};

		let rows: Vec<(String, String)> = sqlx::query_as("SELECT token, data FROM profiles")
			.fetch_all(pool)
			.await
			.context("load profiles")?;

		let mut profiles = HashMap::with_capacity(rows.len());
		for (token, data) in rows {
			match serde_json::from_str(&data) {
				Ok(profile) => {
					profiles.insert(token, profile);
				}
				Err(err) => {
					tracing::warn!(%err, "skipping unreadable profile row");
				}
			}
		}

		Ok(profiles)
	}

	pub async fn load_modifiers(&self) -> anyhow::Result<HashMap<String, ParticipantModifier>> {
		let Some(pool) = &self.backend else {
			return Ok(HashMap::new());
		};

		let rows: Vec<(String, String)> = sqlx::query_as("SELECT token, data FROM modifiers")
			.fetch_all(pool)
			.await
			.context("load modifiers")?;

		let mut modifiers = HashMap::with_capacity(rows.len());
		for (token, data) in rows {
			match serde_json::from_str(&data) {
				Ok(modifier) => {
					modifiers.insert(token, modifier);
				}
				Err(err) => {
					tracing::warn!(%err, "skipping unreadable modifier row");
				}
			}
		}

		Ok(modifiers)
	}

	pub async fn save_profile(&self, token: &str, profile: &Participant) -> anyhow::Result<()> {
		let Some(pool) = &self.backend else {
			return Ok(());
		};

		let data = serde_json::to_string(profile).context("encode profile")?;
		sqlx::query(
			"INSERT INTO profiles (token, data) VALUES (?, ?) \
			ON CONFLICT(token) DO UPDATE SET data = excluded.data",
		)
		.bind(token)
		.bind(data)
		.execute(pool)
		.await
		.context("upsert profile")?;

		Ok(())
	}

	pub async fn save_modifier(&self, token: &str, modifier: &ParticipantModifier) -> anyhow::Result<()> {
		let Some(pool) = &self.backend else {
			return Ok(());
		};

		let data = serde_json::to_string(modifier).context("encode modifier")?;
		sqlx::query(
			"INSERT INTO modifiers (token, data) VALUES (?, ?) \
			ON CONFLICT(token) DO UPDATE SET data = excluded.data",
		)
		.bind(token)
		.bind(data)
		.execute(pool)
		.await
		.context("upsert modifier")?;

		Ok(())
	}
}
