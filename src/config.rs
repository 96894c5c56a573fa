//! Configuration for client and server
//!
//! Three sources feed a running process:
//! 1. `NetworkConfig` defaults, optionally overridden by a TOML file
//! 2. The client profile file (`USER`/`PASS`/`PATH`)
//! 3. CLI flags (highest priority, applied in `main`)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SyncError;

/// Network and timing parameters shared by client and server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NetworkConfig {
	/// Server address to bind (server) or connect to (client)
	pub host: String,

	pub port: u16,

	/// Interval between two change-detection ticks
	pub tick_interval_ms: u64,

	/// Number of ticks between two periodic probes
	pub probe_period: u32,

	/// Idle window multiplier: a session with no traffic for
	/// tick × probe_period × idle_multiplier is reaped
	pub idle_multiplier: u32,

	/// Maximum number of concurrently active sessions
	pub pool_size: usize,
}

impl Default for NetworkConfig {
	fn default() -> Self {
		NetworkConfig {
			host: "127.0.0.1".to_string(),
			port: 3000,
			tick_interval_ms: 500,
			probe_period: 40,
			idle_multiplier: 3,
			pool_size: 5,
		}
	}
}

impl NetworkConfig {
	/// Load from a TOML file, or defaults when no file is given
	pub fn load(path: Option<&Path>) -> Result<Self, SyncError> {
		match path {
			Some(path) => {
				let text = fs::read_to_string(path).map_err(|e| SyncError::InvalidConfig {
					message: format!("cannot read {}: {}", path.display(), e),
				})?;
				let config: NetworkConfig = toml::from_str(&text)?;
				config.validate()?;
				Ok(config)
			}
			None => Ok(NetworkConfig::default()),
		}
	}

	pub fn validate(&self) -> Result<(), SyncError> {
		if self.tick_interval_ms == 0 {
			return Err(SyncError::InvalidConfig { message: "tickIntervalMs must be > 0".into() });
		}
		if self.probe_period == 0 {
			return Err(SyncError::InvalidConfig { message: "probePeriod must be > 0".into() });
		}
		if self.pool_size == 0 {
			return Err(SyncError::InvalidConfig { message: "poolSize must be > 0".into() });
		}
		Ok(())
	}

	pub fn address(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}

	pub fn tick_interval(&self) -> Duration {
		Duration::from_millis(self.tick_interval_ms)
	}

	/// Time without traffic after which the server drops a session
	pub fn idle_window(&self) -> Duration {
		Duration::from_millis(
			self.tick_interval_ms * u64::from(self.probe_period) * u64::from(self.idle_multiplier),
		)
	}
}

/// Client credentials and watched directory
///
/// Stored as a flat token file:
///
/// ```text
/// USER
/// alice
/// PASS
/// secret
/// PATH
/// /home/alice/docs
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProfile {
	pub user: String,
	pub password: String,
	pub watch_path: PathBuf,
}

impl ClientProfile {
	pub fn parse(text: &str) -> Result<Self, SyncError> {
		let mut user = None;
		let mut password = None;
		let mut watch_path = None;

		let mut tokens = text.split_whitespace();
		while let Some(key) = tokens.next() {
			match key {
				"USER" => user = tokens.next().map(str::to_string),
				"PASS" => password = tokens.next().map(str::to_string),
				"PATH" => watch_path = tokens.next().map(PathBuf::from),
				_ => {}
			}
		}

		match (user, password, watch_path) {
			(Some(user), Some(password), Some(watch_path)) => {
				Ok(ClientProfile { user, password, watch_path })
			}
			_ => Err(SyncError::InvalidConfig {
				message: "profile must define USER, PASS and PATH".into(),
			}),
		}
	}

	pub fn load(path: &Path) -> Result<Self, SyncError> {
		let text = fs::read_to_string(path).map_err(|e| SyncError::InvalidConfig {
			message: format!("cannot read profile {}: {}", path.display(), e),
		})?;
		Self::parse(&text)
	}

	pub fn render(&self) -> String {
		format!(
			"USER\n{}\nPASS\n{}\nPATH\n{}",
			self.user,
			self.password,
			self.watch_path.display()
		)
	}

	pub fn save(&self, path: &Path) -> Result<(), SyncError> {
		fs::write(path, self.render()).map_err(|e| SyncError::filesystem(path, e))
	}
}

/// Server-side settings
#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Directory holding one sandbox per client
	pub root: PathBuf,

	/// Credential store file
	pub credentials: PathBuf,

	pub network: NetworkConfig,
}


// vim: ts=4
