//! Ledger configuration
//!
//! Loaded from a JSON file and then overridden by environment variables with the
//! `LEDGER_` prefix.

use crate::indexer::MAX_LOG_RANGE;
use crate::ledger::WindowMode;
use crate::sync::{TrackerSettings, WatcherSettings};

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Backfill settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
	/// Blocks per log query
	pub chunk_size: u64,
	/// Pause between log queries in milliseconds
	pub request_delay_ms: u64,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			chunk_size: MAX_LOG_RANGE,
			request_delay_ms: 250,
		}
	}
}

/// Live event flushing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WatcherConfig {
	pub debounce_ms: u64,
	pub max_wait_ms: u64,
	/// Caller-side timeout for scheduled ledger tasks; 0 waits indefinitely
	pub task_timeout_secs: u64,
}

impl Default for WatcherConfig {
	fn default() -> Self {
		Self {
			debounce_ms: 1_000,
			max_wait_ms: 5_000,
			task_timeout_secs: 120,
		}
	}
}

/// Decryption delegate HTTP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DelegateConfig {
	/// Per-request timeout; failed requests are not retried
	pub request_timeout_secs: u64,
}

impl Default for DelegateConfig {
	fn default() -> Self {
		Self {
			request_timeout_secs: 30,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LedgerConfig {
	pub data_dir: PathBuf,
	pub indexer_url: String,
	pub indexer_ws_url: String,
	/// Commitment pool contract address
	pub contract: String,
	pub owner: String,
	pub token: String,
	/// This account's decryption delegate, if any
	pub delegate_url: Option<String>,
	/// Hex-encoded 32-byte private decryption key for locally encrypted notes
	pub decryption_key: Option<String>,
	/// Checkpoint for a fresh ledger; the chain head when unset
	pub start_block: Option<u64>,
	pub token_decimals: u32,
	pub window_mode: WindowMode,
	pub sync: SyncConfig,
	pub watcher: WatcherConfig,
	pub delegate: DelegateConfig,
}

impl Default for LedgerConfig {
	fn default() -> Self {
		Self {
			data_dir: PathBuf::from("./ledger-data"),
			indexer_url: "http://127.0.0.1:8080/graphql".to_string(),
			indexer_ws_url: "ws://127.0.0.1:8080/graphql/ws".to_string(),
			contract: String::new(),
			owner: String::new(),
			token: String::new(),
			delegate_url: None,
			decryption_key: None,
			start_block: None,
			token_decimals: 18,
			window_mode: WindowMode::default(),
			sync: SyncConfig::default(),
			watcher: WatcherConfig::default(),
			delegate: DelegateConfig::default(),
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("Failed to read config {path}: {source}")]
	Io {
		path: PathBuf,
		source: std::io::Error,
	},

	#[error("Invalid config file: {0}")]
	Parse(#[from] serde_json::Error),

	#[error("Invalid value for {name}: {value}")]
	InvalidEnv { name: String, value: String },

	#[error("Missing required setting: {0}")]
	Missing(&'static str),

	#[error("Invalid setting: {0}")]
	Invalid(String),
}

impl LedgerConfig {
	pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Ok(serde_json::from_str(&raw)?)
	}

	/// Apply overrides from the process environment.
	///
	/// Environment variables:
	/// - LEDGER_DATA_DIR, LEDGER_INDEXER_URL, LEDGER_INDEXER_WS_URL
	/// - LEDGER_CONTRACT, LEDGER_OWNER, LEDGER_TOKEN
	/// - LEDGER_DELEGATE_URL, LEDGER_DECRYPTION_KEY
	/// - LEDGER_START_BLOCK, LEDGER_TOKEN_DECIMALS, LEDGER_WINDOW_MODE (sliding/legacy)
	/// - LEDGER_CHUNK_SIZE, LEDGER_REQUEST_DELAY_MS
	pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
		self.with_overrides(|name| env::var(name).ok())
	}

	fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
		if let Some(dir) = lookup("LEDGER_DATA_DIR") {
			self.data_dir = PathBuf::from(dir);
		}
		if let Some(url) = lookup("LEDGER_INDEXER_URL") {
			self.indexer_url = url;
		}
		if let Some(url) = lookup("LEDGER_INDEXER_WS_URL") {
			self.indexer_ws_url = url;
		}
		if let Some(contract) = lookup("LEDGER_CONTRACT") {
			self.contract = contract;
		}
		if let Some(owner) = lookup("LEDGER_OWNER") {
			self.owner = owner;
		}
		if let Some(token) = lookup("LEDGER_TOKEN") {
			self.token = token;
		}
		if let Some(url) = lookup("LEDGER_DELEGATE_URL") {
			self.delegate_url = Some(url).filter(|u| !u.is_empty());
		}
		if let Some(key) = lookup("LEDGER_DECRYPTION_KEY") {
			self.decryption_key = Some(key).filter(|k| !k.is_empty());
		}
		if let Some(block) = lookup("LEDGER_START_BLOCK") {
			self.start_block = Some(parse_env("LEDGER_START_BLOCK", &block)?);
		}
		if let Some(decimals) = lookup("LEDGER_TOKEN_DECIMALS") {
			self.token_decimals = parse_env("LEDGER_TOKEN_DECIMALS", &decimals)?;
		}
		if let Some(mode) = lookup("LEDGER_WINDOW_MODE") {
			self.window_mode = match mode.to_lowercase().as_str() {
				"sliding" => WindowMode::Sliding,
				"legacy" => WindowMode::Legacy,
				_ => {
					return Err(ConfigError::InvalidEnv {
						name: "LEDGER_WINDOW_MODE".to_string(),
						value: mode,
					});
				}
			};
		}
		if let Some(chunk) = lookup("LEDGER_CHUNK_SIZE") {
			self.sync.chunk_size = parse_env("LEDGER_CHUNK_SIZE", &chunk)?;
		}
		if let Some(delay) = lookup("LEDGER_REQUEST_DELAY_MS") {
			self.sync.request_delay_ms = parse_env("LEDGER_REQUEST_DELAY_MS", &delay)?;
		}
		Ok(self)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.contract.trim().is_empty() {
			return Err(ConfigError::Missing("contract"));
		}
		if self.owner.trim().is_empty() {
			return Err(ConfigError::Missing("owner"));
		}
		if self.token.trim().is_empty() {
			return Err(ConfigError::Missing("token"));
		}
		if self.sync.chunk_size == 0 || self.sync.chunk_size > MAX_LOG_RANGE {
			return Err(ConfigError::Invalid(format!(
				"chunkSize must be between 1 and {}",
				MAX_LOG_RANGE
			)));
		}
		if self.watcher.debounce_ms > self.watcher.max_wait_ms {
			return Err(ConfigError::Invalid(
				"debounceMs must not exceed maxWaitMs".to_string(),
			));
		}
		Ok(())
	}

	pub fn tracker_settings(&self) -> TrackerSettings {
		TrackerSettings {
			contract: self.contract.clone(),
			chunk_size: self.sync.chunk_size,
			request_delay: Duration::from_millis(self.sync.request_delay_ms),
			default_start_block: self.start_block,
		}
	}

	pub fn watcher_settings(&self) -> WatcherSettings {
		WatcherSettings {
			owner: self.owner.clone(),
			token: self.token.clone(),
			contract: self.contract.clone(),
			debounce: Duration::from_millis(self.watcher.debounce_ms),
			max_wait: Duration::from_millis(self.watcher.max_wait_ms),
			task_timeout: Some(self.watcher.task_timeout_secs)
				.filter(|secs| *secs > 0)
				.map(Duration::from_secs),
			window_mode: self.window_mode,
		}
	}

	pub fn delegate_timeout(&self) -> Duration {
		Duration::from_secs(self.delegate.request_timeout_secs)
	}
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
	value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
		name: name.to_string(),
		value: value.to_string(),
	})
}
