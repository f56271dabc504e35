//! Session configuration.
//!
//! Field names and defaults follow the options a CometD client accepts, so a
//! JSON configuration written for another client loads unchanged:
//!
//! ```json
//! { "url": "https://example.com/cometd", "maxNetworkDelay": 15000, "reconnect": "retry" }
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use bayeux_protocol::Reconnect;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Verbosity requested for the client's log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	Warn,
	#[default]
	Info,
	Debug,
}

impl LogLevel {
	/// `EnvFilter` directive enabling this level for the client crates.
	pub fn directive(self) -> &'static str {
		match self {
			LogLevel::Warn => "bayeux=warn",
			LogLevel::Info => "bayeux=info",
			LogLevel::Debug => "bayeux=debug",
		}
	}
}

impl std::str::FromStr for LogLevel {
	type Err = Error;

	fn from_str(value: &str) -> Result<Self> {
		match value {
			"warn" => Ok(LogLevel::Warn),
			"info" => Ok(LogLevel::Info),
			"debug" => Ok(LogLevel::Debug),
			other => Err(Error::Config(format!("unknown log level '{other}'"))),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
	/// Bayeux server endpoint.
	pub url: String,
	/// Concurrent HTTP requests, one of which is reserved for the long-poll.
	#[serde(default = "default_max_connections")]
	pub max_connections: usize,
	#[serde(default = "default_backoff_increment", with = "millis")]
	pub backoff_increment: Duration,
	#[serde(default = "default_max_backoff", with = "millis")]
	pub max_backoff: Duration,
	#[serde(default)]
	pub log_level: LogLevel,
	#[serde(default = "default_true")]
	pub reverse_incoming_extensions: bool,
	#[serde(default = "default_max_network_delay", with = "millis")]
	pub max_network_delay: Duration,
	#[serde(default)]
	pub request_headers: BTreeMap<String, String>,
	/// Initial long-poll timeout, until the server advises otherwise.
	#[serde(default = "default_timeout", with = "millis")]
	pub timeout: Duration,
	#[serde(default, with = "millis")]
	pub interval: Duration,
	#[serde(default)]
	pub reconnect: Reconnect,
	/// Origin the client runs under; requests to another host:port are
	/// cross-domain.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub origin: Option<String>,
}

impl Config {
	pub fn new(url: impl Into<String>) -> Self {
		Self {
			url: url.into(),
			max_connections: default_max_connections(),
			backoff_increment: default_backoff_increment(),
			max_backoff: default_max_backoff(),
			log_level: LogLevel::default(),
			reverse_incoming_extensions: true,
			max_network_delay: default_max_network_delay(),
			request_headers: BTreeMap::new(),
			timeout: default_timeout(),
			interval: Duration::ZERO,
			reconnect: Reconnect::Retry,
			origin: None,
		}
	}

	/// Parses and validates a JSON configuration object.
	pub fn from_json(text: &str) -> Result<Self> {
		let config: Config = serde_json::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	pub fn with_max_connections(mut self, max_connections: usize) -> Self {
		self.max_connections = max_connections;
		self
	}

	pub fn with_backoff(mut self, increment: Duration, max: Duration) -> Self {
		self.backoff_increment = increment;
		self.max_backoff = max;
		self
	}

	pub fn with_log_level(mut self, level: LogLevel) -> Self {
		self.log_level = level;
		self
	}

	pub fn with_reverse_incoming_extensions(mut self, reverse: bool) -> Self {
		self.reverse_incoming_extensions = reverse;
		self
	}

	pub fn with_max_network_delay(mut self, delay: Duration) -> Self {
		self.max_network_delay = delay;
		self
	}

	pub fn with_request_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.request_headers.insert(name.into(), value.into());
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;
		self
	}

	pub fn with_interval(mut self, interval: Duration) -> Self {
		self.interval = interval;
		self
	}

	pub fn with_reconnect(mut self, reconnect: Reconnect) -> Self {
		self.reconnect = reconnect;
		self
	}

	pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
		self.origin = Some(origin.into());
		self
	}

	pub fn validate(&self) -> Result<()> {
		if self.url.is_empty() {
			return Err(Error::Config("missing required parameter 'url' specifying the Bayeux server URL".into()));
		}
		let url = Url::parse(&self.url).map_err(|err| Error::Config(format!("invalid url '{}': {err}", self.url)))?;
		if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
			return Err(Error::Config(format!("unsupported url scheme '{}'", url.scheme())));
		}
		if self.max_connections < 2 {
			return Err(Error::Config(format!(
				"maxConnections must be at least 2 (one connection is reserved for the long-poll), got {}",
				self.max_connections
			)));
		}
		if let Some(origin) = &self.origin {
			Url::parse(origin).map_err(|err| Error::Config(format!("invalid origin '{origin}': {err}")))?;
		}
		Ok(())
	}

	/// Whether the server lives on another host:port than `origin`.
	///
	/// Without an origin there is no same-origin policy to satisfy.
	pub fn is_cross_domain(&self) -> bool {
		let Some(origin) = self.origin.as_deref() else {
			return false;
		};
		match (Url::parse(&self.url), Url::parse(origin)) {
			(Ok(server), Ok(origin)) => authority(&server) != authority(&origin),
			_ => false,
		}
	}
}

fn authority(url: &Url) -> (Option<String>, Option<u16>) {
	(url.host_str().map(str::to_ascii_lowercase), url.port_or_known_default())
}

fn default_max_connections() -> usize {
	2
}

fn default_backoff_increment() -> Duration {
	Duration::from_millis(1000)
}

fn default_max_backoff() -> Duration {
	Duration::from_millis(60_000)
}

fn default_max_network_delay() -> Duration {
	Duration::from_millis(10_000)
}

fn default_timeout() -> Duration {
	Duration::from_millis(60_000)
}

fn default_true() -> bool {
	true
}

mod millis {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(duration.as_millis() as u64)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}
