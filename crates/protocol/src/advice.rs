use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reconnect policy carried by server advice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reconnect {
	/// Re-issue the connect (long-poll) after `interval`.
	#[default]
	Retry,
	/// Discard the client id and handshake again.
	Handshake,
	/// Do not reconnect.
	None,
}

impl Reconnect {
	pub fn as_str(self) -> &'static str {
		match self {
			Reconnect::Retry => "retry",
			Reconnect::Handshake => "handshake",
			Reconnect::None => "none",
		}
	}
}

impl std::fmt::Display for Reconnect {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Server-supplied guidance on reconnection.
///
/// Every field is optional: a server only sends the fields it wants to
/// change, and the receiver keeps its previous value for the others.
///
/// ```json
/// { "reconnect": "retry", "interval": 0, "timeout": 30000 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Advice {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reconnect: Option<Reconnect>,
	/// Milliseconds to wait before the next connect.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub interval: Option<u64>,
	/// Milliseconds the server may hold a long-poll open.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub timeout: Option<u64>,
	#[serde(flatten)]
	pub fields: Map<String, Value>,
}

impl Advice {
	pub fn retry(interval: u64) -> Self {
		Self {
			reconnect: Some(Reconnect::Retry),
			interval: Some(interval),
			..Default::default()
		}
	}

	pub fn none() -> Self {
		Self {
			reconnect: Some(Reconnect::None),
			interval: Some(0),
			..Default::default()
		}
	}
}
