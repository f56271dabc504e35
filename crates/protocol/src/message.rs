use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::advice::Advice;
use crate::channel;

/// Extra properties merged into an outgoing message (handshake props,
/// subscribe props and so on).
pub type Props = Map<String, Value>;

/// Field names owned by the protocol. Application properties never
/// overwrite them.
pub const RESERVED_FIELDS: &[&str] = &[
	"channel",
	"id",
	"clientId",
	"data",
	"successful",
	"advice",
	"subscription",
	"version",
	"minimumVersion",
	"supportedConnectionTypes",
	"connectionType",
	"error",
];

/// A single Bayeux message.
///
/// Recognized fields are typed; everything else (`ext`, server-specific
/// fields, the client-side `failure`/`request` markers) lands in `fields`.
///
/// ```json
/// {
///   "channel": "/meta/handshake",
///   "id": "1",
///   "successful": true,
///   "clientId": "2bgs7zpwokmf1pxbs1",
///   "supportedConnectionTypes": ["long-polling", "callback-polling"],
///   "advice": { "reconnect": "retry", "interval": 0, "timeout": 30000 }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
	pub channel: String,
	/// Correlation id, assigned by the client right before transmission.
	#[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_id")]
	pub id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
	/// Present only on responses.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub successful: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub advice: Option<Advice>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub subscription: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub minimum_version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub supported_connection_types: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub connection_type: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(flatten)]
	pub fields: Map<String, Value>,
}

impl Message {
	pub fn new(channel: impl Into<String>) -> Self {
		Self {
			channel: channel.into(),
			..Default::default()
		}
	}

	/// Application message carrying `data`.
	pub fn publish(channel: impl Into<String>, data: Value) -> Self {
		Self {
			channel: channel.into(),
			data: Some(data),
			..Default::default()
		}
	}

	/// Builds a `/meta/subscribe` or `/meta/unsubscribe` request.
	pub fn subscription(meta_channel: &str, subscription: impl Into<String>) -> Self {
		Self {
			channel: meta_channel.to_string(),
			subscription: Some(subscription.into()),
			..Default::default()
		}
	}

	pub fn is_meta(&self) -> bool {
		channel::is_meta(&self.channel)
	}

	/// `true` only for responses that explicitly report success.
	pub fn is_successful(&self) -> bool {
		self.successful == Some(true)
	}

	/// `true` for synthetic messages built from a transport failure.
	pub fn is_failure(&self) -> bool {
		self.fields.get("failure").and_then(Value::as_bool).unwrap_or(false)
	}

	/// Returns an unrecognized field by name.
	pub fn field(&self, name: &str) -> Option<&Value> {
		self.fields.get(name)
	}

	pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
		self.fields.insert(name.into(), value);
	}

	/// Merges application properties into this message.
	///
	/// Reserved protocol fields are skipped, so properties can add `ext` or
	/// custom fields but can never change the channel, id or payload.
	pub fn merge_props(&mut self, props: &Props) {
		for (name, value) in props {
			if RESERVED_FIELDS.contains(&name.as_str()) {
				continue;
			}
			self.fields.insert(name.clone(), value.clone());
		}
	}

	pub fn with_props(mut self, props: &Props) -> Self {
		self.merge_props(props);
		self
	}
}

/// Servers echo ids either as strings or numbers; both become strings.
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Id {
		Text(String),
		Number(serde_json::Number),
	}

	Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
		Id::Text(text) => text,
		Id::Number(number) => number.to_string(),
	}))
}
