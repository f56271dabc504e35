//! JSON framing for message batches.
//!
//! Requests always carry a JSON array. Responses may be an array, a single
//! message object, or empty.

use serde::de::Error as _;
use serde_json::Value;

use crate::message::Message;

/// Decodes a response body into messages. Blank input yields no messages.
pub fn decode(text: &str) -> serde_json::Result<Vec<Message>> {
	if text.trim().is_empty() {
		return Ok(Vec::new());
	}
	decode_value(serde_json::from_str(text)?)
}

pub fn decode_value(value: Value) -> serde_json::Result<Vec<Message>> {
	match value {
		Value::Null => Ok(Vec::new()),
		Value::Array(_) => serde_json::from_value(value),
		Value::Object(_) => Ok(vec![serde_json::from_value(value)?]),
		other => Err(serde_json::Error::custom(format!("expected a message or an array of messages, got {other}"))),
	}
}

pub fn encode(messages: &[Message]) -> serde_json::Result<String> {
	serde_json::to_string(messages)
}
