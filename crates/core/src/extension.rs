//! Message extension pipeline.
//!
//! Extensions see every outgoing message after the session has stamped its
//! id and client id, and every incoming message before any other
//! processing. Each may pass the message on, replace it, or drop it.

use bayeux_protocol::Message;
use tracing::{debug, info};

use crate::error::BoxError;

/// What an extension did with a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Filtered {
	Keep,
	Replace(Message),
	/// Stop processing; the message is neither sent nor dispatched.
	Drop,
}

pub type FilterResult = std::result::Result<Filtered, BoxError>;

pub trait Extension: Send {
	fn incoming(&mut self, message: &Message) -> FilterResult {
		let _ = message;
		Ok(Filtered::Keep)
	}

	fn outgoing(&mut self, message: &Message) -> FilterResult {
		let _ = message;
		Ok(Filtered::Keep)
	}

	fn registered(&mut self, name: &str) {
		let _ = name;
	}

	fn unregistered(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
	Incoming,
	Outgoing,
}

struct Entry {
	name: String,
	extension: Box<dyn Extension>,
}

pub struct ExtensionPipeline {
	entries: Vec<Entry>,
	reverse_incoming: bool,
}

impl ExtensionPipeline {
	pub fn new(reverse_incoming: bool) -> Self {
		Self {
			entries: Vec::new(),
			reverse_incoming,
		}
	}

	pub fn set_reverse_incoming(&mut self, reverse: bool) {
		self.reverse_incoming = reverse;
	}

	/// Appends an extension. A name already in use is refused.
	pub fn register(&mut self, name: &str, mut extension: Box<dyn Extension>) -> bool {
		if self.contains(name) {
			info!(target = "bayeux.extension", extension = name, "Could not register extension: name already registered");
			return false;
		}
		extension.registered(name);
		self.entries.push(Entry {
			name: name.to_string(),
			extension,
		});
		debug!(target = "bayeux.extension", extension = name, "registered");
		true
	}

	pub fn unregister(&mut self, name: &str) -> bool {
		let Some(index) = self.entries.iter().position(|entry| entry.name == name) else {
			return false;
		};
		let mut entry = self.entries.remove(index);
		entry.extension.unregistered();
		debug!(target = "bayeux.extension", extension = name, "unregistered");
		true
	}

	pub fn contains(&self, name: &str) -> bool {
		self.entries.iter().any(|entry| entry.name == name)
	}

	pub fn names(&self) -> Vec<&str> {
		self.entries.iter().map(|entry| entry.name.as_str()).collect()
	}

	/// Runs outgoing extensions in registration order.
	pub fn outgoing(&mut self, mut message: Message) -> Option<Message> {
		for entry in &mut self.entries {
			message = apply(entry, Direction::Outgoing, message)?;
		}
		Some(message)
	}

	/// Runs incoming extensions, in reverse registration order unless
	/// configured otherwise.
	pub fn incoming(&mut self, mut message: Message) -> Option<Message> {
		let len = self.entries.len();
		for step in 0..len {
			let index = if self.reverse_incoming { len - 1 - step } else { step };
			message = apply(&mut self.entries[index], Direction::Incoming, message)?;
		}
		Some(message)
	}
}

fn apply(entry: &mut Entry, direction: Direction, message: Message) -> Option<Message> {
	let result = match direction {
		Direction::Incoming => entry.extension.incoming(&message),
		Direction::Outgoing => entry.extension.outgoing(&message),
	};
	match result {
		Ok(Filtered::Keep) => Some(message),
		Ok(Filtered::Replace(replacement)) => Some(replacement),
		Ok(Filtered::Drop) => {
			debug!(target = "bayeux.extension", extension = %entry.name, ?direction, channel = %message.channel, "message dropped");
			None
		}
		Err(err) => {
			debug!(target = "bayeux.extension", extension = %entry.name, ?direction, error = %err, "extension failed, message passed on unchanged");
			Some(message)
		}
	}
}
