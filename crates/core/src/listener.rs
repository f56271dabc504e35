//! Channel listener and subscription registry.
//!
//! Registrations are grouped by channel and ordered by a monotonically
//! increasing handle id, so notification order is registration order and a
//! handle stays valid no matter what else is removed.

use std::collections::{BTreeMap, HashMap};

use bayeux_protocol::Message;

use crate::error::BoxError;
use crate::session::Session;

/// Outcome of a listener callback. Errors are logged and never abort
/// notification of the remaining listeners.
pub type ListenerResult = std::result::Result<(), BoxError>;

/// Callback stored by the session for a listener or subscription.
pub type Callback = Box<dyn FnMut(&mut Session, &Message) -> ListenerResult + Send>;

/// Opaque handle returned by `add_listener` and `subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
	channel: String,
	id: u64,
}

impl ListenerHandle {
	pub fn channel(&self) -> &str {
		&self.channel
	}

	pub fn id(&self) -> u64 {
		self.id
	}
}

#[derive(Debug)]
struct Registration<L> {
	subscription: bool,
	/// `None` while the callback is lent out for invocation.
	callback: Option<L>,
}

#[derive(Debug)]
pub struct ListenerRegistry<L> {
	channels: HashMap<String, BTreeMap<u64, Registration<L>>>,
	next_id: u64,
}

impl<L> Default for ListenerRegistry<L> {
	fn default() -> Self {
		Self::new()
	}
}

impl<L> ListenerRegistry<L> {
	pub fn new() -> Self {
		Self {
			channels: HashMap::new(),
			next_id: 0,
		}
	}

	pub fn add(&mut self, channel: &str, callback: L, subscription: bool) -> ListenerHandle {
		self.next_id += 1;
		let id = self.next_id;
		self.channels.entry(channel.to_string()).or_default().insert(
			id,
			Registration {
				subscription,
				callback: Some(callback),
			},
		);
		ListenerHandle {
			channel: channel.to_string(),
			id,
		}
	}

	/// Removes a registration. Returns `false` for stale handles.
	pub fn remove(&mut self, handle: &ListenerHandle) -> bool {
		let Some(registrations) = self.channels.get_mut(&handle.channel) else {
			return false;
		};
		let removed = registrations.remove(&handle.id).is_some();
		if registrations.is_empty() {
			self.channels.remove(&handle.channel);
		}
		removed
	}

	pub fn clear(&mut self) {
		self.channels.clear();
	}

	/// Drops every subscription, keeping plain listeners. Returns how many
	/// were removed.
	pub fn clear_subscriptions(&mut self) -> usize {
		let mut removed = 0;
		self.channels.retain(|_, registrations| {
			let before = registrations.len();
			registrations.retain(|_, registration| !registration.subscription);
			removed += before - registrations.len();
			!registrations.is_empty()
		});
		removed
	}

	/// Whether any listener or subscription is registered on exactly `channel`.
	pub fn has_registrations(&self, channel: &str) -> bool {
		self.channels.get(channel).is_some_and(|registrations| !registrations.is_empty())
	}

	pub fn len(&self) -> usize {
		self.channels.values().map(BTreeMap::len).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.channels.is_empty()
	}

	/// Handles to notify for a message on `channel`: exact registrations
	/// first, then the matching wildcards from the deepest to the root.
	pub fn dispatch_order(&self, channel: &str) -> Vec<ListenerHandle> {
		dispatch_channels(channel)
			.into_iter()
			.filter_map(|name| self.channels.get_key_value(&name))
			.flat_map(|(name, registrations)| {
				registrations.keys().map(move |&id| ListenerHandle {
					channel: name.clone(),
					id,
				})
			})
			.collect()
	}

	/// Lends a callback out for invocation. The registration stays in place
	/// so concurrent presence checks still see it.
	pub fn take(&mut self, handle: &ListenerHandle) -> Option<L> {
		self.channels
			.get_mut(&handle.channel)?
			.get_mut(&handle.id)?
			.callback
			.take()
	}

	/// Returns a lent callback. Dropped if the registration was removed
	/// while the callback ran.
	pub fn restore(&mut self, handle: &ListenerHandle, callback: L) -> bool {
		match self.channels.get_mut(&handle.channel).and_then(|r| r.get_mut(&handle.id)) {
			Some(registration) => {
				registration.callback = Some(callback);
				true
			}
			None => false,
		}
	}
}

/// Channels whose listeners see a message published on `channel`.
///
/// For `/foo/bar/baz` that is `/foo/bar/baz`, `/foo/bar/*`, `/foo/bar/**`,
/// `/foo/**` and `/**`: a single-segment wildcard only matches at the
/// deepest level.
pub fn dispatch_channels(channel: &str) -> Vec<String> {
	let mut channels = vec![channel.to_string()];
	let segments: Vec<&str> = channel.split('/').collect();
	let last = segments.len() - 1;
	for index in (1..=last).rev() {
		let prefix = segments[..index].join("/");
		if index == last {
			channels.push(format!("{prefix}/*"));
		}
		channels.push(format!("{prefix}/**"));
	}
	channels
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn wildcard_expansion() {
		assert_eq!(
			dispatch_channels("/foo/bar/baz"),
			vec!["/foo/bar/baz", "/foo/bar/*", "/foo/bar/**", "/foo/**", "/**"]
		);
		assert_eq!(dispatch_channels("/foo"), vec!["/foo", "/*", "/**"]);
	}

	#[test]
	fn dispatch_order_is_exact_then_deepest_wildcard() {
		let mut registry = ListenerRegistry::new();
		let root = registry.add("/**", "root", false);
		let deep = registry.add("/foo/**", "deep", false);
		let star = registry.add("/foo/*", "star", false);
		let exact_a = registry.add("/foo/bar", "a", false);
		let exact_b = registry.add("/foo/bar", "b", true);
		registry.add("/foo/bar/baz", "unrelated", false);

		assert_eq!(registry.dispatch_order("/foo/bar"), vec![exact_a, exact_b, star, deep, root]);
	}

	#[test]
	fn handles_survive_unrelated_removals() {
		let mut registry = ListenerRegistry::new();
		let first = registry.add("/chat", 1, true);
		let second = registry.add("/chat", 2, true);

		assert!(registry.remove(&first));
		assert!(!registry.remove(&first));
		assert!(registry.has_registrations("/chat"));
		assert_eq!(registry.dispatch_order("/chat"), vec![second.clone()]);

		assert!(registry.remove(&second));
		assert!(!registry.has_registrations("/chat"));
		assert!(registry.is_empty());
	}

	#[test]
	fn clearing_subscriptions_keeps_listeners() {
		let mut registry = ListenerRegistry::new();
		registry.add("/chat", "sub", true);
		let listener = registry.add("/chat", "listener", false);
		registry.add("/news", "sub", true);

		assert_eq!(registry.clear_subscriptions(), 2);
		assert_eq!(registry.len(), 1);
		assert!(!registry.has_registrations("/news"));
		assert_eq!(registry.dispatch_order("/chat"), vec![listener]);
	}

	#[test]
	fn lent_callbacks_count_as_registered() {
		let mut registry = ListenerRegistry::new();
		let handle = registry.add("/chat", 7, false);

		assert_eq!(registry.take(&handle), Some(7));
		assert!(registry.has_registrations("/chat"));
		assert_eq!(registry.take(&handle), None);
		assert!(registry.restore(&handle, 7));

		assert!(registry.remove(&handle));
		assert!(!registry.restore(&handle, 7));
	}
}
