use tracing::debug;

use super::Transport;

/// Ordered collection of transports keyed by type name. Order is priority:
/// earlier entries win negotiation.
#[derive(Default)]
pub struct TransportRegistry {
	entries: Vec<(String, Box<dyn Transport>)>,
}

impl TransportRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts a transport at `index` (appended when `None` or past the
	/// end). Fails if the type name is taken.
	pub fn add(&mut self, transport_type: &str, transport: Box<dyn Transport>, index: Option<usize>) -> bool {
		if self.contains(transport_type) {
			return false;
		}
		let index = index.unwrap_or(self.entries.len()).min(self.entries.len());
		self.entries.insert(index, (transport_type.to_string(), transport));
		true
	}

	pub fn remove(&mut self, transport_type: &str) -> Option<Box<dyn Transport>> {
		let index = self.entries.iter().position(|(name, _)| name == transport_type)?;
		Some(self.entries.remove(index).1)
	}

	pub fn contains(&self, transport_type: &str) -> bool {
		self.entries.iter().any(|(name, _)| name == transport_type)
	}

	pub fn get_mut(&mut self, transport_type: &str) -> Option<&mut (dyn Transport + 'static)> {
		self.entries
			.iter_mut()
			.find(|(name, _)| name == transport_type)
			.map(|(_, transport)| transport.as_mut())
	}

	pub fn types(&self) -> Vec<String> {
		self.entries.iter().map(|(name, _)| name.clone()).collect()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Types that accept `version` and `cross_domain`, in priority order.
	pub fn find_acceptable(&self, version: &str, cross_domain: bool) -> Vec<String> {
		self.entries
			.iter()
			.filter(|(_, transport)| transport.accept(version, cross_domain))
			.map(|(name, _)| name.clone())
			.collect()
	}

	/// First registered transport whose type the peer listed and which
	/// accepts `version` and `cross_domain`.
	pub fn negotiate(&self, peer_types: &[String], version: &str, cross_domain: bool) -> Option<String> {
		let negotiated = self
			.entries
			.iter()
			.find(|(name, transport)| peer_types.contains(name) && transport.accept(version, cross_domain))
			.map(|(name, _)| name.clone());
		debug!(target = "bayeux.transport", ?peer_types, version, cross_domain, ?negotiated, "negotiated transport");
		negotiated
	}

	pub fn reset(&mut self) {
		for (_, transport) in &mut self.entries {
			transport.reset();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::Result;
	use crate::transport::{Envelope, TransportContext};

	struct Stub {
		cross_domain: bool,
	}

	impl Stub {
		fn boxed(cross_domain: bool) -> Box<dyn Transport> {
			Box::new(Stub { cross_domain })
		}
	}

	impl Transport for Stub {
		fn accept(&self, version: &str, cross_domain: bool) -> bool {
			version == "1.0" && (self.cross_domain || !cross_domain)
		}

		fn send(&mut self, _envelope: Envelope, _long_poll: bool, _ctx: &mut TransportContext<'_>) -> Result<()> {
			Ok(())
		}

		fn abort(&mut self, _ctx: &mut TransportContext<'_>) {}

		fn reset(&mut self) {}
	}

	fn types(names: &[&str]) -> Vec<String> {
		names.iter().map(|name| name.to_string()).collect()
	}

	#[test]
	fn insertion_respects_index_and_refuses_duplicates() {
		let mut registry = TransportRegistry::new();
		assert!(registry.add("long-polling", Stub::boxed(false), None));
		assert!(registry.add("websocket", Stub::boxed(true), Some(0)));
		assert!(registry.add("callback-polling", Stub::boxed(true), Some(99)));
		assert!(!registry.add("websocket", Stub::boxed(true), None));

		assert_eq!(registry.types(), types(&["websocket", "long-polling", "callback-polling"]));
	}

	#[test]
	fn negotiation_prefers_registration_order() {
		let mut registry = TransportRegistry::new();
		registry.add("websocket", Stub::boxed(true), None);
		registry.add("long-polling", Stub::boxed(false), None);
		registry.add("callback-polling", Stub::boxed(true), None);

		let server = types(&["callback-polling", "long-polling"]);
		assert_eq!(registry.negotiate(&server, "1.0", false).as_deref(), Some("long-polling"));
		assert_eq!(registry.negotiate(&server, "1.0", true).as_deref(), Some("callback-polling"));
		assert_eq!(registry.negotiate(&server, "2.0", false), None);
		assert_eq!(registry.negotiate(&types(&["iframe"]), "1.0", false), None);
	}

	#[test]
	fn acceptable_types_filter_on_cross_domain() {
		let mut registry = TransportRegistry::new();
		registry.add("long-polling", Stub::boxed(false), None);
		registry.add("callback-polling", Stub::boxed(true), None);

		assert_eq!(registry.find_acceptable("1.0", false), types(&["long-polling", "callback-polling"]));
		assert_eq!(registry.find_acceptable("1.0", true), types(&["callback-polling"]));
	}

	#[test]
	fn removal_returns_the_transport() {
		let mut registry = TransportRegistry::new();
		registry.add("long-polling", Stub::boxed(false), None);
		assert!(registry.remove("long-polling").is_some());
		assert!(registry.remove("long-polling").is_none());
		assert!(registry.is_empty());
	}
}
