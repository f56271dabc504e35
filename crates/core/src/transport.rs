//! Transport abstraction.
//!
//! A transport moves envelopes of messages to the server and reports the
//! outcome. Transports never call back into the session: they push a
//! [`Delivery`] onto the [`TransportContext`], and the session processes
//! queued deliveries once the current call returns. I/O completions come in
//! through [`Transport::handle_event`] and timeouts through
//! [`Transport::handle_timer`].

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use bayeux_protocol::Message;

use crate::error::Result;
use crate::scheduler::{Scheduler, Timer, TimerId};

mod polling;
mod registry;
mod request;
mod websocket;

pub use polling::{CallbackPolling, HttpExchange, HttpRequest, LongPolling, MAX_URL_LENGTH, RequestStyle, callback_polling, long_polling};
pub use registry::TransportRegistry;
pub use request::{RequestSender, RequestTransport};
pub use websocket::{Socket, SocketFactory, WebSocketTransport, websocket_url};

pub const LONG_POLLING: &str = "long-polling";
pub const CALLBACK_POLLING: &str = "callback-polling";
pub const WEBSOCKET: &str = "websocket";

/// Messages bound for one URL, sent together.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
	pub url: String,
	pub messages: Vec<Message>,
}

/// Why a transmission failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
	/// Short machine-friendly reason: `timeout`, `abort`, `error`,
	/// `no response`, `bad response`, `can't open`, `closed`.
	pub reason: String,
	pub exception: Option<String>,
}

impl Failure {
	pub fn new(reason: impl Into<String>) -> Self {
		Self {
			reason: reason.into(),
			exception: None,
		}
	}

	pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
		self.exception = Some(exception.into());
		self
	}
}

impl std::fmt::Display for Failure {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match &self.exception {
			Some(exception) => write!(f, "{}: {exception}", self.reason),
			None => f.write_str(&self.reason),
		}
	}
}

/// Outcome of a transmission, queued for the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
	Messages(Vec<Message>),
	Failure { messages: Vec<Message>, failure: Failure },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
	Open,
	Frame(String),
	Close,
}

/// I/O completion routed back to the transport that started it.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
	/// An HTTP exchange finished with a response body or an error.
	Response {
		request: RequestId,
		result: std::result::Result<String, Failure>,
	},
	Socket { socket: SocketId, event: SocketEvent },
}

/// Session settings transports read on every send.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
	pub max_connections: usize,
	pub max_network_delay: Duration,
	/// Long-poll hold time advised by the server.
	pub long_poll_timeout: Duration,
	pub request_headers: BTreeMap<String, String>,
}

impl Default for TransportSettings {
	fn default() -> Self {
		Self {
			max_connections: 2,
			max_network_delay: Duration::from_millis(10_000),
			long_poll_timeout: Duration::from_millis(60_000),
			request_headers: BTreeMap::new(),
		}
	}
}

/// What a transport may touch while the session calls into it.
pub struct TransportContext<'a> {
	transport: &'a str,
	scheduler: &'a mut dyn Scheduler,
	deliveries: &'a mut VecDeque<Delivery>,
	settings: &'a TransportSettings,
}

impl<'a> TransportContext<'a> {
	pub fn new(
		transport: &'a str,
		scheduler: &'a mut dyn Scheduler,
		deliveries: &'a mut VecDeque<Delivery>,
		settings: &'a TransportSettings,
	) -> Self {
		Self {
			transport,
			scheduler,
			deliveries,
			settings,
		}
	}

	/// Type name the transport is registered under.
	pub fn transport_type(&self) -> &str {
		self.transport
	}

	pub fn settings(&self) -> &TransportSettings {
		self.settings
	}

	/// Schedules a timeout that comes back through `handle_timer(token)`.
	pub fn schedule(&mut self, delay: Duration, token: u64) -> TimerId {
		self.scheduler.schedule(
			delay,
			Timer::Transport {
				transport: self.transport.to_string(),
				token,
			},
		)
	}

	pub fn cancel(&mut self, timer: TimerId) {
		self.scheduler.cancel(timer);
	}

	pub fn deliver(&mut self, messages: Vec<Message>) {
		self.deliveries.push_back(Delivery::Messages(messages));
	}

	pub fn fail(&mut self, messages: Vec<Message>, failure: Failure) {
		self.deliveries.push_back(Delivery::Failure { messages, failure });
	}
}

pub trait Transport: Send {
	/// Whether this transport can talk Bayeux `version` to a server that is
	/// (or is not) cross-domain.
	fn accept(&self, version: &str, cross_domain: bool) -> bool;

	/// Transmits an envelope. Its outcome is delivered later through the
	/// context; only usage errors are returned here.
	fn send(&mut self, envelope: Envelope, long_poll: bool, ctx: &mut TransportContext<'_>) -> Result<()>;

	/// Cancels everything in flight, failing it with reason `abort`.
	fn abort(&mut self, ctx: &mut TransportContext<'_>);

	/// Returns to the freshly registered state.
	fn reset(&mut self);

	fn handle_event(&mut self, event: TransportEvent, ctx: &mut TransportContext<'_>) {
		let _ = (event, ctx);
	}

	fn handle_timer(&mut self, token: u64, ctx: &mut TransportContext<'_>) {
		let _ = (token, ctx);
	}

	fn registered(&mut self, transport_type: &str) {
		let _ = transport_type;
	}

	fn unregistered(&mut self) {}
}
