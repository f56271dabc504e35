//! WebSocket transport.
//!
//! One socket carries every message. Responses are matched to requests by
//! message id, so each outgoing message with an id gets its own timeout.
//! Envelopes sent while the socket is still opening are held and flushed
//! once it opens.

use std::collections::HashMap;

use bayeux_protocol::{Message, channel, codec};
use tracing::{debug, info, warn};

use super::{Envelope, Failure, SocketEvent, SocketId, Transport, TransportContext, TransportEvent};
use crate::error::{BoxError, Result};
use crate::scheduler::TimerId;

/// An open (or opening) socket.
pub trait Socket: Send {
	/// Queues a text frame. `false` when the socket can no longer send.
	fn send(&mut self, text: &str) -> bool;

	fn close(&mut self);
}

/// Opens sockets whose lifecycle comes back as
/// [`TransportEvent::Socket`](super::TransportEvent::Socket) events.
pub trait SocketFactory: Send {
	/// Whether WebSockets can be used at all in this environment.
	fn available(&self) -> bool {
		true
	}

	fn open(&mut self, socket: SocketId, url: &str) -> std::result::Result<Box<dyn Socket>, BoxError>;

	fn registered(&mut self, transport_type: &str) {
		let _ = transport_type;
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	Closed,
	Opening(SocketId),
	Open(SocketId),
}

struct PendingResponse {
	token: u64,
	timer: TimerId,
	delay_ms: u128,
	message: Message,
}

pub struct WebSocketTransport<F> {
	factory: F,
	transport_type: String,
	supported: bool,
	state: State,
	socket: Option<Box<dyn Socket>>,
	next_socket: u64,
	next_token: u64,
	/// Last ordinary and long-poll envelopes, failed if a frame arrives
	/// while the socket is not open.
	envelope: Option<Envelope>,
	long_poll_envelope: Option<Envelope>,
	/// Envelopes waiting for the socket to open.
	pending: Vec<(Envelope, bool)>,
	/// Messages awaiting a response, keyed by message id.
	responses: HashMap<String, PendingResponse>,
}

impl<F: SocketFactory> WebSocketTransport<F> {
	pub fn new(factory: F) -> Self {
		Self {
			factory,
			transport_type: String::new(),
			supported: true,
			state: State::Closed,
			socket: None,
			next_socket: 0,
			next_token: 0,
			envelope: None,
			long_poll_envelope: None,
			pending: Vec::new(),
			responses: HashMap::new(),
		}
	}

	pub fn factory(&self) -> &F {
		&self.factory
	}

	pub fn is_open(&self) -> bool {
		matches!(self.state, State::Open(_))
	}

	/// Messages still waiting for their response.
	pub fn awaiting_responses(&self) -> usize {
		self.responses.len()
	}

	fn open(&mut self, url: &str, envelope: Envelope, long_poll: bool, ctx: &mut TransportContext<'_>) {
		self.next_socket += 1;
		let id = SocketId(self.next_socket);
		let url = websocket_url(url);
		info!(target = "bayeux.transport", transport = %self.transport_type, %url, "opening websocket");
		match self.factory.open(id, &url) {
			Ok(socket) => {
				self.socket = Some(socket);
				self.state = State::Opening(id);
				self.pending.push((envelope, long_poll));
			}
			Err(err) => {
				warn!(target = "bayeux.transport", transport = %self.transport_type, %url, error = %err, "websocket could not be opened");
				self.supported = false;
				ctx.fail(envelope.messages, Failure::new("can't open").with_exception(err.to_string()));
			}
		}
	}

	fn transmit(&mut self, envelope: Envelope, long_poll: bool, ctx: &mut TransportContext<'_>) {
		let text = match codec::encode(&envelope.messages) {
			Ok(text) => text,
			Err(err) => {
				ctx.fail(envelope.messages, Failure::new("error").with_exception(err.to_string()));
				return;
			}
		};
		let sent = self.socket.as_mut().is_some_and(|socket| socket.send(&text));
		if !sent {
			ctx.fail(envelope.messages, Failure::new("error").with_exception("websocket send failed"));
			return;
		}
		debug!(target = "bayeux.transport", transport = %self.transport_type, long_poll, messages = envelope.messages.len(), "frame sent");

		let mut delay = ctx.settings().max_network_delay;
		if long_poll {
			delay += ctx.settings().long_poll_timeout;
		}
		for message in envelope.messages {
			let Some(id) = message.id.clone() else {
				continue;
			};
			self.next_token += 1;
			let token = self.next_token;
			let timer = ctx.schedule(delay, token);
			self.responses.insert(
				id,
				PendingResponse {
					token,
					timer,
					delay_ms: delay.as_millis(),
					message,
				},
			);
		}
	}

	fn on_open(&mut self, socket: SocketId, ctx: &mut TransportContext<'_>) {
		if self.state != State::Opening(socket) {
			debug!(target = "bayeux.transport", ?socket, "ignoring open of stale socket");
			return;
		}
		info!(target = "bayeux.transport", transport = %self.transport_type, "websocket open");
		self.state = State::Open(socket);
		for (envelope, long_poll) in std::mem::take(&mut self.pending) {
			self.transmit(envelope, long_poll, ctx);
		}
	}

	fn on_frame(&mut self, socket: SocketId, text: &str, ctx: &mut TransportContext<'_>) {
		if self.state != State::Open(socket) {
			let remembered = self.envelope.take().or_else(|| self.long_poll_envelope.take());
			if let Some(envelope) = remembered {
				ctx.fail(envelope.messages, Failure::new("closed"));
			}
			return;
		}

		let messages = match codec::decode(text) {
			Ok(messages) => messages,
			Err(err) => {
				warn!(target = "bayeux.transport", transport = %self.transport_type, error = %err, "malformed websocket frame dropped");
				return;
			}
		};

		let mut close = false;
		for message in &messages {
			if message.data.is_none() {
				if let Some(pending) = message.id.as_ref().and_then(|id| self.responses.remove(id)) {
					ctx.cancel(pending.timer);
				}
			}
			if message.channel == channel::DISCONNECT && message.is_successful() {
				close = true;
			}
		}
		if !messages.is_empty() {
			ctx.deliver(messages);
		}
		if close {
			debug!(target = "bayeux.transport", transport = %self.transport_type, "disconnected, closing websocket");
			if let Some(socket) = self.socket.as_mut() {
				socket.close();
			}
		}
	}

	fn on_close(&mut self, socket: SocketId, ctx: &mut TransportContext<'_>) {
		match self.state {
			State::Opening(id) if id == socket => {
				warn!(target = "bayeux.transport", transport = %self.transport_type, "websocket closed before opening, transport disabled");
				self.supported = false;
				self.state = State::Closed;
				self.socket = None;
				for (envelope, _) in std::mem::take(&mut self.pending) {
					ctx.fail(envelope.messages, Failure::new("can't open"));
				}
			}
			State::Open(id) if id == socket => {
				info!(target = "bayeux.transport", transport = %self.transport_type, "websocket closed");
				self.state = State::Closed;
				self.socket = None;
				for (_, pending) in self.responses.drain() {
					ctx.cancel(pending.timer);
				}
			}
			_ => debug!(target = "bayeux.transport", ?socket, "ignoring close of stale socket"),
		}
	}
}

impl<F: SocketFactory> Transport for WebSocketTransport<F> {
	fn accept(&self, _version: &str, _cross_domain: bool) -> bool {
		self.supported && self.factory.available()
	}

	fn send(&mut self, envelope: Envelope, long_poll: bool, ctx: &mut TransportContext<'_>) -> Result<()> {
		if long_poll {
			self.long_poll_envelope = Some(envelope.clone());
		} else {
			self.envelope = Some(envelope.clone());
		}
		match self.state {
			State::Open(_) => self.transmit(envelope, long_poll, ctx),
			State::Opening(_) => self.pending.push((envelope, long_poll)),
			State::Closed => {
				let url = envelope.url.clone();
				self.open(&url, envelope, long_poll, ctx);
			}
		}
		Ok(())
	}

	fn abort(&mut self, ctx: &mut TransportContext<'_>) {
		for (_, pending) in self.responses.drain() {
			ctx.cancel(pending.timer);
			ctx.fail(vec![pending.message], Failure::new("abort"));
		}
		for (envelope, _) in self.pending.drain(..) {
			ctx.fail(envelope.messages, Failure::new("abort"));
		}
		self.reset();
	}

	fn reset(&mut self) {
		if let Some(mut socket) = self.socket.take() {
			socket.close();
		}
		self.supported = true;
		self.state = State::Closed;
		self.envelope = None;
		self.long_poll_envelope = None;
		self.pending.clear();
		self.responses.clear();
	}

	fn handle_event(&mut self, event: TransportEvent, ctx: &mut TransportContext<'_>) {
		match event {
			TransportEvent::Socket { socket, event } => match event {
				SocketEvent::Open => self.on_open(socket, ctx),
				SocketEvent::Frame(text) => self.on_frame(socket, &text, ctx),
				SocketEvent::Close => self.on_close(socket, ctx),
			},
			other => debug!(target = "bayeux.transport", transport = %self.transport_type, event = ?other, "unexpected event"),
		}
	}

	fn handle_timer(&mut self, token: u64, ctx: &mut TransportContext<'_>) {
		let Some(id) = self
			.responses
			.iter()
			.find(|(_, pending)| pending.token == token)
			.map(|(id, _)| id.clone())
		else {
			return;
		};
		let Some(pending) = self.responses.remove(&id) else {
			return;
		};
		let exception = format!("Message {id} of transport {} exceeded {} ms max network delay", self.transport_type, pending.delay_ms);
		debug!(target = "bayeux.transport", transport = %self.transport_type, message = %id, "response timed out");
		ctx.fail(vec![pending.message], Failure::new("timeout").with_exception(exception));
	}

	fn registered(&mut self, transport_type: &str) {
		self.transport_type = transport_type.to_string();
		self.factory.registered(transport_type);
	}
}

/// Rewrites an `http(s)` endpoint to the matching `ws(s)` one.
pub fn websocket_url(url: &str) -> String {
	match url.strip_prefix("http") {
		Some(rest) => format!("ws{rest}"),
		None => url.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use std::collections::VecDeque;
	use std::time::Duration;

	use serde_json::json;

	use super::*;
	use crate::scheduler::Timer;
	use crate::testing::{FakeSockets, ManualScheduler, SchedulerProbe, SocketProbe};
	use crate::transport::{Delivery, TransportSettings};

	struct Harness {
		transport: WebSocketTransport<FakeSockets>,
		sockets: SocketProbe,
		scheduler: ManualScheduler,
		timers: SchedulerProbe,
		deliveries: VecDeque<Delivery>,
		settings: TransportSettings,
	}

	impl Harness {
		fn new() -> Self {
			let (factory, sockets) = FakeSockets::new();
			let (scheduler, timers) = ManualScheduler::new();
			let mut transport = WebSocketTransport::new(factory);
			transport.registered("websocket");
			Self {
				transport,
				sockets,
				scheduler,
				timers,
				deliveries: VecDeque::new(),
				settings: TransportSettings {
					max_network_delay: Duration::from_millis(100),
					long_poll_timeout: Duration::from_millis(1000),
					..Default::default()
				},
			}
		}

		fn with<R>(&mut self, f: impl FnOnce(&mut WebSocketTransport<FakeSockets>, &mut TransportContext<'_>) -> R) -> R {
			let mut ctx = TransportContext::new("websocket", &mut self.scheduler, &mut self.deliveries, &self.settings);
			f(&mut self.transport, &mut ctx)
		}

		fn send(&mut self, id: &str, channel: &str, long_poll: bool) {
			let mut message = Message::new(channel);
			message.id = Some(id.to_string());
			let envelope = Envelope {
				url: "http://localhost:8080/cometd/".into(),
				messages: vec![message],
			};
			self.with(|transport, ctx| transport.send(envelope, long_poll, ctx)).unwrap();
		}

		fn event(&mut self, socket: u64, event: SocketEvent) {
			let event = TransportEvent::Socket {
				socket: SocketId(socket),
				event,
			};
			self.with(|transport, ctx| transport.handle_event(event, ctx));
		}

		fn failures(&mut self) -> Vec<(String, String)> {
			self.deliveries
				.drain(..)
				.filter_map(|delivery| match delivery {
					Delivery::Failure { messages, failure } => Some((messages[0].channel.clone(), failure.reason)),
					Delivery::Messages(_) => None,
				})
				.collect()
		}
	}

	#[test]
	fn url_scheme_is_rewritten() {
		assert_eq!(websocket_url("http://localhost/cometd"), "ws://localhost/cometd");
		assert_eq!(websocket_url("https://example.com/cometd"), "wss://example.com/cometd");
		assert_eq!(websocket_url("ws://already"), "ws://already");
	}

	#[test]
	fn envelopes_wait_for_open_then_flush_in_order() {
		let mut harness = Harness::new();
		harness.send("1", "/meta/handshake", false);
		harness.send("2", "/chat", false);

		assert_eq!(harness.sockets.opened(), vec![(SocketId(1), "ws://localhost:8080/cometd/".to_string())]);
		assert!(harness.sockets.frames(1).is_empty());

		harness.event(1, SocketEvent::Open);
		let frames = harness.sockets.frames(1);
		assert_eq!(frames.len(), 2);
		assert!(frames[0].contains("/meta/handshake"));
		assert!(frames[1].contains("/chat"));
		assert_eq!(harness.transport.awaiting_responses(), 2);
	}

	#[test]
	fn responses_cancel_only_their_own_timeout() {
		let mut harness = Harness::new();
		harness.send("1", "/meta/handshake", false);
		harness.event(1, SocketEvent::Open);
		harness.send("2", "/meta/connect", true);

		let delays: Vec<_> = harness.timers.pending().into_iter().map(|timer| timer.delay).collect();
		assert_eq!(delays, vec![Duration::from_millis(100), Duration::from_millis(1100)]);

		let reply = json!([{"channel": "/meta/handshake", "id": "1", "successful": true}]).to_string();
		harness.event(1, SocketEvent::Frame(reply));
		assert_eq!(harness.transport.awaiting_responses(), 1);
		assert_eq!(harness.timers.pending().len(), 1);
		assert!(matches!(harness.deliveries.pop_front(), Some(Delivery::Messages(messages)) if messages[0].channel == "/meta/handshake"));
	}

	#[test]
	fn expired_message_fails_alone() {
		let mut harness = Harness::new();
		harness.send("1", "/meta/handshake", false);
		harness.event(1, SocketEvent::Open);
		harness.send("2", "/chat", false);

		let timer = harness.timers.take_next().unwrap();
		let Timer::Transport { token, .. } = timer.timer else {
			panic!("expected a transport timer");
		};
		harness.with(|transport, ctx| transport.handle_timer(token, ctx));

		assert_eq!(harness.failures(), vec![("/meta/handshake".to_string(), "timeout".to_string())]);
		assert_eq!(harness.transport.awaiting_responses(), 1);
		assert!(harness.transport.is_open());
	}

	#[test]
	fn close_before_open_disables_the_transport() {
		let mut harness = Harness::new();
		harness.send("1", "/meta/handshake", false);
		harness.event(1, SocketEvent::Close);

		assert_eq!(harness.failures(), vec![("/meta/handshake".to_string(), "can't open".to_string())]);
		assert!(!harness.transport.accept("1.0", false));

		harness.transport.reset();
		assert!(harness.transport.accept("1.0", false));
	}

	#[test]
	fn refused_open_disables_the_transport() {
		let mut harness = Harness::new();
		harness.sockets.refuse_next();
		harness.send("1", "/meta/handshake", false);
		assert_eq!(harness.failures(), vec![("/meta/handshake".to_string(), "can't open".to_string())]);
		assert!(!harness.transport.accept("1.0", false));
	}

	#[test]
	fn close_after_open_clears_timeouts_without_failing() {
		let mut harness = Harness::new();
		harness.send("1", "/meta/connect", true);
		harness.event(1, SocketEvent::Open);
		harness.event(1, SocketEvent::Close);

		assert!(harness.failures().is_empty());
		assert!(harness.timers.pending().is_empty());
		assert!(!harness.transport.is_open());

		// The next send opens a fresh socket.
		harness.send("2", "/meta/connect", true);
		assert_eq!(harness.sockets.opened().len(), 2);
	}

	#[test]
	fn frame_on_closed_socket_fails_remembered_envelope() {
		let mut harness = Harness::new();
		harness.send("1", "/chat", false);
		harness.event(1, SocketEvent::Open);
		harness.event(1, SocketEvent::Close);
		harness.event(1, SocketEvent::Frame("[]".into()));
		assert_eq!(harness.failures(), vec![("/chat".to_string(), "closed".to_string())]);
	}

	#[test]
	fn successful_disconnect_closes_the_socket() {
		let mut harness = Harness::new();
		harness.send("1", "/meta/disconnect", false);
		harness.event(1, SocketEvent::Open);
		let reply = json!([{"channel": "/meta/disconnect", "id": "1", "successful": true}]).to_string();
		harness.event(1, SocketEvent::Frame(reply));
		assert!(harness.sockets.closed(1));
	}

	#[test]
	fn abort_fails_outstanding_messages() {
		let mut harness = Harness::new();
		harness.send("1", "/meta/connect", true);
		harness.event(1, SocketEvent::Open);
		harness.send("2", "/chat", false);

		harness.with(|transport, ctx| transport.abort(ctx));
		let mut failures = harness.failures();
		failures.sort();
		assert_eq!(
			failures,
			vec![("/chat".to_string(), "abort".to_string()), ("/meta/connect".to_string(), "abort".to_string())]
		);
		assert!(harness.sockets.closed(1));
		assert!(harness.timers.pending().is_empty());
	}
}
