//! In-memory doubles for driving a [`Session`] without a network or clock.
//!
//! # Example
//!
//! ```ignore
//! let (scheduler, timers) = ManualScheduler::new();
//! let mut session = Session::new(Config::new("http://localhost/cometd"), scheduler)?;
//! let (transport, controller) = FakeTransportBuilder::new().build();
//! session.register_transport("long-polling", Box::new(transport), None);
//!
//! session.handshake()?;
//! let sent = controller.take_sent();
//! controller.respond(&mut session, sent[0].request, json!([{
//!     "channel": "/meta/handshake", "successful": true, "clientId": "c1",
//!     "supportedConnectionTypes": ["long-polling"]
//! }]));
//! timers.fire_session(&mut session);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bayeux_protocol::{Message, codec};
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{BoxError, Result};
use crate::scheduler::{Scheduler, Timer, TimerId};
use crate::session::Session;
use crate::transport::{Envelope, Failure, HttpExchange, HttpRequest, RequestId, Socket, SocketFactory, SocketId, Transport, TransportContext, TransportEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTimer {
	pub id: TimerId,
	pub delay: Duration,
	pub timer: Timer,
}

#[derive(Default)]
struct SchedulerState {
	next_id: u64,
	pending: Vec<ScheduledTimer>,
	history: Vec<ScheduledTimer>,
	cancelled: Vec<TimerId>,
}

/// Scheduler that only records. Timers fire when a test says so.
pub struct ManualScheduler {
	state: Arc<Mutex<SchedulerState>>,
}

/// Test-side view of a [`ManualScheduler`].
#[derive(Clone)]
pub struct SchedulerProbe {
	state: Arc<Mutex<SchedulerState>>,
}

impl ManualScheduler {
	pub fn new() -> (Self, SchedulerProbe) {
		let state = Arc::new(Mutex::new(SchedulerState::default()));
		(Self { state: state.clone() }, SchedulerProbe { state })
	}
}

impl Scheduler for ManualScheduler {
	fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerId {
		let mut state = self.state.lock();
		state.next_id += 1;
		let scheduled = ScheduledTimer {
			id: TimerId(state.next_id),
			delay,
			timer,
		};
		state.pending.push(scheduled.clone());
		state.history.push(scheduled.clone());
		scheduled.id
	}

	fn cancel(&mut self, id: TimerId) {
		let mut state = self.state.lock();
		let before = state.pending.len();
		state.pending.retain(|timer| timer.id != id);
		if state.pending.len() != before {
			state.cancelled.push(id);
		}
	}
}

impl SchedulerProbe {
	/// Timers scheduled and neither fired nor cancelled, oldest first.
	pub fn pending(&self) -> Vec<ScheduledTimer> {
		self.state.lock().pending.clone()
	}

	/// Every timer ever scheduled.
	pub fn history(&self) -> Vec<ScheduledTimer> {
		self.state.lock().history.clone()
	}

	pub fn cancelled(&self) -> Vec<TimerId> {
		self.state.lock().cancelled.clone()
	}

	/// Delays of every session retry ever scheduled, in order.
	pub fn session_delays(&self) -> Vec<Duration> {
		self.state
			.lock()
			.history
			.iter()
			.filter(|timer| timer.timer == Timer::Session)
			.map(|timer| timer.delay)
			.collect()
	}

	/// Removes and returns the oldest pending timer.
	pub fn take_next(&self) -> Option<ScheduledTimer> {
		let mut state = self.state.lock();
		if state.pending.is_empty() {
			return None;
		}
		Some(state.pending.remove(0))
	}

	pub fn take_session_timer(&self) -> Option<ScheduledTimer> {
		let mut state = self.state.lock();
		let index = state.pending.iter().position(|timer| timer.timer == Timer::Session)?;
		Some(state.pending.remove(index))
	}

	/// Fires the pending session retry, returning its delay.
	pub fn fire_session(&self, session: &mut Session) -> Option<Duration> {
		let timer = self.take_session_timer()?;
		session.fire(timer.id, timer.timer);
		Some(timer.delay)
	}

	/// Fires the oldest pending timer of any kind.
	pub fn fire_next(&self, session: &mut Session) -> Option<ScheduledTimer> {
		let timer = self.take_next()?;
		session.fire(timer.id, timer.timer.clone());
		Some(timer)
	}
}

/// An envelope captured by [`FakeTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentEnvelope {
	pub request: RequestId,
	pub envelope: Envelope,
	pub long_poll: bool,
}

impl SentEnvelope {
	pub fn messages(&self) -> &[Message] {
		&self.envelope.messages
	}

	pub fn channels(&self) -> Vec<&str> {
		self.envelope.messages.iter().map(|message| message.channel.as_str()).collect()
	}

	/// The id the session stamped on the first message.
	pub fn message_id(&self) -> Option<&str> {
		self.envelope.messages.first().and_then(|message| message.id.as_deref())
	}
}

#[derive(Default)]
struct FakeState {
	transport_type: String,
	next_request: u64,
	sent: Vec<SentEnvelope>,
	in_flight: HashMap<RequestId, Envelope>,
	resets: usize,
	aborts: usize,
}

/// Builder for [`FakeTransport`].
pub struct FakeTransportBuilder {
	cross_domain: bool,
}

impl FakeTransportBuilder {
	pub fn new() -> Self {
		Self { cross_domain: true }
	}

	/// Whether the transport accepts cross-domain servers.
	pub fn cross_domain(mut self, cross_domain: bool) -> Self {
		self.cross_domain = cross_domain;
		self
	}

	pub fn build(self) -> (FakeTransport, FakeTransportController) {
		let state = Arc::new(Mutex::new(FakeState::default()));
		let transport = FakeTransport {
			state: state.clone(),
			cross_domain: self.cross_domain,
		};
		(transport, FakeTransportController { state })
	}
}

impl Default for FakeTransportBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Transport that records envelopes and completes them only when told to.
pub struct FakeTransport {
	state: Arc<Mutex<FakeState>>,
	cross_domain: bool,
}

impl Transport for FakeTransport {
	fn accept(&self, _version: &str, cross_domain: bool) -> bool {
		self.cross_domain || !cross_domain
	}

	fn send(&mut self, envelope: Envelope, long_poll: bool, _ctx: &mut TransportContext<'_>) -> Result<()> {
		let mut state = self.state.lock();
		state.next_request += 1;
		let request = RequestId(state.next_request);
		state.in_flight.insert(request, envelope.clone());
		state.sent.push(SentEnvelope {
			request,
			envelope,
			long_poll,
		});
		Ok(())
	}

	fn abort(&mut self, ctx: &mut TransportContext<'_>) {
		let mut state = self.state.lock();
		state.aborts += 1;
		let mut in_flight: Vec<_> = state.in_flight.drain().collect();
		in_flight.sort_by_key(|(request, _)| *request);
		for (_, envelope) in in_flight {
			ctx.fail(envelope.messages, Failure::new("abort"));
		}
	}

	fn reset(&mut self) {
		let mut state = self.state.lock();
		state.resets += 1;
		state.in_flight.clear();
	}

	fn handle_event(&mut self, event: TransportEvent, ctx: &mut TransportContext<'_>) {
		let TransportEvent::Response { request, result } = event else {
			return;
		};
		let Some(envelope) = self.state.lock().in_flight.remove(&request) else {
			return;
		};
		match result.map(|body| codec::decode(&body)) {
			Ok(Ok(messages)) => ctx.deliver(messages),
			Ok(Err(err)) => ctx.fail(envelope.messages, Failure::new("bad response").with_exception(err.to_string())),
			Err(failure) => ctx.fail(envelope.messages, failure),
		}
	}

	fn registered(&mut self, transport_type: &str) {
		self.state.lock().transport_type = transport_type.to_string();
	}
}

/// Test-side handle of a [`FakeTransport`].
#[derive(Clone)]
pub struct FakeTransportController {
	state: Arc<Mutex<FakeState>>,
}

impl FakeTransportController {
	/// Takes every envelope sent so far, clearing the buffer.
	pub fn take_sent(&self) -> Vec<SentEnvelope> {
		std::mem::take(&mut self.state.lock().sent)
	}

	pub fn in_flight(&self) -> usize {
		self.state.lock().in_flight.len()
	}

	pub fn resets(&self) -> usize {
		self.state.lock().resets
	}

	pub fn aborts(&self) -> usize {
		self.state.lock().aborts
	}

	/// Completes `request` with a JSON response body.
	pub fn respond(&self, session: &mut Session, request: RequestId, body: Value) {
		self.complete(session, request, Ok(body.to_string()));
	}

	/// Fails `request` at the I/O level.
	pub fn fail(&self, session: &mut Session, request: RequestId, failure: Failure) {
		self.complete(session, request, Err(failure));
	}

	fn complete(&self, session: &mut Session, request: RequestId, result: std::result::Result<String, Failure>) {
		let transport_type = self.state.lock().transport_type.clone();
		session.handle_transport_event(&transport_type, TransportEvent::Response { request, result });
	}
}

#[derive(Default)]
struct ExchangeState {
	executed: Vec<(RequestId, HttpRequest)>,
	cancelled: Vec<RequestId>,
}

/// [`HttpExchange`] that records requests.
pub struct FakeExchange {
	state: Arc<Mutex<ExchangeState>>,
}

#[derive(Clone)]
pub struct ExchangeProbe {
	state: Arc<Mutex<ExchangeState>>,
}

impl FakeExchange {
	pub fn new() -> (Self, ExchangeProbe) {
		let state = Arc::new(Mutex::new(ExchangeState::default()));
		(Self { state: state.clone() }, ExchangeProbe { state })
	}
}

impl HttpExchange for FakeExchange {
	fn execute(&mut self, request: RequestId, http: HttpRequest) -> std::result::Result<(), BoxError> {
		self.state.lock().executed.push((request, http));
		Ok(())
	}

	fn cancel(&mut self, request: RequestId) {
		self.state.lock().cancelled.push(request);
	}
}

impl ExchangeProbe {
	pub fn executed(&self) -> Vec<(RequestId, HttpRequest)> {
		self.state.lock().executed.clone()
	}

	pub fn cancelled(&self) -> Vec<RequestId> {
		self.state.lock().cancelled.clone()
	}
}

#[derive(Default)]
struct SocketsState {
	opened: Vec<(SocketId, String)>,
	frames: HashMap<u64, Vec<String>>,
	closed: Vec<u64>,
	refuse_next: bool,
}

/// [`SocketFactory`] whose sockets record frames and never fail to send.
pub struct FakeSockets {
	state: Arc<Mutex<SocketsState>>,
}

#[derive(Clone)]
pub struct SocketProbe {
	state: Arc<Mutex<SocketsState>>,
}

impl FakeSockets {
	pub fn new() -> (Self, SocketProbe) {
		let state = Arc::new(Mutex::new(SocketsState::default()));
		(Self { state: state.clone() }, SocketProbe { state })
	}
}

impl SocketFactory for FakeSockets {
	fn open(&mut self, socket: SocketId, url: &str) -> std::result::Result<Box<dyn Socket>, BoxError> {
		let mut state = self.state.lock();
		if std::mem::take(&mut state.refuse_next) {
			return Err("connection refused".into());
		}
		state.opened.push((socket, url.to_string()));
		Ok(Box::new(FakeSocket {
			id: socket.0,
			state: self.state.clone(),
		}))
	}
}

struct FakeSocket {
	id: u64,
	state: Arc<Mutex<SocketsState>>,
}

impl Socket for FakeSocket {
	fn send(&mut self, text: &str) -> bool {
		self.state.lock().frames.entry(self.id).or_default().push(text.to_string());
		true
	}

	fn close(&mut self) {
		self.state.lock().closed.push(self.id);
	}
}

impl SocketProbe {
	pub fn opened(&self) -> Vec<(SocketId, String)> {
		self.state.lock().opened.clone()
	}

	pub fn frames(&self, socket: u64) -> Vec<String> {
		self.state.lock().frames.get(&socket).cloned().unwrap_or_default()
	}

	pub fn closed(&self, socket: u64) -> bool {
		self.state.lock().closed.contains(&socket)
	}

	/// Makes the next `open` fail.
	pub fn refuse_next(&self) {
		self.state.lock().refuse_next = true;
	}
}
