//! Request/response multiplexing shared by the HTTP polling transports.
//!
//! At most `max_connections - 1` ordinary requests run at once, plus a
//! single long-poll in its own reserved slot. Excess envelopes wait in
//! submission order. Every request carries a timeout; when it expires the
//! request is cancelled and its messages fail with reason `timeout`.

use std::collections::{BTreeMap, VecDeque};

use bayeux_protocol::{Message, codec};
use tracing::debug;

use super::{Envelope, Failure, RequestId, Transport, TransportContext, TransportEvent};
use crate::error::{BoxError, Error, Result};
use crate::scheduler::TimerId;

/// The I/O half of a request transport: starts and cancels single
/// exchanges identified by a [`RequestId`].
pub trait RequestSender: Send {
	fn accept(&self, version: &str, cross_domain: bool) -> bool;

	/// Starts an exchange. Its completion must come back as a
	/// [`TransportEvent::Response`] for `request`.
	fn start(&mut self, request: RequestId, envelope: &Envelope, headers: &BTreeMap<String, String>) -> std::result::Result<(), BoxError>;

	fn cancel(&mut self, request: RequestId);

	/// Called when an exchange failed at the I/O level.
	fn failed(&mut self) {}

	fn reset(&mut self) {}

	fn registered(&mut self, transport_type: &str) {
		let _ = transport_type;
	}
}

#[derive(Debug)]
struct Request {
	id: RequestId,
	envelope: Envelope,
	long_poll: bool,
	timer: TimerId,
	delay_ms: u128,
}

pub struct RequestTransport<S> {
	sender: S,
	transport_type: String,
	next_request: u64,
	active: Vec<Request>,
	long_poll: Option<Request>,
	queued: VecDeque<Envelope>,
}

impl<S: RequestSender> RequestTransport<S> {
	pub fn new(sender: S) -> Self {
		Self {
			sender,
			transport_type: String::new(),
			next_request: 1000,
			active: Vec::new(),
			long_poll: None,
			queued: VecDeque::new(),
		}
	}

	pub fn sender(&self) -> &S {
		&self.sender
	}

	pub fn sender_mut(&mut self) -> &mut S {
		&mut self.sender
	}

	/// Ordinary requests in flight, excluding the long-poll.
	pub fn active_requests(&self) -> usize {
		self.active.len()
	}

	pub fn queued_envelopes(&self) -> usize {
		self.queued.len()
	}

	pub fn long_poll_request(&self) -> Option<RequestId> {
		self.long_poll.as_ref().map(|request| request.id)
	}

	fn next_request_id(&mut self) -> RequestId {
		let id = RequestId(self.next_request);
		self.next_request += 1;
		id
	}

	fn enqueue(&mut self, envelope: Envelope, ctx: &mut TransportContext<'_>) {
		let slots = ctx.settings().max_connections.saturating_sub(1);
		if self.active.len() < slots {
			let id = self.next_request_id();
			self.dispatch(id, envelope, false, ctx);
		} else {
			debug!(
				target = "bayeux.transport",
				transport = %self.transport_type,
				active = self.active.len(),
				queued = self.queued.len() + 1,
				"connection limit reached, envelope queued"
			);
			self.queued.push_back(envelope);
		}
	}

	fn dispatch(&mut self, id: RequestId, envelope: Envelope, long_poll: bool, ctx: &mut TransportContext<'_>) {
		let started = self.sender.start(id, &envelope, &ctx.settings().request_headers);

		let mut delay = ctx.settings().max_network_delay;
		if long_poll {
			delay += ctx.settings().long_poll_timeout;
		}
		let timer = ctx.schedule(delay, id.0);
		debug!(
			target = "bayeux.transport",
			transport = %self.transport_type,
			request = %id,
			long_poll,
			messages = envelope.messages.len(),
			delay_ms = delay.as_millis() as u64,
			"request started"
		);

		let request = Request {
			id,
			envelope,
			long_poll,
			timer,
			delay_ms: delay.as_millis(),
		};
		if long_poll {
			self.long_poll = Some(request);
		} else {
			self.active.push(request);
		}

		if let Err(err) = started {
			self.sender.failed();
			self.complete(id, Err(Failure::new("error").with_exception(err.to_string())), ctx);
		}
	}

	fn take_request(&mut self, id: RequestId) -> Option<Request> {
		if self.long_poll.as_ref().is_some_and(|request| request.id == id) {
			return self.long_poll.take();
		}
		let index = self.active.iter().position(|request| request.id == id)?;
		Some(self.active.remove(index))
	}

	/// Finishes a request: bookkeeping first, then the outcome, then the
	/// next queued envelope.
	fn complete(&mut self, id: RequestId, outcome: std::result::Result<Vec<Message>, Failure>, ctx: &mut TransportContext<'_>) {
		let Some(request) = self.take_request(id) else {
			debug!(target = "bayeux.transport", transport = %self.transport_type, request = %id, "ignoring completion of unknown request");
			return;
		};
		ctx.cancel(request.timer);

		let success = outcome.is_ok();
		match outcome {
			Ok(messages) => ctx.deliver(messages),
			Err(failure) => {
				debug!(target = "bayeux.transport", transport = %self.transport_type, request = %id, %failure, "request failed");
				ctx.fail(request.envelope.messages, failure);
			}
		}
		if !request.long_poll {
			self.dequeue(success, ctx);
		}
	}

	/// A successful completion sends the next queued envelope; a failed
	/// one fails it without sending.
	fn dequeue(&mut self, success: bool, ctx: &mut TransportContext<'_>) {
		let Some(envelope) = self.queued.pop_front() else {
			return;
		};
		if success {
			self.enqueue(envelope, ctx);
		} else {
			ctx.fail(envelope.messages, Failure::new("error"));
		}
	}
}

impl<S: RequestSender> Transport for RequestTransport<S> {
	fn accept(&self, version: &str, cross_domain: bool) -> bool {
		self.sender.accept(version, cross_domain)
	}

	fn send(&mut self, envelope: Envelope, long_poll: bool, ctx: &mut TransportContext<'_>) -> Result<()> {
		if !long_poll {
			self.enqueue(envelope, ctx);
			return Ok(());
		}
		if let Some(active) = &self.long_poll {
			return Err(Error::ConcurrentLongPoll { active: active.id.0 });
		}
		let id = self.next_request_id();
		self.dispatch(id, envelope, true, ctx);
		Ok(())
	}

	fn abort(&mut self, ctx: &mut TransportContext<'_>) {
		for request in self.active.drain(..).chain(self.long_poll.take()) {
			debug!(target = "bayeux.transport", transport = %self.transport_type, request = %request.id, "aborting request");
			self.sender.cancel(request.id);
			ctx.cancel(request.timer);
			ctx.fail(request.envelope.messages, Failure::new("abort"));
		}
		for envelope in self.queued.drain(..) {
			ctx.fail(envelope.messages, Failure::new("abort"));
		}
		self.reset();
	}

	fn reset(&mut self) {
		self.sender.reset();
		self.active.clear();
		self.long_poll = None;
		self.queued.clear();
	}

	fn handle_event(&mut self, event: TransportEvent, ctx: &mut TransportContext<'_>) {
		let (request, result) = match event {
			TransportEvent::Response { request, result } => (request, result),
			other => {
				debug!(target = "bayeux.transport", transport = %self.transport_type, event = ?other, "unexpected event");
				return;
			}
		};
		let outcome = match result {
			Ok(body) => match codec::decode(&body) {
				Ok(messages) if messages.is_empty() => Err(Failure::new("no response")),
				Ok(messages) => Ok(messages),
				Err(err) => Err(Failure::new("bad response").with_exception(err.to_string())),
			},
			Err(failure) => {
				if self.is_tracked(request) {
					self.sender.failed();
				}
				Err(failure)
			}
		};
		self.complete(request, outcome, ctx);
	}

	fn handle_timer(&mut self, token: u64, ctx: &mut TransportContext<'_>) {
		let id = RequestId(token);
		let Some(request) = self.take_request(id) else {
			return;
		};
		self.sender.cancel(id);
		let exception = format!(
			"Request {id} of transport {} exceeded {} ms max network delay",
			self.transport_type, request.delay_ms
		);
		debug!(target = "bayeux.transport", transport = %self.transport_type, request = %id, "request timed out");
		ctx.fail(request.envelope.messages, Failure::new("timeout").with_exception(exception));
		if !request.long_poll {
			self.dequeue(false, ctx);
		}
	}

	fn registered(&mut self, transport_type: &str) {
		self.transport_type = transport_type.to_string();
		self.sender.registered(transport_type);
	}
}

impl<S> RequestTransport<S> {
	fn is_tracked(&self, id: RequestId) -> bool {
		self.long_poll.as_ref().is_some_and(|request| request.id == id) || self.active.iter().any(|request| request.id == id)
	}
}
