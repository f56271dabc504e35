//! The Bayeux session state machine.
//!
//! A [`Session`] owns every piece of client state: status, client id,
//! negotiated advice, backoff, the batch queue, listeners, extensions and
//! transports. It performs no I/O itself. Entry points are the public API,
//! [`Session::fire`] for timers and [`Session::handle_transport_event`] for
//! I/O completions; each drains the transport deliveries it caused before
//! returning, so listeners always run on the caller's thread.

use std::collections::VecDeque;
use std::time::Duration;

use bayeux_protocol::{Advice, BAYEUX_VERSION, MINIMUM_VERSION, Message, Props, Reconnect, channel};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::extension::{Extension, ExtensionPipeline};
use crate::listener::{Callback, ListenerHandle, ListenerRegistry, ListenerResult};
use crate::scheduler::{Scheduler, Timer, TimerId};
use crate::transport::{Delivery, Envelope, Failure, Transport, TransportContext, TransportEvent, TransportRegistry, TransportSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
	Disconnected,
	Handshaking,
	Connecting,
	Connected,
	Disconnecting,
}

impl ConnectionStatus {
	pub fn as_str(self) -> &'static str {
		match self {
			ConnectionStatus::Disconnected => "disconnected",
			ConnectionStatus::Handshaking => "handshaking",
			ConnectionStatus::Connecting => "connecting",
			ConnectionStatus::Connected => "connected",
			ConnectionStatus::Disconnecting => "disconnecting",
		}
	}
}

impl std::fmt::Display for ConnectionStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Advice currently in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdviceState {
	pub reconnect: Reconnect,
	pub interval: Duration,
	pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheduled {
	Handshake,
	Connect,
}

/// Per-meta-channel handling of responses and transport failures.
#[derive(Clone, Copy)]
struct MetaHandlers {
	response: fn(&mut Session, Message),
	failure: fn(&mut Session, Message, &Failure),
}

impl MetaHandlers {
	fn for_channel(name: &str) -> Self {
		match name {
			channel::HANDSHAKE => Self {
				response: Session::handshake_response,
				failure: Session::handshake_failure,
			},
			channel::CONNECT => Self {
				response: Session::connect_response,
				failure: Session::connect_failure,
			},
			channel::DISCONNECT => Self {
				response: Session::disconnect_response,
				failure: Session::disconnect_failure,
			},
			channel::SUBSCRIBE => Self {
				response: Session::subscribe_response,
				failure: Session::subscribe_failure,
			},
			channel::UNSUBSCRIBE => Self {
				response: Session::unsubscribe_response,
				failure: Session::unsubscribe_failure,
			},
			_ => Self {
				response: Session::message_response,
				failure: Session::message_failure,
			},
		}
	}
}

pub struct Session {
	config: Config,
	cross_domain: bool,
	status: ConnectionStatus,
	transports: TransportRegistry,
	transport: Option<String>,
	settings: TransportSettings,
	scheduler: Box<dyn Scheduler>,
	scheduled: Option<(TimerId, Scheduled)>,
	message_id: u64,
	client_id: Option<String>,
	batch: u32,
	internal_batch: bool,
	queue: Vec<Message>,
	listeners: ListenerRegistry<Callback>,
	extensions: ExtensionPipeline,
	backoff: Duration,
	advice: AdviceState,
	last_advice: Option<Advice>,
	handshake_props: Props,
	reestablish: bool,
	deliveries: VecDeque<Delivery>,
	draining: bool,
}

impl Session {
	pub fn new(config: Config, scheduler: impl Scheduler + 'static) -> Result<Self> {
		config.validate()?;
		Ok(Self {
			cross_domain: config.is_cross_domain(),
			status: ConnectionStatus::Disconnected,
			transports: TransportRegistry::new(),
			transport: None,
			settings: TransportSettings {
				max_connections: config.max_connections,
				max_network_delay: config.max_network_delay,
				long_poll_timeout: config.timeout,
				request_headers: config.request_headers.clone(),
			},
			scheduler: Box::new(scheduler),
			scheduled: None,
			message_id: 0,
			client_id: None,
			batch: 0,
			internal_batch: false,
			queue: Vec::new(),
			listeners: ListenerRegistry::new(),
			extensions: ExtensionPipeline::new(config.reverse_incoming_extensions),
			backoff: Duration::ZERO,
			advice: AdviceState {
				reconnect: config.reconnect,
				interval: config.interval,
				timeout: config.timeout,
			},
			last_advice: None,
			handshake_props: Props::new(),
			reestablish: false,
			deliveries: VecDeque::new(),
			draining: false,
			config,
		})
	}

	/// Replaces the configuration. Advice reverts to the configured values.
	pub fn configure(&mut self, config: Config) -> Result<()> {
		config.validate()?;
		self.cross_domain = config.is_cross_domain();
		self.settings = TransportSettings {
			max_connections: config.max_connections,
			max_network_delay: config.max_network_delay,
			long_poll_timeout: config.timeout,
			request_headers: config.request_headers.clone(),
		};
		self.advice = AdviceState {
			reconnect: config.reconnect,
			interval: config.interval,
			timeout: config.timeout,
		};
		self.extensions.set_reverse_incoming(config.reverse_incoming_extensions);
		debug!(target = "bayeux.session", url = %config.url, "configured");
		self.config = config;
		Ok(())
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn url(&self) -> &str {
		&self.config.url
	}

	pub fn status(&self) -> ConnectionStatus {
		self.status
	}

	pub fn is_disconnected(&self) -> bool {
		matches!(self.status, ConnectionStatus::Disconnected | ConnectionStatus::Disconnecting)
	}

	pub fn client_id(&self) -> Option<&str> {
		self.client_id.as_deref()
	}

	/// Type name of the negotiated transport.
	pub fn transport(&self) -> Option<&str> {
		self.transport.as_deref()
	}

	pub fn transport_types(&self) -> Vec<String> {
		self.transports.types()
	}

	pub fn advice(&self) -> AdviceState {
		self.advice
	}

	/// Raw advice most recently received from the server.
	pub fn last_advice(&self) -> Option<&Advice> {
		self.last_advice.as_ref()
	}

	pub fn backoff(&self) -> Duration {
		self.backoff
	}

	pub fn backoff_increment(&self) -> Duration {
		self.config.backoff_increment
	}

	pub fn set_backoff_increment(&mut self, increment: Duration) {
		self.config.backoff_increment = increment;
	}

	pub fn register_transport(&mut self, transport_type: &str, transport: Box<dyn Transport>, index: Option<usize>) -> bool {
		if !self.transports.add(transport_type, transport, index) {
			debug!(target = "bayeux.transport", transport = transport_type, "transport already registered");
			return false;
		}
		if let Some(transport) = self.transports.get_mut(transport_type) {
			transport.registered(transport_type);
		}
		debug!(target = "bayeux.transport", transport = transport_type, "registered transport");
		true
	}

	pub fn unregister_transport(&mut self, transport_type: &str) -> Option<Box<dyn Transport>> {
		let mut transport = self.transports.remove(transport_type)?;
		transport.unregistered();
		if self.transport.as_deref() == Some(transport_type) {
			self.transport = None;
		}
		debug!(target = "bayeux.transport", transport = transport_type, "unregistered transport");
		Some(transport)
	}

	pub fn register_extension(&mut self, name: &str, extension: impl Extension + 'static) -> bool {
		self.extensions.register(name, Box::new(extension))
	}

	pub fn unregister_extension(&mut self, name: &str) -> bool {
		self.extensions.unregister(name)
	}

	pub fn has_extension(&self, name: &str) -> bool {
		self.extensions.contains(name)
	}

	pub fn handshake(&mut self) -> Result<()> {
		self.handshake_with(Props::new())
	}

	/// Starts a fresh handshake. `props` are merged into this and every
	/// automatic retry handshake message.
	pub fn handshake_with(&mut self, props: Props) -> Result<()> {
		self.cancel_scheduled();
		self.set_status(ConnectionStatus::Disconnected);
		self.reestablish = false;
		let result = self.start_handshake(props);
		self.drain();
		result
	}

	pub fn disconnect(&mut self) -> Result<()> {
		self.disconnect_with(&Props::new())
	}

	/// Sends `/meta/disconnect`. A no-op when already disconnected.
	pub fn disconnect_with(&mut self, props: &Props) -> Result<()> {
		if self.is_disconnected() {
			return Ok(());
		}
		self.cancel_scheduled();
		let message = Message::new(channel::DISCONNECT).with_props(props);
		self.set_status(ConnectionStatus::Disconnecting);
		info!(target = "bayeux.session", "disconnecting");
		let result = self.send_now(vec![message], false, Some("disconnect"));
		self.drain();
		result
	}

	/// Tears the session down locally, failing everything in flight.
	pub fn abort(&mut self) {
		info!(target = "bayeux.session", "aborting");
		self.teardown(true);
		self.drain();
	}

	pub fn publish(&mut self, name: &str, data: Value) -> Result<()> {
		self.publish_with(name, data, &Props::new())
	}

	pub fn publish_with(&mut self, name: &str, data: Value, props: &Props) -> Result<()> {
		check_channel(name)?;
		self.check_connected()?;
		let message = Message::publish(name, data).with_props(props);
		let result = self.queue_send(message);
		self.drain();
		result
	}

	pub fn subscribe<F>(&mut self, name: &str, callback: F) -> Result<ListenerHandle>
	where
		F: FnMut(&mut Session, &Message) -> ListenerResult + Send + 'static,
	{
		self.subscribe_with(name, &Props::new(), callback)
	}

	/// Registers `callback` for `name`. Only the first local registration on
	/// a channel sends `/meta/subscribe`.
	pub fn subscribe_with<F>(&mut self, name: &str, props: &Props, callback: F) -> Result<ListenerHandle>
	where
		F: FnMut(&mut Session, &Message) -> ListenerResult + Send + 'static,
	{
		check_channel(name)?;
		self.check_connected()?;
		let send = !self.listeners.has_registrations(name);
		let handle = self.listeners.add(name, Box::new(callback), true);
		if send {
			let message = Message::subscription(channel::SUBSCRIBE, name).with_props(props);
			let result = self.queue_send(message);
			self.drain();
			result?;
		}
		Ok(handle)
	}

	pub fn unsubscribe(&mut self, handle: &ListenerHandle) -> Result<()> {
		self.unsubscribe_with(handle, &Props::new())
	}

	/// Removes a subscription. `/meta/unsubscribe` goes out only once no
	/// registration remains on the channel.
	pub fn unsubscribe_with(&mut self, handle: &ListenerHandle, props: &Props) -> Result<()> {
		self.check_connected()?;
		self.listeners.remove(handle);
		if self.listeners.has_registrations(handle.channel()) {
			return Ok(());
		}
		let message = Message::subscription(channel::UNSUBSCRIBE, handle.channel()).with_props(props);
		let result = self.queue_send(message);
		self.drain();
		result
	}

	/// Adds a listener that does not subscribe on the server. Works for
	/// `/meta/*` channels and wildcards.
	pub fn add_listener<F>(&mut self, name: &str, callback: F) -> Result<ListenerHandle>
	where
		F: FnMut(&mut Session, &Message) -> ListenerResult + Send + 'static,
	{
		check_channel(name)?;
		Ok(self.listeners.add(name, Box::new(callback), false))
	}

	pub fn remove_listener(&mut self, handle: &ListenerHandle) -> bool {
		self.listeners.remove(handle)
	}

	pub fn clear_listeners(&mut self) {
		self.listeners.clear();
	}

	/// Drops local subscriptions without telling the server.
	pub fn clear_subscriptions(&mut self) {
		let removed = self.listeners.clear_subscriptions();
		debug!(target = "bayeux.listener", removed, "cleared subscriptions");
	}

	pub fn start_batch(&mut self) {
		self.batch += 1;
	}

	/// Ends a batch; the outermost end flushes queued messages as a single
	/// envelope.
	pub fn end_batch(&mut self) -> Result<()> {
		if self.batch == 0 {
			return Err(Error::UnbalancedBatch);
		}
		self.batch -= 1;
		let result = if self.batch == 0 && !self.is_disconnected() && !self.internal_batch {
			self.flush_batch()
		} else {
			Ok(())
		};
		self.drain();
		result
	}

	/// Runs `f` inside a batch.
	pub fn batch<R>(&mut self, f: impl FnOnce(&mut Session) -> R) -> Result<R> {
		self.start_batch();
		let value = f(self);
		self.end_batch()?;
		Ok(value)
	}

	/// Sends (or queues, while batching) an arbitrary message.
	pub fn send(&mut self, message: Message) -> Result<()> {
		let result = self.queue_send(message);
		self.drain();
		result
	}

	/// Processes one message as if the server had sent it. Called from a
	/// listener, the message is handled once that listener returns.
	pub fn receive(&mut self, message: Message) {
		self.deliveries.push_back(Delivery::Messages(vec![message]));
		self.drain();
	}

	/// Fires a timer previously handed to the scheduler.
	pub fn fire(&mut self, id: TimerId, timer: Timer) {
		match timer {
			Timer::Session => self.fire_scheduled(id),
			Timer::Transport { transport, token } => {
				if self.with_transport(&transport, |transport, ctx| transport.handle_timer(token, ctx)).is_none() {
					debug!(target = "bayeux.transport", %transport, "timer for unregistered transport dropped");
				}
			}
		}
		self.drain();
	}

	/// Routes an I/O completion to the transport that started it.
	pub fn handle_transport_event(&mut self, transport_type: &str, event: TransportEvent) {
		if self
			.with_transport(transport_type, |transport, ctx| transport.handle_event(event, ctx))
			.is_none()
		{
			debug!(target = "bayeux.transport", transport = transport_type, "event for unregistered transport dropped");
		}
		self.drain();
	}

	fn fire_scheduled(&mut self, id: TimerId) {
		let Some((scheduled, operation)) = self.scheduled else {
			return;
		};
		if scheduled != id {
			debug!(target = "bayeux.session", timer = %id, "ignoring superseded timer");
			return;
		}
		self.scheduled = None;
		let result = match operation {
			Scheduled::Handshake => {
				let props = self.handshake_props.clone();
				self.start_handshake(props)
			}
			Scheduled::Connect => self.connect(),
		};
		if let Err(err) = result {
			warn!(target = "bayeux.session", ?operation, error = %err, "scheduled operation failed");
		}
	}

	fn set_status(&mut self, status: ConnectionStatus) {
		if self.status != status {
			debug!(target = "bayeux.session", from = %self.status, to = %status, "status");
			self.status = status;
		}
	}

	fn check_connected(&self) -> Result<()> {
		if self.is_disconnected() {
			return Err(Error::IllegalState("session is disconnected".into()));
		}
		Ok(())
	}

	fn start_handshake(&mut self, props: Props) -> Result<()> {
		self.client_id = None;
		self.listeners.clear_subscriptions();
		if self.is_disconnected() {
			self.transports.reset();
		}
		self.batch = 0;
		self.internal_batch = true;
		self.handshake_props = props;

		let types = self.transports.find_acceptable(BAYEUX_VERSION, self.cross_domain);
		let Some(initial) = self.transports.negotiate(&types, BAYEUX_VERSION, self.cross_domain) else {
			self.internal_batch = false;
			self.set_status(ConnectionStatus::Disconnected);
			return Err(Error::NoTransport {
				version: BAYEUX_VERSION.to_string(),
				cross_domain: self.cross_domain,
			});
		};
		debug!(target = "bayeux.session", transport = %initial, "initial transport");
		self.transport = Some(initial);

		let mut message = Message::new(channel::HANDSHAKE).with_props(&self.handshake_props);
		message.version = Some(BAYEUX_VERSION.to_string());
		message.minimum_version = Some(MINIMUM_VERSION.to_string());
		message.supported_connection_types = Some(types);
		message.advice = Some(Advice {
			timeout: Some(millis(self.advice.timeout)),
			interval: Some(millis(self.advice.interval)),
			..Default::default()
		});

		self.set_status(ConnectionStatus::Handshaking);
		info!(target = "bayeux.session", url = %self.config.url, "handshaking");
		self.send_now(vec![message], false, Some("handshake"))
	}

	fn connect(&mut self) -> Result<()> {
		let mut message = Message::new(channel::CONNECT);
		message.connection_type = self.transport.clone();
		let previous = self.status;
		self.set_status(ConnectionStatus::Connecting);
		if let Err(err) = self.send_now(vec![message], true, Some("connect")) {
			self.set_status(previous);
			return Err(err);
		}
		self.set_status(ConnectionStatus::Connected);
		Ok(())
	}

	fn queue_send(&mut self, message: Message) -> Result<()> {
		if self.batch > 0 || self.internal_batch {
			self.queue.push(message);
			return Ok(());
		}
		self.send_now(vec![message], false, None)
	}

	fn flush_batch(&mut self) -> Result<()> {
		let messages = std::mem::take(&mut self.queue);
		if messages.is_empty() {
			return Ok(());
		}
		self.send_now(messages, false, None)
	}

	/// Stamps ids, runs outgoing extensions and hands the envelope to the
	/// negotiated transport.
	fn send_now(&mut self, messages: Vec<Message>, long_poll: bool, path: Option<&str>) -> Result<()> {
		let mut outgoing = Vec::with_capacity(messages.len());
		for mut message in messages {
			self.message_id += 1;
			message.id = Some(self.message_id.to_string());
			if let Some(client_id) = &self.client_id {
				message.client_id = Some(client_id.clone());
			}
			if let Some(message) = self.extensions.outgoing(message) {
				outgoing.push(message);
			}
		}
		if outgoing.is_empty() {
			return Ok(());
		}

		let envelope = Envelope {
			url: self.endpoint(path),
			messages: outgoing,
		};
		let Some(transport_type) = self.transport.clone() else {
			warn!(target = "bayeux.session", "no transport negotiated, envelope failed");
			self.deliveries.push_back(Delivery::Failure {
				messages: envelope.messages,
				failure: Failure::new("error").with_exception("no transport negotiated"),
			});
			return Ok(());
		};
		debug!(
			target = "bayeux.session",
			transport = %transport_type,
			url = %envelope.url,
			messages = envelope.messages.len(),
			long_poll,
			"send"
		);
		self.with_transport(&transport_type, |transport, ctx| transport.send(envelope, long_poll, ctx))
			.unwrap_or_else(|| Err(Error::IllegalState(format!("transport {transport_type} is not registered"))))
	}

	fn endpoint(&self, path: Option<&str>) -> String {
		let mut url = self.config.url.clone();
		if !url.ends_with('/') {
			url.push('/');
		}
		if let Some(path) = path {
			url.push_str(path);
		}
		url
	}

	fn with_transport<R>(&mut self, transport_type: &str, f: impl FnOnce(&mut dyn Transport, &mut TransportContext<'_>) -> R) -> Option<R> {
		let transport = self.transports.get_mut(transport_type)?;
		let mut ctx = TransportContext::new(transport_type, self.scheduler.as_mut(), &mut self.deliveries, &self.settings);
		Some(f(transport, &mut ctx))
	}

	fn schedule(&mut self, operation: Scheduled) {
		self.cancel_scheduled();
		let delay = self.advice.interval + self.backoff;
		debug!(
			target = "bayeux.session",
			?operation,
			interval_ms = millis(self.advice.interval),
			backoff_ms = millis(self.backoff),
			"scheduling"
		);
		let id = self.scheduler.schedule(delay, Timer::Session);
		self.scheduled = Some((id, operation));
	}

	fn cancel_scheduled(&mut self) {
		if let Some((id, _)) = self.scheduled.take() {
			self.scheduler.cancel(id);
		}
	}

	fn delayed_connect(&mut self) {
		self.schedule(Scheduled::Connect);
	}

	fn delayed_handshake(&mut self) {
		self.set_status(ConnectionStatus::Handshaking);
		self.internal_batch = true;
		self.schedule(Scheduled::Handshake);
	}

	fn increase_backoff(&mut self) {
		self.backoff = (self.backoff + self.config.backoff_increment).min(self.config.max_backoff);
	}

	fn reset_backoff(&mut self) {
		self.backoff = Duration::ZERO;
	}

	fn teardown(&mut self, abort: bool) {
		self.cancel_scheduled();
		if abort {
			if let Some(transport_type) = self.transport.clone() {
				self.with_transport(&transport_type, |transport, ctx| transport.abort(ctx));
			}
		}
		self.client_id = None;
		self.set_status(ConnectionStatus::Disconnected);
		self.batch = 0;
		self.queue.clear();
		self.reset_backoff();
	}

	fn drain(&mut self) {
		if self.draining {
			return;
		}
		self.draining = true;
		while let Some(delivery) = self.deliveries.pop_front() {
			match delivery {
				Delivery::Messages(messages) => {
					for message in messages {
						self.receive_one(message);
					}
				}
				Delivery::Failure { messages, failure } => {
					for message in messages {
						debug!(target = "bayeux.session", channel = %message.channel, %failure, "message failed");
						(MetaHandlers::for_channel(&message.channel).failure)(self, message, &failure);
					}
				}
			}
		}
		self.draining = false;
	}

	fn receive_one(&mut self, message: Message) {
		let Some(message) = self.extensions.incoming(message) else {
			return;
		};
		if let Some(advice) = &message.advice {
			self.apply_advice(advice);
		}
		(MetaHandlers::for_channel(&message.channel).response)(self, message);
	}

	fn apply_advice(&mut self, advice: &Advice) {
		if let Some(reconnect) = advice.reconnect {
			self.advice.reconnect = reconnect;
		}
		if let Some(interval) = advice.interval {
			self.advice.interval = Duration::from_millis(interval);
		}
		if let Some(timeout) = advice.timeout {
			self.advice.timeout = Duration::from_millis(timeout);
			self.settings.long_poll_timeout = self.advice.timeout;
		}
		debug!(target = "bayeux.session", advice = ?self.advice, "advice applied");
		self.last_advice = Some(advice.clone());
	}

	fn notify_listeners(&mut self, name: &str, message: &Message) {
		for handle in self.listeners.dispatch_order(name) {
			let Some(mut callback) = self.listeners.take(&handle) else {
				continue;
			};
			if let Err(err) = callback(self, message) {
				warn!(target = "bayeux.listener", channel = handle.channel(), error = %err, "listener failed");
			}
			self.listeners.restore(&handle, callback);
		}
	}

	fn failure_message(name: &str, request: Message, failure: &Failure, advice: Advice) -> Message {
		let mut message = Message::new(name);
		message.successful = Some(false);
		message.advice = Some(advice);
		message.set_field("failure", Value::Bool(true));
		message.set_field("reason", Value::String(failure.reason.clone()));
		if let Some(exception) = &failure.exception {
			message.set_field("exception", Value::String(exception.clone()));
		}
		message.set_field("request", serde_json::to_value(&request).unwrap_or(Value::Null));
		message
	}

	fn handshake_response(&mut self, mut message: Message) {
		if !message.is_successful() {
			let retry = !self.is_disconnected() && self.advice.reconnect != Reconnect::None;
			if !retry {
				self.set_status(ConnectionStatus::Disconnected);
			}
			warn!(target = "bayeux.session", retry, error = message.error.as_deref().unwrap_or_default(), "handshake unsuccessful");
			self.notify_listeners(channel::HANDSHAKE, &message);
			self.notify_listeners(channel::UNSUCCESSFUL, &message);
			if retry {
				self.increase_backoff();
				self.delayed_handshake();
			}
			return;
		}

		self.client_id = message.client_id.clone();
		let version = message.version.clone().unwrap_or_else(|| BAYEUX_VERSION.to_string());
		let server_types = message.supported_connection_types.clone().unwrap_or_default();
		let Some(negotiated) = self.transports.negotiate(&server_types, &version, self.cross_domain) else {
			let client_types = self.transports.find_acceptable(&version, self.cross_domain);
			let failure = Failure::new("error").with_exception(format!(
				"Could not negotiate transport with server; client {client_types:?}, server {server_types:?}"
			));
			warn!(target = "bayeux.session", %failure, "transport negotiation failed");
			self.handshake_failure(message, &failure);
			return;
		};
		if self.transport.as_deref() != Some(negotiated.as_str()) {
			debug!(target = "bayeux.session", from = ?self.transport, to = %negotiated, "transport changed");
			self.transport = Some(negotiated);
		}

		info!(target = "bayeux.session", client_id = ?self.client_id, transport = ?self.transport, "handshake successful");
		message.set_field("reestablish", Value::Bool(self.reestablish));
		self.reestablish = true;
		self.reset_backoff();
		self.notify_listeners(channel::HANDSHAKE, &message);

		self.internal_batch = false;
		if let Err(err) = self.flush_batch() {
			warn!(target = "bayeux.session", error = %err, "flushing messages queued during handshake failed");
		}

		match self.advice.reconnect {
			Reconnect::Handshake => {
				self.advice.reconnect = Reconnect::Retry;
				self.delayed_connect();
			}
			Reconnect::Retry => self.delayed_connect(),
			Reconnect::None => {}
		}
	}

	fn handshake_failure(&mut self, request: Message, failure: &Failure) {
		let message = Self::failure_message(channel::HANDSHAKE, request, failure, Advice::retry(millis(self.backoff)));
		self.handshake_response(message);
	}

	fn connect_response(&mut self, message: Message) {
		let action = if self.is_disconnected() {
			Reconnect::None
		} else {
			self.advice.reconnect
		};
		if !self.is_disconnected() {
			self.set_status(if action == Reconnect::Retry {
				ConnectionStatus::Connecting
			} else {
				ConnectionStatus::Disconnecting
			});
		}

		if message.is_successful() {
			self.notify_listeners(channel::CONNECT, &message);
			self.reset_backoff();
			match action {
				Reconnect::Retry => self.delayed_connect(),
				_ => self.set_status(ConnectionStatus::Disconnected),
			}
			return;
		}

		debug!(target = "bayeux.session", reconnect = %action, "connect unsuccessful");
		self.notify_listeners(channel::CONNECT, &message);
		self.notify_listeners(channel::UNSUCCESSFUL, &message);
		match action {
			Reconnect::Retry => {
				self.increase_backoff();
				self.delayed_connect();
			}
			Reconnect::Handshake => {
				self.reset_backoff();
				self.delayed_handshake();
			}
			Reconnect::None => {
				self.reset_backoff();
				self.set_status(ConnectionStatus::Disconnected);
			}
		}
	}

	fn connect_failure(&mut self, request: Message, failure: &Failure) {
		let message = Self::failure_message(channel::CONNECT, request, failure, Advice::retry(millis(self.backoff)));
		self.connect_response(message);
	}

	fn disconnect_response(&mut self, message: Message) {
		if message.is_successful() {
			info!(target = "bayeux.session", "disconnected");
			self.teardown(false);
			self.notify_listeners(channel::DISCONNECT, &message);
		} else {
			self.teardown(true);
			self.notify_listeners(channel::DISCONNECT, &message);
			self.notify_listeners(channel::UNSUCCESSFUL, &message);
		}
	}

	fn disconnect_failure(&mut self, request: Message, failure: &Failure) {
		let message = Self::failure_message(channel::DISCONNECT, request, failure, Advice::none());
		self.disconnect_response(message);
	}

	fn subscribe_response(&mut self, message: Message) {
		self.notify_listeners(channel::SUBSCRIBE, &message);
		if !message.is_successful() {
			self.notify_listeners(channel::UNSUCCESSFUL, &message);
		}
	}

	fn subscribe_failure(&mut self, request: Message, failure: &Failure) {
		let message = Self::failure_message(channel::SUBSCRIBE, request, failure, Advice::none());
		self.subscribe_response(message);
	}

	fn unsubscribe_response(&mut self, message: Message) {
		self.notify_listeners(channel::UNSUBSCRIBE, &message);
		if !message.is_successful() {
			self.notify_listeners(channel::UNSUCCESSFUL, &message);
		}
	}

	fn unsubscribe_failure(&mut self, request: Message, failure: &Failure) {
		let message = Self::failure_message(channel::UNSUBSCRIBE, request, failure, Advice::none());
		self.unsubscribe_response(message);
	}

	/// Publish acknowledgements carry `successful`; anything else with data
	/// is a delivery for the channel's listeners.
	fn message_response(&mut self, message: Message) {
		match message.successful {
			Some(successful) => {
				self.notify_listeners(channel::PUBLISH, &message);
				if !successful {
					self.notify_listeners(channel::UNSUCCESSFUL, &message);
				}
			}
			None if message.data.is_some() => {
				let name = message.channel.clone();
				self.notify_listeners(&name, &message);
			}
			None => debug!(target = "bayeux.session", channel = %message.channel, "unknown message dropped"),
		}
	}

	fn message_failure(&mut self, request: Message, failure: &Failure) {
		let name = request.channel.clone();
		let message = Self::failure_message(&name, request, failure, Advice::none());
		self.message_response(message);
	}
}

fn check_channel(name: &str) -> Result<()> {
	if !channel::is_valid(name) {
		return Err(Error::IllegalArgument(format!("illegal channel name '{name}'")));
	}
	Ok(())
}

fn millis(duration: Duration) -> u64 {
	duration.as_millis() as u64
}
