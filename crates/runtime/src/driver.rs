//! Single-task driver and the async client handle.
//!
//! Calls from [`Client`] arrive on one unbounded channel. Timer firings from
//! [`TokioScheduler`] and I/O completions from the HTTP and WebSocket tasks
//! arrive on another, fed through [`EventSink`]. The [`Driver`] applies each
//! channel in arrival order on one task, so listeners and extensions never
//! run concurrently with each other. Once every [`Client`] is dropped the
//! driver aborts the session and returns.

use bayeux::transport::{self, CALLBACK_POLLING, LONG_POLLING, Transport, TransportEvent, WEBSOCKET, WebSocketTransport};
use bayeux::{Config, ConnectionStatus, Extension, ListenerHandle, ListenerResult, Message, Props, Session, Timer, TimerId};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::error::{Error, Result};
use crate::http::ReqwestExchange;
use crate::scheduler::TokioScheduler;
use crate::websocket::TungsteniteSockets;

type Call = Box<dyn FnOnce(&mut Session) + Send>;

enum Command {
	Call(Call),
	Shutdown,
}

pub(crate) enum Input {
	Timer { id: TimerId, timer: Timer },
	Transport { transport: String, event: TransportEvent },
}

/// Posts timer firings and I/O completions to a [`Driver`].
#[derive(Clone)]
pub struct EventSink {
	inputs: mpsc::UnboundedSender<Input>,
}

impl EventSink {
	pub fn timer(&self, id: TimerId, timer: Timer) {
		if self.inputs.send(Input::Timer { id, timer }).is_err() {
			trace!(target = "bayeux.runtime", %id, "driver gone, timer dropped");
		}
	}

	pub fn transport(&self, transport: &str, event: TransportEvent) {
		let input = Input::Transport {
			transport: transport.to_string(),
			event,
		};
		if self.inputs.send(input).is_err() {
			trace!(target = "bayeux.runtime", transport, "driver gone, transport event dropped");
		}
	}
}

/// Owns the session. Spawn [`Driver::run`] on a tokio runtime.
pub struct Driver {
	session: Session,
	commands: mpsc::UnboundedReceiver<Command>,
	inputs: mpsc::UnboundedReceiver<Input>,
}

impl Driver {
	/// Processes inputs until [`Client::shutdown`] is called or every
	/// [`Client`] is dropped.
	pub async fn run(mut self) {
		info!(target = "bayeux.runtime", url = %self.session.url(), transports = ?self.session.transport_types(), "driver started");
		loop {
			tokio::select! {
				command = self.commands.recv() => match command {
					Some(Command::Call(call)) => call(&mut self.session),
					Some(Command::Shutdown) => {
						debug!(target = "bayeux.runtime", "shutdown requested");
						break;
					}
					None => {
						debug!(target = "bayeux.runtime", "every client dropped");
						break;
					}
				},
				// The session's own scheduler and transports keep this sender alive.
				Some(input) = self.inputs.recv() => match input {
					Input::Timer { id, timer } => self.session.fire(id, timer),
					Input::Transport { transport, event } => self.session.handle_transport_event(&transport, event),
				},
			}
		}
		self.session.abort();
		info!(target = "bayeux.runtime", "driver stopped");
	}

	pub fn spawn(self) -> JoinHandle<()> {
		tokio::spawn(self.run())
	}
}

/// Cloneable async handle to a running [`Driver`].
#[derive(Clone)]
pub struct Client {
	commands: mpsc::UnboundedSender<Command>,
}

impl Client {
	pub fn builder(config: Config) -> ClientBuilder {
		ClientBuilder::new(config)
	}

	/// Runs `f` on the driver task with exclusive access to the session.
	pub async fn with_session<F, R>(&self, f: F) -> Result<R>
	where
		F: FnOnce(&mut Session) -> R + Send + 'static,
		R: Send + 'static,
	{
		let (reply, response) = oneshot::channel();
		let call: Call = Box::new(move |session: &mut Session| {
			let _ = reply.send(f(session));
		});
		self.commands.send(Command::Call(call)).map_err(|_| Error::ChannelClosed)?;
		response.await.map_err(|_| Error::ChannelClosed)
	}

	pub async fn handshake(&self) -> Result<()> {
		Ok(self.with_session(Session::handshake).await??)
	}

	pub async fn handshake_with(&self, props: Props) -> Result<()> {
		Ok(self.with_session(move |session: &mut Session| session.handshake_with(props)).await??)
	}

	pub async fn publish(&self, channel: impl Into<String>, data: Value) -> Result<()> {
		let channel = channel.into();
		Ok(self.with_session(move |session: &mut Session| session.publish(&channel, data)).await??)
	}

	pub async fn publish_with(&self, channel: impl Into<String>, data: Value, props: Props) -> Result<()> {
		let channel = channel.into();
		Ok(self
			.with_session(move |session: &mut Session| session.publish_with(&channel, data, &props))
			.await??)
	}

	pub async fn subscribe<F>(&self, channel: impl Into<String>, callback: F) -> Result<ListenerHandle>
	where
		F: FnMut(&mut Session, &Message) -> ListenerResult + Send + 'static,
	{
		let channel = channel.into();
		Ok(self
			.with_session(move |session: &mut Session| session.subscribe(&channel, callback))
			.await??)
	}

	pub async fn unsubscribe(&self, handle: ListenerHandle) -> Result<()> {
		Ok(self.with_session(move |session: &mut Session| session.unsubscribe(&handle)).await??)
	}

	pub async fn add_listener<F>(&self, channel: impl Into<String>, callback: F) -> Result<ListenerHandle>
	where
		F: FnMut(&mut Session, &Message) -> ListenerResult + Send + 'static,
	{
		let channel = channel.into();
		Ok(self
			.with_session(move |session: &mut Session| session.add_listener(&channel, callback))
			.await??)
	}

	pub async fn remove_listener(&self, handle: ListenerHandle) -> Result<bool> {
		self.with_session(move |session: &mut Session| session.remove_listener(&handle)).await
	}

	pub async fn register_extension(&self, name: impl Into<String>, extension: impl Extension + 'static) -> Result<bool> {
		let name = name.into();
		self.with_session(move |session: &mut Session| session.register_extension(&name, extension))
			.await
	}

	pub async fn disconnect(&self) -> Result<()> {
		Ok(self.with_session(Session::disconnect).await??)
	}

	pub async fn status(&self) -> Result<ConnectionStatus> {
		self.with_session(|session: &mut Session| session.status()).await
	}

	pub async fn client_id(&self) -> Result<Option<String>> {
		self.with_session(|session: &mut Session| session.client_id().map(str::to_string))
			.await
	}

	/// Subscribes to `channel` and streams its messages.
	pub async fn listen(&self, channel: impl Into<String>) -> Result<(ListenerHandle, mpsc::UnboundedReceiver<Message>)> {
		let (tx, rx) = mpsc::unbounded_channel();
		let handle = self.subscribe(channel, forward(tx)).await?;
		Ok((handle, rx))
	}

	/// Streams messages of `channel` without subscribing on the server.
	/// Meant for `/meta/*` channels and wildcards.
	pub async fn watch(&self, channel: impl Into<String>) -> Result<(ListenerHandle, mpsc::UnboundedReceiver<Message>)> {
		let (tx, rx) = mpsc::unbounded_channel();
		let handle = self.add_listener(channel, forward(tx)).await?;
		Ok((handle, rx))
	}

	/// Aborts the session and stops the driver.
	pub fn shutdown(&self) -> Result<()> {
		self.commands.send(Command::Shutdown).map_err(|_| Error::ChannelClosed)
	}
}

fn forward(tx: mpsc::UnboundedSender<Message>) -> impl FnMut(&mut Session, &Message) -> ListenerResult + Send + 'static {
	move |_: &mut Session, message: &Message| {
		// A dropped receiver only means nobody is reading anymore.
		let _ = tx.send(message.clone());
		Ok(())
	}
}

pub struct ClientBuilder {
	config: Config,
	websocket: bool,
	transports: Vec<(String, Box<dyn Transport>)>,
	inputs: mpsc::UnboundedSender<Input>,
	receiver: mpsc::UnboundedReceiver<Input>,
}

impl ClientBuilder {
	pub fn new(config: Config) -> Self {
		let (inputs, receiver) = mpsc::unbounded_channel();
		Self {
			config,
			websocket: false,
			transports: Vec::new(),
			inputs,
			receiver,
		}
	}

	/// Puts the WebSocket transport ahead of the HTTP ones.
	pub fn websocket(mut self, enabled: bool) -> Self {
		self.websocket = enabled;
		self
	}

	/// Registers `transport` in place of the default set. Call order is
	/// negotiation priority.
	pub fn transport(mut self, transport_type: &str, transport: Box<dyn Transport>) -> Self {
		self.transports.push((transport_type.to_string(), transport));
		self
	}

	/// Sink feeding the driver this builder will produce, for custom
	/// transports that perform real I/O.
	pub fn sink(&self) -> EventSink {
		EventSink {
			inputs: self.inputs.clone(),
		}
	}

	#[cfg(test)]
	pub(crate) fn into_receiver(self) -> mpsc::UnboundedReceiver<Input> {
		self.receiver
	}

	pub fn build(self) -> Result<(Client, Driver)> {
		let sink = self.sink();
		let (commands, command_receiver) = mpsc::unbounded_channel();
		let mut session = Session::new(self.config, TokioScheduler::new(sink.clone()))?;
		let transports = if self.transports.is_empty() {
			default_transports(&sink, self.websocket)?
		} else {
			self.transports
		};
		for (transport_type, transport) in transports {
			session.register_transport(&transport_type, transport, None);
		}
		debug!(target = "bayeux.runtime", transports = ?session.transport_types(), "client built");
		Ok((Client { commands }, Driver {
			session,
			commands: command_receiver,
			inputs: self.receiver,
		}))
	}
}

fn default_transports(sink: &EventSink, websocket: bool) -> Result<Vec<(String, Box<dyn Transport>)>> {
	let mut transports: Vec<(String, Box<dyn Transport>)> = Vec::new();
	if websocket {
		transports.push((WEBSOCKET.to_string(), Box::new(WebSocketTransport::new(TungsteniteSockets::new(sink.clone())))));
	}
	transports.push((LONG_POLLING.to_string(), Box::new(transport::long_polling(ReqwestExchange::new(sink.clone())?))));
	transports.push((CALLBACK_POLLING.to_string(), Box::new(transport::callback_polling(ReqwestExchange::new(sink.clone())?))));
	Ok(transports)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_transports_follow_the_websocket_flag() {
		let builder = ClientBuilder::new(Config::new("http://localhost/cometd"));
		let sink = builder.sink();

		let types: Vec<_> = default_transports(&sink, false).unwrap().into_iter().map(|(name, _)| name).collect();
		assert_eq!(types, vec![LONG_POLLING, CALLBACK_POLLING]);

		let types: Vec<_> = default_transports(&sink, true).unwrap().into_iter().map(|(name, _)| name).collect();
		assert_eq!(types, vec![WEBSOCKET, LONG_POLLING, CALLBACK_POLLING]);
	}

	#[test]
	fn invalid_config_fails_the_build() {
		let result = ClientBuilder::new(Config::new("ftp://localhost/cometd")).build();
		assert!(matches!(result, Err(Error::Session(bayeux::Error::Config(_)))));
	}

	#[tokio::test]
	async fn calls_fail_once_the_driver_is_gone() {
		let (client, driver) = Client::builder(Config::new("http://localhost/cometd")).build().unwrap();
		let task = driver.spawn();
		assert_eq!(client.status().await.unwrap(), ConnectionStatus::Disconnected);

		client.shutdown().unwrap();
		task.await.unwrap();
		assert!(matches!(client.status().await, Err(Error::ChannelClosed)));
	}
}
