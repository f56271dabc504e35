//! tokio-tungstenite [`SocketFactory`].
//!
//! Each socket is a task owning the stream. Frames to send travel over an
//! unbounded channel; open, incoming frames and close are posted to the
//! driver as [`TransportEvent::Socket`] events. Every socket reports exactly
//! one close, whether the connection failed, the server hung up or the
//! transport closed it.

use bayeux::BoxError;
use bayeux::transport::{Socket, SocketEvent, SocketFactory, SocketId, TransportEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as Frame;
use tracing::{debug, trace};

use crate::driver::EventSink;
use crate::error::Result;

enum Outgoing {
	Text(String),
	Close,
}

pub struct TungsteniteSockets {
	sink: EventSink,
	transport_type: String,
}

impl TungsteniteSockets {
	pub fn new(sink: EventSink) -> Self {
		Self {
			sink,
			transport_type: String::new(),
		}
	}
}

impl SocketFactory for TungsteniteSockets {
	fn open(&mut self, socket: SocketId, url: &str) -> std::result::Result<Box<dyn Socket>, BoxError> {
		let (outgoing, frames) = mpsc::unbounded_channel();
		let sink = self.sink.clone();
		let transport = self.transport_type.clone();
		let url = url.to_string();
		tokio::spawn(async move {
			if let Err(err) = run_socket(&url, socket, frames, &sink, &transport).await {
				debug!(target = "bayeux.transport", %transport, %url, error = %err, "websocket failed");
			}
			sink.transport(&transport, TransportEvent::Socket {
				socket,
				event: SocketEvent::Close,
			});
		});
		Ok(Box::new(TungsteniteSocket { outgoing }))
	}

	fn registered(&mut self, transport_type: &str) {
		self.transport_type = transport_type.to_string();
	}
}

struct TungsteniteSocket {
	outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl Socket for TungsteniteSocket {
	fn send(&mut self, text: &str) -> bool {
		self.outgoing.send(Outgoing::Text(text.to_string())).is_ok()
	}

	fn close(&mut self) {
		let _ = self.outgoing.send(Outgoing::Close);
	}
}

async fn run_socket(url: &str, socket: SocketId, mut frames: mpsc::UnboundedReceiver<Outgoing>, sink: &EventSink, transport: &str) -> Result<()> {
	let (stream, _) = tokio_tungstenite::connect_async(url).await?;
	sink.transport(transport, TransportEvent::Socket {
		socket,
		event: SocketEvent::Open,
	});
	let (mut write, mut read) = stream.split();

	loop {
		tokio::select! {
			outgoing = frames.recv() => match outgoing {
				Some(Outgoing::Text(text)) => write.send(Frame::Text(text.into())).await?,
				Some(Outgoing::Close) | None => {
					trace!(target = "bayeux.transport", %transport, "closing websocket");
					write.send(Frame::Close(None)).await?;
					return Ok(());
				}
			},
			incoming = read.next() => match incoming {
				Some(Ok(Frame::Text(text))) => sink.transport(transport, TransportEvent::Socket {
					socket,
					event: SocketEvent::Frame(text.to_string()),
				}),
				Some(Ok(Frame::Close(_))) | None => return Ok(()),
				Some(Ok(_)) => {}
				Some(Err(err)) => return Err(err.into()),
			},
		}
	}
}
