use anyhow::Result;
use bayeux::{ListenerResult, Message, Session, channel};
use bayeux_runtime::Client;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub async fn execute(client: &Client, channels: &[String], count: Option<usize>) -> Result<()> {
	info!(target = "bayeux.cli", ?channels, ?count, "listen");

	let (_handle, mut handshakes) = client.watch(channel::HANDSHAKE).await?;
	client.handshake().await?;

	let (tx, mut messages) = mpsc::unbounded_channel::<Message>();
	for name in channels {
		let tx = tx.clone();
		let forward = move |_: &mut Session, message: &Message| -> ListenerResult {
			let _ = tx.send(message.clone());
			Ok(())
		};
		// Meta channels only get a local listener.
		if channel::is_meta(name) {
			client.add_listener(name.as_str(), forward).await?;
		} else {
			client.subscribe(name.as_str(), forward).await?;
		}
	}
	drop(tx);

	let interrupt = tokio::signal::ctrl_c();
	tokio::pin!(interrupt);
	let mut received = 0usize;
	loop {
		tokio::select! {
			message = messages.recv() => {
				let Some(message) = message else {
					break;
				};
				println!("{}", serde_json::to_string(&message)?);
				received += 1;
				if count.is_some_and(|count| received >= count) {
					break;
				}
			}
			Some(handshake) = handshakes.recv() => {
				if !handshake.is_successful() {
					let reason = handshake.error.as_deref().or_else(|| handshake.field("reason").and_then(|reason| reason.as_str()));
					warn!(target = "bayeux.cli", reason = reason.unwrap_or("unknown"), "handshake failed, retrying");
				}
			}
			_ = &mut interrupt => {
				info!(target = "bayeux.cli", received, "interrupted");
				break;
			}
		}
	}

	super::disconnect(client).await
}
