mod listen;
mod publish;

use std::time::Duration;

use anyhow::Result;
use bayeux::{Config, channel};
use bayeux_runtime::Client;
use tracing::{debug, warn};

use crate::cli::{Cli, Commands};

/// How long to wait for the server to confirm `/meta/disconnect`.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

pub async fn dispatch(cli: Cli) -> Result<()> {
	let (client, driver) = Client::builder(config(&cli)).websocket(cli.websocket).build()?;
	let task = driver.spawn();

	let result = match cli.command {
		Commands::Listen { channels, count } => listen::execute(&client, &channels, count).await,
		Commands::Publish { channel, data, timeout_ms } => publish::execute(&client, &channel, &data, timeout_ms).await,
	};

	if client.shutdown().is_ok() {
		let _ = task.await;
	}
	result
}

fn config(cli: &Cli) -> Config {
	let mut config = Config::new(cli.url.as_str()).with_log_level(cli.log_level);
	for (name, value) in &cli.headers {
		config = config.with_request_header(name.as_str(), value.as_str());
	}
	config
}

/// Disconnects and waits briefly for the server's confirmation.
async fn disconnect(client: &Client) -> Result<()> {
	let (_handle, mut replies) = client.watch(channel::DISCONNECT).await?;
	client.disconnect().await?;
	match tokio::time::timeout(DISCONNECT_GRACE, replies.recv()).await {
		Ok(Some(reply)) if reply.is_successful() => debug!(target = "bayeux.cli", "disconnected"),
		Ok(_) => warn!(target = "bayeux.cli", "disconnect was not confirmed"),
		Err(_) => warn!(target = "bayeux.cli", grace_ms = DISCONNECT_GRACE.as_millis() as u64, "no disconnect reply"),
	}
	Ok(())
}
