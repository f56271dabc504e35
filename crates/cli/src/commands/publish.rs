use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use bayeux::channel;
use bayeux_runtime::Client;
use serde_json::Value;
use tracing::info;

pub async fn execute(client: &Client, name: &str, data: &str, timeout_ms: u64) -> Result<()> {
	let data: Value = serde_json::from_str(data).with_context(|| format!("DATA is not valid JSON: {data}"))?;
	info!(target = "bayeux.cli", channel = name, "publish");

	let (_handle, mut acks) = client.watch(channel::PUBLISH).await?;
	client.handshake().await?;
	client.publish(name, data).await?;

	let ack = tokio::time::timeout(Duration::from_millis(timeout_ms), acks.recv())
		.await
		.map_err(|_| anyhow!("no acknowledgement for {name} within {timeout_ms}ms"))?
		.ok_or_else(|| anyhow!("client stopped before {name} was acknowledged"))?;

	super::disconnect(client).await?;

	if !ack.is_successful() {
		let reason = ack
			.error
			.clone()
			.or_else(|| ack.field("reason").and_then(Value::as_str).map(str::to_string))
			.unwrap_or_else(|| "unknown error".to_string());
		bail!("publish to {name} failed: {reason}");
	}
	println!("{}", serde_json::to_string(&ack)?);
	Ok(())
}
