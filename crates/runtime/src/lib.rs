//! Tokio runtime for the `bayeux` client engine.
//!
//! A [`Driver`] owns the [`Session`](bayeux::Session) on a single task and
//! feeds it API calls, timer firings and I/O completions in arrival order.
//! [`Client`] is the cloneable async handle applications use.
//!
//! ```ignore
//! let (client, driver) = Client::builder(Config::new("http://localhost:8080/cometd")).build()?;
//! tokio::spawn(driver.run());
//!
//! client.handshake().await?;
//! let (_handle, mut messages) = client.listen("/chat/demo").await?;
//! while let Some(message) = messages.recv().await {
//!     println!("{}", message.data.unwrap_or_default());
//! }
//! ```

pub mod driver;
pub mod error;
pub mod http;
pub mod scheduler;
pub mod websocket;

pub use driver::{Client, ClientBuilder, Driver, EventSink};
pub use error::{Error, Result};
pub use http::ReqwestExchange;
pub use scheduler::TokioScheduler;
pub use websocket::TungsteniteSockets;
