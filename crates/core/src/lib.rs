//! Bayeux (CometD) client engine.
//!
//! [`Session`] implements the client side of the Bayeux protocol: handshake,
//! long-poll connect, subscriptions, publishing, batching, server advice and
//! retry with backoff. The engine is free of I/O. HTTP exchanges, sockets and
//! timers are injected through [`transport::HttpExchange`],
//! [`transport::SocketFactory`] and [`Scheduler`], and their completions are
//! fed back through [`Session::handle_transport_event`] and [`Session::fire`].
//! The `bayeux-runtime` crate wires all of it onto tokio.

pub mod config;
pub mod error;
pub mod extension;
pub mod listener;
pub mod scheduler;
pub mod session;
pub mod testing;
pub mod transport;

pub use bayeux_protocol as protocol;
pub use bayeux_protocol::{Advice, Message, Props, Reconnect, channel};
pub use config::{Config, LogLevel};
pub use error::{BoxError, Error, Result};
pub use extension::{Extension, FilterResult, Filtered};
pub use listener::{ListenerHandle, ListenerResult};
pub use scheduler::{Scheduler, Timer, TimerId};
pub use session::{AdviceState, ConnectionStatus, Session};
pub use transport::{Failure, Transport, TransportEvent};
