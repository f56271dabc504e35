//! Delayed execution, injected into the session.
//!
//! The engine never sleeps. It asks a [`Scheduler`] to fire a [`Timer`]
//! later; whoever drives the session hands the firing back through
//! [`Session::fire`](crate::Session::fire).

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl std::fmt::Display for TimerId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "timer#{}", self.0)
	}
}

/// What a timer is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timer {
	/// The session's pending handshake or connect retry.
	Session,
	/// A timeout owned by a transport; `token` is meaningful only to it.
	Transport { transport: String, token: u64 },
}

pub trait Scheduler: Send {
	fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerId;

	/// Cancelling an unknown or already fired timer is a no-op.
	fn cancel(&mut self, id: TimerId);
}
