use std::collections::HashMap;
use std::time::Duration;

use bayeux::{Scheduler, Timer, TimerId};
use tokio::task::AbortHandle;
use tracing::trace;

use crate::driver::EventSink;

/// [`Scheduler`] backed by tokio sleeps. A fired timer is posted to the
/// driver; cancelling aborts the sleeping task.
pub struct TokioScheduler {
	sink: EventSink,
	next_id: u64,
	sleepers: HashMap<TimerId, AbortHandle>,
}

impl TokioScheduler {
	pub fn new(sink: EventSink) -> Self {
		Self {
			sink,
			next_id: 0,
			sleepers: HashMap::new(),
		}
	}

	/// Timers scheduled and not yet fired or cancelled.
	pub fn pending(&self) -> usize {
		self.sleepers.values().filter(|sleeper| !sleeper.is_finished()).count()
	}
}

impl Scheduler for TokioScheduler {
	fn schedule(&mut self, delay: Duration, timer: Timer) -> TimerId {
		self.sleepers.retain(|_, sleeper| !sleeper.is_finished());
		self.next_id += 1;
		let id = TimerId(self.next_id);
		trace!(target = "bayeux.runtime", %id, delay_ms = delay.as_millis() as u64, "timer scheduled");

		let sink = self.sink.clone();
		let task = tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			sink.timer(id, timer);
		});
		self.sleepers.insert(id, task.abort_handle());
		id
	}

	fn cancel(&mut self, id: TimerId) {
		if let Some(sleeper) = self.sleepers.remove(&id) {
			sleeper.abort();
		}
	}
}

impl Drop for TokioScheduler {
	fn drop(&mut self) {
		for sleeper in self.sleepers.values() {
			sleeper.abort();
		}
	}
}
