use thiserror::Error;

/// Error type returned by listener and extension callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Usage errors surfaced synchronously by the session API.
///
/// Network failures and unsuccessful responses are never reported here;
/// they are delivered as messages to `/meta/*` listeners.
#[derive(Debug, Error)]
pub enum Error {
	#[error("Illegal state: {0}")]
	IllegalState(String),

	#[error("Illegal argument: {0}")]
	IllegalArgument(String),

	#[error("Calls to start_batch() and end_batch() are not paired")]
	UnbalancedBatch,

	#[error("Concurrent long-poll requests not allowed, request {active} not yet completed")]
	ConcurrentLongPoll { active: u64 },

	#[error("No registered transport accepts version {version} (cross-domain: {cross_domain})")]
	NoTransport { version: String, cross_domain: bool },

	#[error("Invalid configuration: {0}")]
	Config(String),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
