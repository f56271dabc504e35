//! Channel names and helpers.
//!
//! Channels are absolute, slash-separated paths. The `/meta/` namespace is
//! reserved for protocol control messages; a final `*` segment matches one
//! level and a final `**` segment matches any depth.

pub const HANDSHAKE: &str = "/meta/handshake";
pub const CONNECT: &str = "/meta/connect";
pub const DISCONNECT: &str = "/meta/disconnect";
pub const SUBSCRIBE: &str = "/meta/subscribe";
pub const UNSUBSCRIBE: &str = "/meta/unsubscribe";
/// Acknowledgement channel for application publishes.
pub const PUBLISH: &str = "/meta/publish";
/// Notified alongside any meta channel whenever a request fails.
pub const UNSUCCESSFUL: &str = "/meta/unsuccessful";

const META_PREFIX: &str = "/meta/";
const SERVICE_PREFIX: &str = "/service/";

/// Returns `true` for channels in the reserved `/meta/` namespace.
pub fn is_meta(channel: &str) -> bool {
	channel.starts_with(META_PREFIX)
}

/// Returns `true` for channels in the `/service/` namespace.
pub fn is_service(channel: &str) -> bool {
	channel.starts_with(SERVICE_PREFIX)
}

/// Returns `true` when the last segment is `*` or `**`.
pub fn is_wildcard(channel: &str) -> bool {
	channel.ends_with("/*") || channel.ends_with("/**")
}

/// Returns `true` for an absolute channel with no empty segments.
pub fn is_valid(channel: &str) -> bool {
	channel.len() > 1 && channel.starts_with('/') && !channel[1..].split('/').any(str::is_empty)
}
