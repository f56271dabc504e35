//! Wire types for the Bayeux protocol.
//!
//! This crate contains the serde-serializable types exchanged with a Bayeux
//! (CometD) server. These types represent the "protocol layer": the shapes of
//! messages as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * Open: unrecognized fields survive a decode/encode cycle untouched
//! * Stable: Changes only when the wire protocol changes
//!
//! Session semantics (handshake, long-poll, retries) live in `bayeux-client`.

pub mod advice;
pub mod channel;
pub mod codec;
pub mod message;

pub use advice::*;
pub use codec::{decode, decode_value, encode};
pub use message::*;

/// Protocol version advertised in handshake requests.
pub const BAYEUX_VERSION: &str = "1.0";

/// Oldest protocol version this client is willing to speak.
pub const MINIMUM_VERSION: &str = "0.9";
