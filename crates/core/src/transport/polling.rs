//! HTTP polling senders built on an injected [`HttpExchange`].

use std::collections::BTreeMap;

use bayeux_protocol::codec;
use tracing::debug;

use super::request::{RequestSender, RequestTransport};
use super::{Envelope, RequestId};
use crate::error::BoxError;

/// Longest URL callback-polling will produce, query string included.
pub const MAX_URL_LENGTH: usize = 2000;

/// Characters `encodeURI` keeps as they are beyond the unreserved set.
const URI_RESERVED: &[u8] = b";,/?:@&=+$!*'()#";

/// Length of `body` once escaped the way `encodeURI` escapes it.
fn escaped_len(body: &str) -> usize {
	let reserved = body.bytes().filter(|byte| URI_RESERVED.contains(byte)).count();
	urlencoding::encode(body).len() - 2 * reserved
}

/// Where the encoded messages travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStyle {
	/// JSON POST body.
	Body,
	/// `message` query parameter of a GET.
	Query,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
	pub url: String,
	pub headers: BTreeMap<String, String>,
	pub body: String,
	pub style: RequestStyle,
}

/// Performs HTTP exchanges. Completions are reported back to the session
/// as [`TransportEvent::Response`](super::TransportEvent::Response).
pub trait HttpExchange: Send {
	fn execute(&mut self, request: RequestId, http: HttpRequest) -> Result<(), BoxError>;

	fn cancel(&mut self, request: RequestId);

	fn registered(&mut self, transport_type: &str) {
		let _ = transport_type;
	}
}

/// JSON-over-POST sender. Refuses cross-domain servers once an exchange has
/// failed, until the next reset.
pub struct LongPolling<E> {
	exchange: E,
	supports_cross_domain: bool,
}

impl<E> LongPolling<E> {
	pub fn new(exchange: E) -> Self {
		Self {
			exchange,
			supports_cross_domain: true,
		}
	}

	pub fn exchange(&self) -> &E {
		&self.exchange
	}

	pub fn supports_cross_domain(&self) -> bool {
		self.supports_cross_domain
	}
}

impl<E: HttpExchange> RequestSender for LongPolling<E> {
	fn accept(&self, _version: &str, cross_domain: bool) -> bool {
		self.supports_cross_domain || !cross_domain
	}

	fn start(&mut self, request: RequestId, envelope: &Envelope, headers: &BTreeMap<String, String>) -> Result<(), BoxError> {
		let body = codec::encode(&envelope.messages)?;
		self.exchange.execute(
			request,
			HttpRequest {
				url: envelope.url.clone(),
				headers: headers.clone(),
				body,
				style: RequestStyle::Body,
			},
		)
	}

	fn cancel(&mut self, request: RequestId) {
		self.exchange.cancel(request);
	}

	fn failed(&mut self) {
		if self.supports_cross_domain {
			debug!(target = "bayeux.transport", "exchange failed, cross-domain requests disabled until reset");
		}
		self.supports_cross_domain = false;
	}

	fn reset(&mut self) {
		self.supports_cross_domain = true;
	}

	fn registered(&mut self, transport_type: &str) {
		self.exchange.registered(transport_type);
	}
}

/// GET-with-query sender. Works cross-domain, but a batch must fit in
/// [`MAX_URL_LENGTH`].
pub struct CallbackPolling<E> {
	exchange: E,
	transport_type: String,
}

impl<E> CallbackPolling<E> {
	pub fn new(exchange: E) -> Self {
		Self {
			exchange,
			transport_type: String::new(),
		}
	}

	pub fn exchange(&self) -> &E {
		&self.exchange
	}
}

impl<E: HttpExchange> RequestSender for CallbackPolling<E> {
	fn accept(&self, _version: &str, _cross_domain: bool) -> bool {
		true
	}

	fn start(&mut self, request: RequestId, envelope: &Envelope, headers: &BTreeMap<String, String>) -> Result<(), BoxError> {
		let body = codec::encode(&envelope.messages)?;
		let length = envelope.url.len() + escaped_len(&body);
		if length > MAX_URL_LENGTH {
			let reason = if envelope.messages.len() > 1 {
				format!(
					"Too many bayeux messages in the same batch resulting in message too big ({length} bytes, max is {MAX_URL_LENGTH}) for transport {}",
					self.transport_type
				)
			} else {
				format!("Bayeux message too big ({length} bytes, max is {MAX_URL_LENGTH}) for transport {}", self.transport_type)
			};
			return Err(reason.into());
		}
		self.exchange.execute(
			request,
			HttpRequest {
				url: envelope.url.clone(),
				headers: headers.clone(),
				body,
				style: RequestStyle::Query,
			},
		)
	}

	fn cancel(&mut self, request: RequestId) {
		self.exchange.cancel(request);
	}

	fn registered(&mut self, transport_type: &str) {
		self.transport_type = transport_type.to_string();
		self.exchange.registered(transport_type);
	}
}

pub fn long_polling<E: HttpExchange>(exchange: E) -> RequestTransport<LongPolling<E>> {
	RequestTransport::new(LongPolling::new(exchange))
}

pub fn callback_polling<E: HttpExchange>(exchange: E) -> RequestTransport<CallbackPolling<E>> {
	RequestTransport::new(CallbackPolling::new(exchange))
}
