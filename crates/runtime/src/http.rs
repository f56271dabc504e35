//! reqwest-backed [`HttpExchange`].

use std::collections::HashMap;

use bayeux::BoxError;
use bayeux::transport::{Failure, HttpExchange, HttpRequest, RequestId, RequestStyle, TransportEvent};
use reqwest::header::CONTENT_TYPE;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::driver::EventSink;
use crate::error::Result;

const JSON_CONTENT_TYPE: &str = "application/json;charset=UTF-8";

/// Runs each exchange on its own task and posts the outcome to the driver.
/// Timeouts are enforced by the transport, so the client has none.
pub struct ReqwestExchange {
	client: reqwest::Client,
	sink: EventSink,
	transport_type: String,
	in_flight: HashMap<RequestId, AbortHandle>,
}

impl ReqwestExchange {
	pub fn new(sink: EventSink) -> Result<Self> {
		let client = reqwest::Client::builder().build()?;
		Ok(Self::with_client(client, sink))
	}

	pub fn with_client(client: reqwest::Client, sink: EventSink) -> Self {
		Self {
			client,
			sink,
			transport_type: String::new(),
			in_flight: HashMap::new(),
		}
	}

	fn request(&self, http: HttpRequest) -> reqwest::RequestBuilder {
		let mut builder = match http.style {
			RequestStyle::Body => self.client.post(&http.url).header(CONTENT_TYPE, JSON_CONTENT_TYPE).body(http.body),
			RequestStyle::Query => self.client.get(&http.url).query(&[("message", http.body.as_str())]),
		};
		for (name, value) in &http.headers {
			builder = builder.header(name.as_str(), value.as_str());
		}
		builder
	}
}

impl HttpExchange for ReqwestExchange {
	fn execute(&mut self, request: RequestId, http: HttpRequest) -> std::result::Result<(), BoxError> {
		self.in_flight.retain(|_, task| !task.is_finished());
		debug!(target = "bayeux.transport", transport = %self.transport_type, %request, url = %http.url, style = ?http.style, "http exchange");

		let builder = self.request(http);
		let sink = self.sink.clone();
		let transport = self.transport_type.clone();
		let task = tokio::spawn(async move {
			let result = perform(builder).await;
			sink.transport(&transport, TransportEvent::Response { request, result });
		});
		self.in_flight.insert(request, task.abort_handle());
		Ok(())
	}

	fn cancel(&mut self, request: RequestId) {
		if let Some(task) = self.in_flight.remove(&request) {
			debug!(target = "bayeux.transport", transport = %self.transport_type, %request, "http exchange cancelled");
			task.abort();
		}
	}

	fn registered(&mut self, transport_type: &str) {
		self.transport_type = transport_type.to_string();
	}
}

impl Drop for ReqwestExchange {
	fn drop(&mut self) {
		for task in self.in_flight.values() {
			task.abort();
		}
	}
}

async fn perform(builder: reqwest::RequestBuilder) -> std::result::Result<String, Failure> {
	let response = builder.send().await.map_err(|err| Failure::new("error").with_exception(err.to_string()))?;
	let status = response.status();
	if !status.is_success() {
		return Err(Failure::new("error").with_exception(format!("unexpected status {status}")));
	}
	response
		.text()
		.await
		.map_err(|err| Failure::new("error").with_exception(err.to_string()))
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use super::*;
	use crate::driver::ClientBuilder;

	fn exchange() -> ReqwestExchange {
		let builder = ClientBuilder::new(bayeux::Config::new("http://localhost/cometd"));
		ReqwestExchange::new(builder.sink()).unwrap()
	}

	fn http(style: RequestStyle) -> HttpRequest {
		HttpRequest {
			url: "http://localhost:8080/cometd/connect".to_string(),
			headers: BTreeMap::from([("X-Token".to_string(), "secret".to_string())]),
			body: r#"[{"channel":"/meta/connect"}]"#.to_string(),
			style,
		}
	}

	#[test]
	fn body_style_posts_json() {
		let request = exchange().request(http(RequestStyle::Body)).build().unwrap();
		assert_eq!(request.method(), reqwest::Method::POST);
		assert_eq!(request.url().as_str(), "http://localhost:8080/cometd/connect");
		assert_eq!(request.headers()[CONTENT_TYPE], JSON_CONTENT_TYPE);
		assert_eq!(request.headers()["x-token"], "secret");
		let body = request.body().and_then(|body| body.as_bytes()).unwrap();
		assert_eq!(body, br#"[{"channel":"/meta/connect"}]"#);
	}

	#[test]
	fn query_style_carries_the_batch_in_the_url() {
		let request = exchange().request(http(RequestStyle::Query)).build().unwrap();
		assert_eq!(request.method(), reqwest::Method::GET);
		let (name, value) = request.url().query_pairs().next().unwrap();
		assert_eq!(name, "message");
		assert_eq!(value, r#"[{"channel":"/meta/connect"}]"#);
		assert!(request.body().is_none());
	}
}
