use std::sync::Arc;

use bayeux::testing::{FakeTransportBuilder, FakeTransportController, ManualScheduler, SchedulerProbe, SentEnvelope};
use bayeux::{Config, Error, Message, Session, channel};
use parking_lot::Mutex;
use serde_json::{Value, json};

struct Harness {
	session: Session,
	timers: SchedulerProbe,
	transport: FakeTransportController,
}

/// A session whose handshake succeeded and whose first connect is in flight.
fn connected() -> Harness {
	let (scheduler, timers) = ManualScheduler::new();
	let mut session = Session::new(Config::new("http://localhost:8080/cometd"), scheduler).expect("config should be valid");
	let (transport, controller) = FakeTransportBuilder::new().build();
	session.register_transport("long-polling", Box::new(transport), None);
	let mut harness = Harness {
		session,
		timers,
		transport: controller,
	};

	harness.session.handshake().expect("handshake should start");
	let handshake = harness.take_one();
	harness.reply(&handshake, json!({"successful": true, "clientId": "c1", "supportedConnectionTypes": ["long-polling"]}));
	harness.timers.fire_session(&mut harness.session).expect("connect should be scheduled");
	harness.take_one();
	harness
}

fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> Box<dyn FnMut(&mut Session, &Message) -> bayeux::ListenerResult + Send>) {
	let trail = Arc::new(Mutex::new(Vec::new()));
	let sink = trail.clone();
	let make = move |label: &'static str| {
		let sink = sink.clone();
		Box::new(move |_: &mut Session, _: &Message| {
			sink.lock().push(label.to_string());
			Ok(())
		}) as Box<dyn FnMut(&mut Session, &Message) -> bayeux::ListenerResult + Send>
	};
	(trail, make)
}

impl Harness {
	fn take_one(&self) -> SentEnvelope {
		let mut sent = self.transport.take_sent();
		assert_eq!(sent.len(), 1, "expected exactly one envelope, got {sent:?}");
		sent.remove(0)
	}

	fn reply(&mut self, sent: &SentEnvelope, mut response: Value) {
		let object = response.as_object_mut().expect("response should be an object");
		object.entry("channel").or_insert_with(|| json!(sent.channels()[0]));
		object.entry("id").or_insert_with(|| json!(sent.message_id()));
		self.transport.respond(&mut self.session, sent.request, json!([response]));
	}

	fn deliver(&mut self, channel: &str, data: Value) {
		self.session.receive(Message::publish(channel, data));
	}
}

#[test]
fn first_subscription_sends_and_later_ones_do_not() {
	let mut harness = connected();
	let first = harness.session.subscribe("/chat", |_, _| Ok(())).unwrap();
	let sent = harness.take_one();
	assert_eq!(sent.channels(), vec![channel::SUBSCRIBE]);
	assert_eq!(sent.messages()[0].subscription.as_deref(), Some("/chat"));
	assert_eq!(sent.messages()[0].client_id.as_deref(), Some("c1"));

	let second = harness.session.subscribe("/chat", |_, _| Ok(())).unwrap();
	assert!(harness.transport.take_sent().is_empty());

	harness.session.unsubscribe(&first).unwrap();
	assert!(harness.transport.take_sent().is_empty());

	harness.session.unsubscribe(&second).unwrap();
	let sent = harness.take_one();
	assert_eq!(sent.channels(), vec![channel::UNSUBSCRIBE]);
	assert_eq!(sent.messages()[0].subscription.as_deref(), Some("/chat"));
}

#[test]
fn plain_listeners_suppress_the_subscribe_message() {
	let mut harness = connected();
	harness.session.add_listener("/chat", |_, _| Ok(())).unwrap();
	harness.session.subscribe("/chat", |_, _| Ok(())).unwrap();
	assert!(harness.transport.take_sent().is_empty());
}

#[test]
fn delivery_order_is_exact_then_wildcards() {
	let mut harness = connected();
	let (trail, make) = recorder();
	harness.session.add_listener("/**", make("root")).unwrap();
	harness.session.add_listener("/foo/*", make("star")).unwrap();
	harness.session.subscribe("/foo/bar", make("exact-1")).unwrap();
	harness.session.subscribe("/foo/bar", make("exact-2")).unwrap();
	harness.session.add_listener("/foo/**", make("deep")).unwrap();
	harness.session.add_listener("/foo/bar/baz", make("child")).unwrap();

	harness.deliver("/foo/bar", json!("hello"));
	assert_eq!(*trail.lock(), vec!["exact-1", "exact-2", "star", "deep", "root"]);
}

#[test]
fn failing_listener_does_not_stop_the_others() {
	let mut harness = connected();
	let (trail, make) = recorder();
	harness.session.add_listener("/chat", |_, _| Err("listener exploded".into())).unwrap();
	harness.session.add_listener("/chat", make("second")).unwrap();

	harness.deliver("/chat", json!(1));
	assert_eq!(*trail.lock(), vec!["second"]);
}

#[test]
fn listeners_can_remove_themselves_while_notified() {
	let mut harness = connected();
	let (trail, make) = recorder();
	let handle = Arc::new(Mutex::new(None));
	let own = handle.clone();
	let registered = harness
		.session
		.add_listener("/chat", move |session, _| {
			if let Some(handle) = own.lock().take() {
				session.remove_listener(&handle);
			}
			Ok(())
		})
		.unwrap();
	*handle.lock() = Some(registered);
	harness.session.add_listener("/chat", make("other")).unwrap();

	harness.deliver("/chat", json!(1));
	harness.deliver("/chat", json!(2));
	assert_eq!(*trail.lock(), vec!["other", "other"]);
}

#[test]
fn publish_acks_and_failures_reach_meta_listeners() {
	let mut harness = connected();
	let (trail, make) = recorder();
	harness.session.add_listener(channel::PUBLISH, make("publish")).unwrap();
	harness.session.add_listener(channel::UNSUCCESSFUL, make("unsuccessful")).unwrap();

	harness.session.publish("/chat", json!({"text": "hi"})).unwrap();
	let sent = harness.take_one();
	assert_eq!(sent.messages()[0].data, Some(json!({"text": "hi"})));
	harness.reply(&sent, json!({"successful": true}));

	harness.session.publish("/chat", json!({"text": "again"})).unwrap();
	let sent = harness.take_one();
	harness.reply(&sent, json!({"successful": false, "error": "403::denied"}));

	assert_eq!(*trail.lock(), vec!["publish", "publish", "unsuccessful"]);
}

#[test]
fn publish_requires_a_live_session_and_a_valid_channel() {
	let (scheduler, _timers) = ManualScheduler::new();
	let mut session = Session::new(Config::new("http://localhost/cometd"), scheduler).unwrap();
	assert!(matches!(session.publish("/chat", json!(1)), Err(Error::IllegalState(_))));
	assert!(matches!(session.subscribe("/chat", |_, _| Ok(())), Err(Error::IllegalState(_))));

	let mut harness = connected();
	assert!(matches!(harness.session.publish("chat", json!(1)), Err(Error::IllegalArgument(_))));
	assert!(matches!(harness.session.publish("/chat//room", json!(1)), Err(Error::IllegalArgument(_))));
	assert!(matches!(harness.session.add_listener("", |_, _| Ok(())), Err(Error::IllegalArgument(_))));
}

#[test]
fn nested_batches_flush_once_as_a_single_envelope() {
	let mut harness = connected();
	harness.session.start_batch();
	harness.session.start_batch();
	harness.session.publish("/a", json!(1)).unwrap();
	harness.session.publish("/b", json!(2)).unwrap();
	harness.session.end_batch().unwrap();
	assert!(harness.transport.take_sent().is_empty());

	harness.session.end_batch().unwrap();
	let sent = harness.take_one();
	assert_eq!(sent.channels(), vec!["/a", "/b"]);
	assert!(!sent.long_poll);

	assert!(matches!(harness.session.end_batch(), Err(Error::UnbalancedBatch)));
}

#[test]
fn batch_closure_groups_messages() {
	let mut harness = connected();
	harness
		.session
		.batch(|session| {
			session.publish("/a", json!(1))?;
			session.subscribe("/b", |_, _| Ok(())).map(|_| ())
		})
		.unwrap()
		.unwrap();
	assert_eq!(harness.take_one().channels(), vec!["/a", channel::SUBSCRIBE]);
}

#[test]
fn messages_sent_during_handshake_follow_it() {
	let (scheduler, timers) = ManualScheduler::new();
	let mut session = Session::new(Config::new("http://localhost/cometd"), scheduler).unwrap();
	let (transport, controller) = FakeTransportBuilder::new().build();
	session.register_transport("long-polling", Box::new(transport), None);
	session
		.add_listener(channel::HANDSHAKE, |session, message| {
			if message.is_successful() {
				session.subscribe("/news", |_, _| Ok(()))?;
			}
			Ok(())
		})
		.unwrap();

	session.handshake().unwrap();
	session.publish("/early", json!("queued")).unwrap();
	let mut harness = Harness {
		session,
		timers,
		transport: controller,
	};
	let handshake = harness.take_one();
	harness.reply(&handshake, json!({"successful": true, "clientId": "c9", "supportedConnectionTypes": ["long-polling"]}));

	let flushed = harness.take_one();
	assert_eq!(flushed.channels(), vec!["/early", channel::SUBSCRIBE]);
	// Ids were stamped at flush time, after the client id was known.
	assert!(flushed.messages().iter().all(|message| message.client_id.as_deref() == Some("c9")));
	assert!(harness.timers.take_session_timer().is_some());
}

#[test]
fn rehandshake_clears_subscriptions_but_keeps_listeners() {
	let mut harness = connected();
	let (trail, make) = recorder();
	harness.session.subscribe("/chat", make("subscription")).unwrap();
	harness.session.add_listener("/chat", make("listener")).unwrap();
	harness.take_one();

	harness.session.handshake().unwrap();
	harness.deliver("/chat", json!(1));
	assert_eq!(*trail.lock(), vec!["listener"]);
}

#[test]
fn clear_subscriptions_is_local_only() {
	let mut harness = connected();
	let (trail, make) = recorder();
	harness.session.subscribe("/chat", make("subscription")).unwrap();
	harness.take_one();

	harness.session.clear_subscriptions();
	assert!(harness.transport.take_sent().is_empty());
	harness.deliver("/chat", json!(1));
	assert!(trail.lock().is_empty());

	// With nothing registered the next subscribe goes to the server again.
	harness.session.subscribe("/chat", make("again")).unwrap();
	assert_eq!(harness.take_one().channels(), vec![channel::SUBSCRIBE]);
}

#[test]
fn messages_without_data_or_status_are_dropped() {
	let mut harness = connected();
	let (trail, make) = recorder();
	harness.session.add_listener("/chat", make("chat")).unwrap();
	harness.session.receive(Message::new("/chat"));
	assert!(trail.lock().is_empty());
}

#[test]
fn messages_received_from_a_listener_reach_that_listener_too() {
	let mut harness = connected();
	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = seen.clone();
	harness
		.session
		.add_listener("/chat", move |session: &mut Session, message: &Message| {
			sink.lock().push(message.data.clone());
			if message.data == Some(json!(1)) {
				session.receive(Message::publish("/chat", json!(2)));
				// Handled only after this callback returns.
				assert_eq!(sink.lock().len(), 1);
			}
			Ok(())
		})
		.unwrap();

	harness.deliver("/chat", json!(1));
	assert_eq!(*seen.lock(), vec![Some(json!(1)), Some(json!(2))]);
}
