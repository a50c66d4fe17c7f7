mod common;

use std::{sync::Arc, time::Duration};

use bayeux_client::{
    Advice, BayeuxError, ClientEvent, ClientOptions, ClientStatus, EventMatch, ListenerMatch,
    Message, Reconnect, EVENT_EXTENSION_EXCEPTION, EVENT_LISTENER_EXCEPTION,
};
use common::*;
use parking_lot::Mutex;
use serde_json::json;

fn handshake_response() -> Message {
    Message::new()
        .with_channel("/meta/handshake")
        .with_successful(true)
        .with_client_id(CLIENT_ID)
        .with_supported_connection_types(&[TRANSPORT.to_owned()])
        .with_version("1.0")
}

#[tokio::test]
async fn handshake_happy_path() {
    let Fixture { client, transport } = mock_client();
    assert_eq!(client.status(), ClientStatus::Unconnected);

    client.handshake(None);
    assert_eq!(client.status(), ClientStatus::Handshaking);

    let batches = transport.batches();
    assert_eq!(batches.len(), 1);
    let handshake = &batches[0][0];
    assert_eq!(handshake.channel().unwrap(), "/meta/handshake");
    assert_eq!(handshake.version(), Some("1.0"));
    assert_eq!(handshake.get(Message::MINIMUM_VERSION), Some(&json!("0.9")));
    assert_eq!(handshake.supported_connection_types(), [TRANSPORT]);
    assert_eq!(handshake.id(), Some("1"));
    assert_eq!(handshake.client_id(), None);
    let advice = handshake.advice().unwrap();
    assert_eq!(advice.timeout, Some(60_000));
    assert_eq!(advice.interval, Some(0));
    assert_eq!(advice.reconnect, None);

    transport.receive(vec![handshake_response()]);

    // The successful handshake triggers the first connect, held open for
    // zero time so listeners observe the connected state promptly.
    assert_eq!(client.status(), ClientStatus::Connected);
    assert_eq!(client.client_id().as_deref(), Some(CLIENT_ID));
    assert_eq!(client.transport_name().as_deref(), Some(TRANSPORT));
    let batches = transport.batches();
    assert_eq!(batches.len(), 2);
    let connect = &batches[1][0];
    assert_eq!(connect.channel().unwrap(), "/meta/connect");
    assert_eq!(connect.client_id(), Some(CLIENT_ID));
    assert_eq!(connect.connection_type(), Some(TRANSPORT));
    assert_eq!(connect.id(), Some("2"));
    assert_eq!(connect.advice().unwrap().timeout, Some(0));
}

#[tokio::test]
async fn connect_responses_keep_the_long_poll_going() {
    let Fixture { client, transport } = connected_client();
    transport.receive(vec![Message::new().with_channel("/meta/connect").with_successful(true)]);
    assert_eq!(client.status(), ClientStatus::Connected);
    // The follow-up connect is a held poll, no timeout override.
    let connect = transport.last_sent();
    assert_eq!(connect.channel().unwrap(), "/meta/connect");
    assert_eq!(connect.advice(), None);
}

#[tokio::test]
async fn publish_carries_data_properties_and_monotonic_ids() {
    let Fixture { client, transport } = connected_client();

    let properties = Message::new().with("room", "demo");
    client.channel("/t").publish("d", Some(&properties));
    client.channel("/t").publish("e", None);

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].channel().unwrap(), "/t");
    assert_eq!(sent[0].data(), Some(&json!("d")));
    assert_eq!(sent[0].client_id(), Some(CLIENT_ID));
    assert_eq!(sent[0].get("room"), Some(&json!("demo")));

    // Ids keep counting up from the setup exchanges, as strings.
    let first: u64 = sent[0].id().unwrap().parse().unwrap();
    let second: u64 = sent[1].id().unwrap().parse().unwrap();
    assert_eq!(second, first + 1);
}

#[tokio::test]
async fn assigned_ids_override_any_property() {
    let Fixture { client, transport } = connected_client();
    client.channel("/t").publish("d", Some(&Message::new().with_id("x")));
    assert_ne!(transport.last_sent().id(), Some("x"));
}

#[tokio::test]
async fn wildcard_listener_sees_concrete_channel() {
    let Fixture { client, transport } = connected_client();
    let (listener, log) = recording_listener();
    client.channel("/**").add_listener(listener);

    transport.receive(vec![Message::new().with_channel("/t/u").with_data(json!({"v": 1}))]);

    let log = log.lock();
    assert_eq!(log.len(), 1);
    let (channel, message) = &log[0];
    assert_eq!(*channel, "/t/u");
    assert_eq!(message.data(), Some(&json!({"v": 1})));
}

#[tokio::test]
async fn wildcard_notification_order_is_most_specific_first() {
    let Fixture { client, transport } = connected_client();
    let order = Arc::new(Mutex::new(Vec::new()));
    for id in ["/t/u", "/t/*", "/t/**", "/**"] {
        client.channel(id).add_listener(tagging_listener(id, order.clone()));
    }
    // Register out of order to prove delivery order comes from the wilds
    // enumeration, not registration.
    client.channel("/meta/unrelated").add_listener(tagging_listener("x", order.clone()));

    transport.receive(vec![Message::new().with_channel("/t/u").with_data("d")]);
    assert_eq!(*order.lock(), ["/t/u", "/t/*", "/t/**", "/**"]);
}

#[tokio::test]
async fn push_without_data_is_dropped() {
    let Fixture { client, transport } = connected_client();
    let (listener, log) = recording_listener();
    client.channel("/t").add_listener(listener);
    transport.receive(vec![Message::new().with_channel("/t")]);
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn subscriptions_only_fire_for_data_bearing_messages() {
    let Fixture { client, transport } = connected_client();
    let (listener, listener_log) = recording_listener();
    let (subscription, subscription_log) = recording_listener();
    let channel = client.channel("/meta/connect");
    channel.add_listener(listener);
    channel.subscribe(subscription, None);

    // A connect response reaches listeners on /meta/connect but carries no
    // data, so subscriptions stay quiet.
    transport.receive(vec![Message::new().with_channel("/meta/connect").with_successful(true)]);
    assert_eq!(listener_log.lock().len(), 1);
    assert!(subscription_log.lock().is_empty());
}

#[tokio::test]
async fn disconnect_fails_queued_messages() {
    let Fixture { client, transport } = mock_client();
    let (publish_listener, publish_log) = recording_listener();
    let (unsuccessful_listener, unsuccessful_log) = recording_listener();
    client.channel("/meta/publish").add_listener(publish_listener);
    client.channel("/meta/unsuccessful").add_listener(unsuccessful_listener);

    client.handshake(None);
    let queued = Message::new().with_channel("/t").with_data("d");
    client.send(queued.clone());
    // Still handshaking, so the message is held.
    assert_eq!(transport.sent().len(), 1);

    client.disconnect(None, false);
    transport
        .receive(vec![Message::new().with_channel("/meta/disconnect").with_successful(true)]);

    assert_eq!(client.status(), ClientStatus::Disconnected);
    let publish_log = publish_log.lock();
    assert_eq!(publish_log.len(), 1);
    let failure = &publish_log[0].1;
    assert_eq!(failure.successful(), Some(false));
    assert_eq!(failure.channel().unwrap(), "/t");
    assert_eq!(
        failure.exception(),
        Some(&BayeuxError::Status(ClientStatus::Disconnected))
    );
    assert_eq!(failure.request(), Some(&queued));
    let advice = failure.advice().unwrap();
    assert_eq!(advice.reconnect, Some(Reconnect::None));
    assert_eq!(advice.interval, Some(0));
    assert_eq!(unsuccessful_log.lock().len(), 1);
    assert_eq!(&unsuccessful_log.lock()[0].1, failure);
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_failures_back_off_and_retry() {
    let options = ClientOptions {
        backoff_period_increment: 40,
        ..ClientOptions::default()
    };
    let Fixture { client, transport } = connected_client_with_options(options);
    let (connect_listener, connect_log) = recording_listener();
    client.channel("/meta/connect").add_listener(connect_listener);

    let connect = Message::new().with_channel("/meta/connect").with_client_id(CLIENT_ID);
    client.fail_messages(vec![connect], BayeuxError::Timeout).unwrap();

    // The failure message reports the backoff in effect before this
    // failure bumped it.
    assert_eq!(client.backoff_period(), 40);
    {
        let log = connect_log.lock();
        assert_eq!(log.len(), 1);
        let advice = log[0].1.advice().unwrap();
        assert_eq!(advice.reconnect, Some(Reconnect::Retry));
        assert_eq!(advice.interval, Some(0));
        assert_eq!(log[0].1.exception(), Some(&BayeuxError::Timeout));
    }

    // The retry connect goes out after the backoff elapses.
    tokio::time::sleep(Duration::from_millis(160)).await;
    let retried = transport.sent();
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].channel().unwrap(), "/meta/connect");

    client.fail_messages(vec![retried[0].clone()], BayeuxError::Timeout).unwrap();
    assert_eq!(client.backoff_period(), 80);
    {
        let log = connect_log.lock();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].1.advice().unwrap().interval, Some(40));
    }

    tokio::time::sleep(Duration::from_millis(240)).await;
    assert_eq!(transport.sent().len(), 2);

    // A successful connect clears the backoff.
    transport.receive(vec![Message::new().with_channel("/meta/connect").with_successful(true)]);
    assert_eq!(client.backoff_period(), 0);
}

#[tokio::test]
async fn nested_batches_flush_once_in_order() {
    let Fixture { client, transport } = connected_client();
    {
        let _outer = client.batch();
        {
            let _inner = client.batch();
            client.channel("/t").publish("first", None);
            client.channel("/u").publish("second", None);
        }
        // Inner end must not flush while the outer batch is open.
        assert!(transport.batches().is_empty());
    }
    let batches = transport.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    assert_eq!(batches[0][0].data(), Some(&json!("first")));
    assert_eq!(batches[0][1].data(), Some(&json!("second")));
}

#[tokio::test]
async fn end_batch_without_start_fails() {
    let Fixture { client, .. } = connected_client();
    assert_eq!(client.end_batch(), Err(BayeuxError::Batch));
}

#[tokio::test]
async fn subscribe_sends_once_and_unsubscribe_on_last_removal() {
    let Fixture { client, transport } = connected_client();
    let channel = client.channel("/t");
    let (first, _) = recording_listener();
    let (second, _) = recording_listener();

    let first_id = channel.subscribe(first, None);
    let second_id = channel.subscribe(second, None);
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel().unwrap(), "/meta/subscribe");
    assert_eq!(sent[0].subscription().unwrap(), "/t");
    transport.clear();

    assert!(!channel.unsubscribe(ListenerMatch::Id(first_id + second_id), None));
    assert!(channel.unsubscribe(ListenerMatch::Id(first_id), None));
    assert!(transport.sent().is_empty());

    assert!(channel.unsubscribe(ListenerMatch::Id(second_id), None));
    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel().unwrap(), "/meta/unsubscribe");
    assert_eq!(sent[0].subscription().unwrap(), "/t");
}

#[tokio::test]
async fn subscribe_properties_ride_the_meta_message() {
    let Fixture { client, transport } = connected_client();
    let (subscription, _) = recording_listener();
    client
        .channel("/t")
        .subscribe(subscription, Some(&Message::new().with("room", "demo")));
    assert_eq!(transport.last_sent().get("room"), Some(&json!("demo")));
}

#[tokio::test]
async fn outgoing_extensions_run_in_registration_order() {
    let Fixture { client, transport } = connected_client();
    client.register_extension(MockExtension::new("a"));
    client.register_extension(MockExtension::new("b"));

    client.channel("/t").publish("d", None);
    assert_eq!(
        transport.last_sent().get(SEND_MARKERS),
        Some(&json!(["a", "b"]))
    );
}

#[tokio::test]
async fn incoming_extensions_run_reversed_by_default() {
    let Fixture { client, transport } = connected_client();
    client.register_extension(MockExtension::new("a"));
    client.register_extension(MockExtension::new("b"));
    let (listener, log) = recording_listener();
    client.channel("/t").add_listener(listener);

    transport.receive(vec![Message::new().with_channel("/t").with_data("d")]);
    assert_eq!(log.lock()[0].1.get(RECEIVE_MARKERS), Some(&json!(["b", "a"])));
}

#[tokio::test]
async fn incoming_extension_order_follows_the_option() {
    let options = ClientOptions { reverse_incoming_extensions: false, ..Default::default() };
    let Fixture { client, transport } = connected_client_with_options(options);
    client.register_extension(MockExtension::new("a"));
    client.register_extension(MockExtension::new("b"));
    let (listener, log) = recording_listener();
    client.channel("/t").add_listener(listener);

    transport.receive(vec![Message::new().with_channel("/t").with_data("d")]);
    assert_eq!(log.lock()[0].1.get(RECEIVE_MARKERS), Some(&json!(["a", "b"])));
}

#[tokio::test]
async fn failing_extension_drops_the_message_and_fires_the_event() {
    let Fixture { client, transport } = connected_client();
    let (events, event_log) = recording_event_listener();
    client.register_listener(EVENT_EXTENSION_EXCEPTION, events);
    client.register_extension(MockExtension::failing("bad"));
    client.register_extension(MockExtension::new("after"));

    client.channel("/t").publish("d", None);

    assert!(transport.sent().is_empty());
    let events = event_log.lock();
    assert_eq!(events.len(), 1);
    match &events[0] {
        ClientEvent::ExtensionException { message, error, outgoing } => {
            assert_eq!(message.channel().unwrap(), "/t");
            assert!(*outgoing);
            assert_eq!(error.to_string(), "mock extension failure");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn cancelling_extension_skips_the_rest_of_the_chain() {
    let Fixture { client, transport } = connected_client();
    client.register_extension(DropExtension::new());
    client.register_extension(MockExtension::new("after"));
    client.channel("/t").publish("d", None);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn unregistered_extension_stops_running() {
    let Fixture { client, transport } = connected_client();
    let extension = MockExtension::new("a");
    let handle: Arc<dyn bayeux_client::Extension> = extension;
    client.register_extension(handle.clone());
    assert!(client.unregister_extension(&handle));
    assert!(!client.unregister_extension(&handle));

    client.channel("/t").publish("d", None);
    assert_eq!(transport.last_sent().get(SEND_MARKERS), None);
}

#[tokio::test]
async fn failing_listener_is_reported_and_skipped() {
    let Fixture { client, transport } = connected_client();
    let (events, event_log) = recording_event_listener();
    client.register_listener(EVENT_LISTENER_EXCEPTION, events);
    let bad_id = client.channel("/t").add_listener(failing_listener());
    let (good, good_log) = recording_listener();
    client.channel("/t").add_listener(good);

    transport.receive(vec![Message::new().with_channel("/t").with_data("d")]);

    // The failure never broke iteration.
    assert_eq!(good_log.lock().len(), 1);
    let events = event_log.lock();
    assert_eq!(events.len(), 1);
    match &events[0] {
        ClientEvent::ListenerException { listener_id, error, .. } => {
            assert_eq!(*listener_id, bad_id);
            assert_eq!(error.to_string(), "listener failure");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn handshake_failures_back_off_and_rehandshake() {
    let options = ClientOptions {
        backoff_period_increment: 40,
        ..ClientOptions::default()
    };
    let Fixture { client, transport } = mock_client_with_options(options);
    let (handshake_listener, handshake_log) = recording_listener();
    client.channel("/meta/handshake").add_listener(handshake_listener);

    client.handshake(None);
    transport
        .receive(vec![Message::new().with_channel("/meta/handshake").with_successful(false)]);

    assert_eq!(client.status(), ClientStatus::Rehandshaking);
    assert_eq!(client.backoff_period(), 40);
    assert_eq!(handshake_log.lock().len(), 1);

    tokio::time::sleep(Duration::from_millis(160)).await;
    // The retried handshake went out.
    assert_eq!(transport.sent().len(), 2);
    assert_eq!(client.status(), ClientStatus::Handshaking);
}

#[tokio::test]
async fn reconnect_none_advice_disconnects() {
    let Fixture { client, transport } = connected_client();
    transport.receive(vec![Message::new()
        .with_channel("/meta/connect")
        .with_successful(true)
        .with_advice(&Advice::new().with_reconnect(Reconnect::None))]);
    assert_eq!(client.status(), ClientStatus::Disconnected);
    assert_eq!(client.client_id(), None);
}

#[tokio::test]
async fn reconnect_handshake_advice_resets_and_rehandshakes() {
    let Fixture { client, transport } = connected_client();
    let resets_before = transport.resets();

    transport.receive(vec![Message::new()
        .with_channel("/meta/connect")
        .with_successful(false)
        .with_advice(&Advice::new().with_reconnect(Reconnect::Handshake))]);

    // Zero interval and zero backoff make the re-handshake immediate.
    assert_eq!(client.status(), ClientStatus::Handshaking);
    assert_eq!(client.backoff_period(), 0);
    assert!(transport.resets() > resets_before);
    let handshake = transport.last_sent();
    assert_eq!(handshake.channel().unwrap(), "/meta/handshake");
    // The re-handshake effective advice goes back to retry so a successful
    // handshake is followed by a connect.
    assert_eq!(client.advice().reconnect, Some(Reconnect::Retry));
}

#[tokio::test]
async fn unknown_reconnect_advice_is_an_action_error() {
    let Fixture { client: _keep_alive, transport } = connected_client();
    let error = transport
        .receive_result(vec![Message::new()
            .with_channel("/meta/connect")
            .with_successful(true)
            .with_advice(&Advice::new().with_reconnect(Reconnect::Unknown("bounce".into())))])
        .unwrap_err();
    assert_eq!(error, BayeuxError::Action("bounce".into()));
}

#[tokio::test]
async fn handshake_with_no_common_transport_fails_negotiation() {
    let Fixture { client, transport } = mock_client();
    client.handshake(None);
    let error = transport
        .receive_result(vec![Message::new()
            .with_channel("/meta/handshake")
            .with_successful(true)
            .with_client_id(CLIENT_ID)
            .with_supported_connection_types(&["websocket".to_owned()])
            .with_version("1.0")])
        .unwrap_err();
    assert_eq!(
        error,
        BayeuxError::TransportNegotiation {
            client_types: vec![TRANSPORT.to_owned()],
            server_types: vec!["websocket".to_owned()],
        }
    );
}

#[tokio::test]
async fn sending_while_unconnected_fails_with_status_error() {
    let Fixture { client, transport } = mock_client();
    let (publish_listener, publish_log) = recording_listener();
    client.channel("/meta/publish").add_listener(publish_listener);

    client.send(Message::new().with_channel("/t").with_data("d"));

    assert!(transport.sent().is_empty());
    let log = publish_log.lock();
    assert_eq!(log.len(), 1);
    assert_eq!(
        log[0].1.exception(),
        Some(&BayeuxError::Status(ClientStatus::Unconnected))
    );
}

#[tokio::test]
async fn failed_disconnect_aborts_the_transport() {
    let Fixture { client, transport } = connected_client();
    client.disconnect(None, false);
    transport
        .receive(vec![Message::new().with_channel("/meta/disconnect").with_successful(false)]);
    assert_eq!(client.status(), ClientStatus::Disconnected);
    assert_eq!(transport.aborts(), 1);
}

#[tokio::test]
async fn messages_queued_while_handshaking_flush_after_connect() {
    let Fixture { client, transport } = mock_client();
    client.handshake(None);
    client.channel("/t").publish("held", None);
    assert_eq!(transport.sent().len(), 1);

    transport.receive(vec![handshake_response()]);

    // Batches: handshake, first connect, then the flushed queue.
    let batches = transport.batches();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[2][0].channel().unwrap(), "/t");
    assert_eq!(batches[2][0].data(), Some(&json!("held")));
    assert_eq!(batches[2][0].client_id(), Some(CLIENT_ID));
}

#[tokio::test]
async fn successful_publish_receipt_notifies_meta_publish() {
    let Fixture { client, transport } = connected_client();
    let (listener, log) = recording_listener();
    client.channel("/meta/publish").add_listener(listener);
    transport.receive(vec![Message::new().with_channel("/t").with_successful(true)]);
    let log = log.lock();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].0, "/meta/publish");
}

#[tokio::test]
async fn unsuccessful_publish_receipt_reports_a_failed_publish() {
    let Fixture { client, transport } = connected_client();
    let (publish_listener, publish_log) = recording_listener();
    let (unsuccessful_listener, unsuccessful_log) = recording_listener();
    client.channel("/meta/publish").add_listener(publish_listener);
    client.channel("/meta/unsuccessful").add_listener(unsuccessful_listener);

    transport.receive(vec![Message::new()
        .with_channel("/t")
        .with_successful(false)
        .with("error", "403:denied")]);

    assert_eq!(publish_log.lock().len(), 1);
    assert_eq!(unsuccessful_log.lock().len(), 1);
}

#[tokio::test]
async fn subscribe_responses_notify_meta_subscribe() {
    let Fixture { client, transport } = connected_client();
    let (listener, log) = recording_listener();
    client.channel("/meta/subscribe").add_listener(listener);
    transport.receive(vec![Message::new()
        .with_channel("/meta/subscribe")
        .with_successful(true)
        .with_subscription("/t")]);
    assert_eq!(log.lock().len(), 1);
}

#[tokio::test]
async fn event_listener_matchers() {
    let Fixture { client, .. } = mock_client();
    let (callback, log) = recording_event_listener();

    let id = client.register_listener(EVENT_EXTENSION_EXCEPTION, callback.clone());
    assert!(client.unregister_listener(EventMatch::Id(id)));
    assert!(!client.unregister_listener(EventMatch::Id(id)));

    client.register_listener(EVENT_EXTENSION_EXCEPTION, callback.clone());
    client.register_listener(EVENT_LISTENER_EXCEPTION, callback.clone());
    assert!(client.unregister_listener(EventMatch::Callback(&callback)));
    assert!(!client.unregister_listener(EventMatch::Event(EVENT_EXTENSION_EXCEPTION)));

    client.register_listener(EVENT_EXTENSION_EXCEPTION, callback.clone());
    assert!(client.unregister_listener(EventMatch::Event(EVENT_EXTENSION_EXCEPTION)));
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn duplicate_transport_names_are_rejected() {
    let Fixture { client, .. } = mock_client();
    assert!(!client.register_transport(MockTransport::new(TRANSPORT)).unwrap());
    assert_eq!(client.known_transports(), [TRANSPORT]);
    assert!(client.transport(TRANSPORT).is_some());
    assert!(client.unregister_transport(TRANSPORT).is_some());
    assert!(client.transport(TRANSPORT).is_none());
}

#[tokio::test]
async fn rehandshaking_clears_subscriptions_and_session() {
    let Fixture { client, transport } = connected_client();
    let (subscription, log) = recording_listener();
    client.channel("/t").subscribe(subscription, None);
    transport.clear();

    client.handshake(None);
    assert_eq!(client.client_id(), None);
    assert!(!client.channel("/t").has_subscriptions());

    transport.receive(vec![handshake_response()]);
    transport.receive(vec![Message::new().with_channel("/t").with_data("d")]);
    // The old subscription is gone; nothing is delivered to it.
    assert!(log.lock().is_empty());
}
