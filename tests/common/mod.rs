#![allow(dead_code)]

use std::sync::Arc;

use bayeux_client::{
    BayeuxError, ChannelId, Client, ClientEvent, ClientOptions, EventCallback, Extension,
    ExtensionError, ListenerCallback, Message, Transport,
};
use parking_lot::Mutex;
use serde_json::Value;

/// A transport that records every batch it is asked to send and lets tests
/// play the server by feeding responses back into the client.
#[derive(Debug)]
pub struct MockTransport {
    name: String,
    only_versions: Option<Vec<String>>,
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    client: Option<Client>,
    batches: Vec<Vec<Message>>,
    resets: usize,
    aborts: usize,
}

impl MockTransport {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            only_versions: None,
            state: Mutex::new(MockState::default()),
        })
    }

    pub fn only_versions(name: &str, versions: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            only_versions: Some(versions.iter().map(|version| (*version).to_owned()).collect()),
            state: Mutex::new(MockState::default()),
        })
    }

    /// Feeds server messages into the registered client, panicking on
    /// processing errors.
    pub fn receive(&self, messages: Vec<Message>) {
        self.receive_result(messages).expect("receiving messages failed");
    }

    /// Feeds server messages into the registered client.
    pub fn receive_result(&self, messages: Vec<Message>) -> Result<(), BayeuxError> {
        let client = self.state.lock().client.clone().expect("transport not registered");
        client.receive_messages(messages)
    }

    /// Every batch passed to `send`, oldest first.
    pub fn batches(&self) -> Vec<Vec<Message>> {
        self.state.lock().batches.clone()
    }

    /// Every sent message, flattened.
    pub fn sent(&self) -> Vec<Message> {
        self.state.lock().batches.iter().flatten().cloned().collect()
    }

    pub fn last_sent(&self) -> Message {
        self.sent().last().cloned().expect("nothing was sent")
    }

    pub fn clear(&self) {
        self.state.lock().batches.clear();
    }

    pub fn resets(&self) -> usize {
        self.state.lock().resets
    }

    pub fn aborts(&self) -> usize {
        self.state.lock().aborts
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn accept(&self, bayeux_version: &str) -> bool {
        self.only_versions
            .as_ref()
            .map_or(true, |versions| versions.iter().any(|version| version == bayeux_version))
    }

    fn register(&self, client: Client, _url: &str) -> Result<(), BayeuxError> {
        self.state.lock().client = Some(client);
        Ok(())
    }

    fn unregister(&self) {
        self.state.lock().client = None;
    }

    fn reset(&self) {
        self.state.lock().resets += 1;
    }

    fn abort(&self) {
        self.state.lock().aborts += 1;
    }

    fn send(&self, messages: Vec<Message>, _sync: bool) {
        self.state.lock().batches.push(messages);
    }
}

/// An extension that tags the messages passing through it, so ordering is
/// observable, and optionally fails.
#[derive(Debug)]
pub struct MockExtension {
    name: String,
    raise_exception: bool,
}

pub const SEND_MARKERS: &str = "__send_extensions__";
pub const RECEIVE_MARKERS: &str = "__receive_extensions__";

impl MockExtension {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self { name: name.to_owned(), raise_exception: false })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self { name: name.to_owned(), raise_exception: true })
    }

    fn mark(&self, message: &mut Message, field: &str) {
        let mut markers =
            message.get(field).and_then(Value::as_array).cloned().unwrap_or_default();
        markers.push(Value::from(self.name.as_str()));
        message.set(field, markers);
    }
}

impl Extension for MockExtension {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&self, mut message: Message) -> Result<Option<Message>, ExtensionError> {
        self.mark(&mut message, RECEIVE_MARKERS);
        if self.raise_exception {
            return Err("mock extension failure".into());
        }
        Ok(Some(message))
    }

    fn send(&self, mut message: Message) -> Result<Option<Message>, ExtensionError> {
        self.mark(&mut message, SEND_MARKERS);
        if self.raise_exception {
            return Err("mock extension failure".into());
        }
        Ok(Some(message))
    }
}

/// An extension that swallows every message.
#[derive(Debug)]
pub struct DropExtension;

impl DropExtension {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Extension for DropExtension {
    fn name(&self) -> &str {
        "drop"
    }

    fn receive(&self, _message: Message) -> Result<Option<Message>, ExtensionError> {
        Ok(None)
    }

    fn send(&self, _message: Message) -> Result<Option<Message>, ExtensionError> {
        Ok(None)
    }
}

pub type Notifications = Arc<Mutex<Vec<(ChannelId, Message)>>>;

/// A listener that records the concrete channel and message of every
/// delivery.
pub fn recording_listener() -> (ListenerCallback, Notifications) {
    let log: Notifications = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let callback: ListenerCallback = Arc::new(move |channel, message| {
        sink.lock().push((channel.channel_id().clone(), message.clone()));
        Ok(())
    });
    (callback, log)
}

/// A listener that records a tag into a shared log, for ordering checks.
pub fn tagging_listener(tag: &str, log: Arc<Mutex<Vec<String>>>) -> ListenerCallback {
    let tag = tag.to_owned();
    Arc::new(move |_channel, _message| {
        log.lock().push(tag.clone());
        Ok(())
    })
}

/// A listener that always fails.
pub fn failing_listener() -> ListenerCallback {
    Arc::new(|_channel, _message| Err("listener failure".into()))
}

pub type Events = Arc<Mutex<Vec<ClientEvent>>>;

/// An event-bus callback recording every fired event.
pub fn recording_event_listener() -> (EventCallback, Events) {
    let log: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let callback: EventCallback = Arc::new(move |_client, event| {
        sink.lock().push(event.clone());
    });
    (callback, log)
}

pub const CLIENT_URL: &str = "http://www.example.com/cometd";
pub const CLIENT_ID: &str = "client-1";
pub const TRANSPORT: &str = "mock";

pub struct Fixture {
    pub client: Client,
    pub transport: Arc<MockTransport>,
}

/// A client with the mock transport registered, not yet handshaken.
pub fn mock_client() -> Fixture {
    mock_client_with_options(ClientOptions::default())
}

pub fn mock_client_with_options(options: ClientOptions) -> Fixture {
    let client = Client::with_options(CLIENT_URL, options);
    let transport = MockTransport::new(TRANSPORT);
    assert!(client.register_transport(transport.clone()).unwrap());
    Fixture { client, transport }
}

/// A client walked through a successful handshake and first connect, with
/// the transport record wiped.
pub fn connected_client() -> Fixture {
    connected_client_with_options(ClientOptions::default())
}

pub fn connected_client_with_options(options: ClientOptions) -> Fixture {
    let fixture = mock_client_with_options(options);
    fixture.client.handshake(None);
    fixture.transport.receive(vec![Message::new()
        .with_channel("/meta/handshake")
        .with_successful(true)
        .with_client_id(CLIENT_ID)
        .with_supported_connection_types(&[TRANSPORT.to_owned()])
        .with_version("1.0")]);
    fixture.transport.receive(vec![Message::new()
        .with_channel("/meta/connect")
        .with_successful(true)]);
    fixture.transport.clear();
    fixture
}
