use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    advice::{Advice, Reconnect},
    channel::{Channel, ChannelState, ListenerError, ListenerId},
    channel_id::{
        ChannelId, META_CONNECT, META_DISCONNECT, META_HANDSHAKE, META_PUBLISH, META_SUBSCRIBE,
        META_UNSUBSCRIBE, META_UNSUCCESSFUL,
    },
    errors::BayeuxError,
    extensions::Extension,
    message::Message,
    status::ClientStatus,
    transports::{LongPollingTransport, Transport, TransportRegistry},
};

/// Bayeux protocol version spoken by this client.
pub const BAYEUX_VERSION: &str = "1.0";

/// Oldest Bayeux version the client will negotiate down to.
pub const MINIMUM_BAYEUX_VERSION: &str = "0.9";

/// Event fired when an extension hook fails.
pub const EVENT_EXTENSION_EXCEPTION: &str = "extension_exception";

/// Event fired when a channel listener or subscription fails.
pub const EVENT_LISTENER_EXCEPTION: &str = "listener_exception";

/// Configuration recognized by [`Client`].
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Amount added to the backoff period after each failure, in
    /// milliseconds.
    pub backoff_period_increment: u64,
    /// Upper bound on the backoff period, in milliseconds.
    pub maximum_backoff_period: u64,
    /// Apply incoming extensions in reverse registration order.
    pub reverse_incoming_extensions: bool,
    /// Advice defaults merged under whatever the server supplies.
    pub advice: Advice,
    /// Ask the server for message acknowledgements (used by the ack
    /// extension).
    pub ack_enabled: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            backoff_period_increment: 1000,
            maximum_backoff_period: 60_000,
            reverse_incoming_extensions: true,
            advice: Advice::new()
                .with_reconnect(Reconnect::Retry)
                .with_interval(0)
                .with_timeout(60_000),
            ack_enabled: true,
        }
    }
}

/// Payloads delivered on the client event bus.
#[derive(Clone, Debug)]
pub enum ClientEvent {
    /// An extension hook failed; the message was dropped from its pipeline.
    ExtensionException {
        /// The message the extension was applied to.
        message: Message,
        /// The error the extension returned.
        error: Arc<dyn std::error::Error + Send + Sync>,
        /// Whether the message was on its way out.
        outgoing: bool,
    },
    /// A channel listener or subscription failed during notification.
    ListenerException {
        /// The failing listener's id.
        listener_id: ListenerId,
        /// The message being delivered.
        message: Message,
        /// The error the listener returned.
        error: Arc<dyn std::error::Error + Send + Sync>,
    },
}

/// Callback invoked for client events.
pub type EventCallback = Arc<dyn Fn(&Client, &ClientEvent) + Send + Sync>;

/// Selects event listeners for removal.
pub enum EventMatch<'a> {
    /// A single listener by id.
    Id(ListenerId),
    /// Every listener for an event.
    Event(&'a str),
    /// Every registration of a callback, across events.
    Callback(&'a EventCallback),
    /// Every registration of a callback for one event.
    EventCallback(&'a str, &'a EventCallback),
}

#[derive(Clone)]
struct EventListener {
    id: ListenerId,
    callback: EventCallback,
}

/// What a scheduled delayed send does when it fires.
#[derive(Clone, Copy, Debug)]
enum DelayedWork {
    Connect,
    Handshake,
}

struct ClientState {
    status: ClientStatus,
    connected: bool,
    client_id: Option<String>,
    message_id: u64,
    advice: Advice,
    backoff_period: u64,
    scheduled_send: Option<JoinHandle<()>>,
    batch_id: u32,
    internal_batch: bool,
    message_queue: Vec<Message>,
    channels: HashMap<ChannelId, ChannelState>,
    transports: TransportRegistry,
    transport: Option<Arc<dyn Transport>>,
    extensions: Vec<Arc<dyn Extension>>,
    event_listeners: HashMap<String, Vec<EventListener>>,
    event_listener_id: ListenerId,
    handshake_properties: Option<Message>,
}

struct ClientInner {
    url: String,
    options: Mutex<ClientOptions>,
    state: Mutex<ClientState>,
}

/// A Bayeux client session.
///
/// The client owns the channel registry, the transport pool, the extension
/// chain and all session state; handles are cheap clones sharing that
/// state. Interior locks are never held across listener, extension or
/// transport calls, so callbacks are free to use the client re-entrantly.
///
/// The client schedules retries and transport I/O on the ambient tokio
/// runtime; all of its methods expect to run inside one.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

/// Holds a batch open; ends it when dropped.
pub struct BatchGuard {
    client: Client,
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        let _ = self.client.end_batch();
    }
}

impl Client {
    /// Creates a client for the given server URL with default options. No
    /// transports are registered yet.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_options(url, ClientOptions::default())
    }

    /// Creates a client with the given options.
    pub fn with_options(url: impl Into<String>, options: ClientOptions) -> Self {
        let advice = options.advice.clone();
        Self {
            inner: Arc::new(ClientInner {
                url: url.into(),
                options: Mutex::new(options),
                state: Mutex::new(ClientState {
                    status: ClientStatus::Unconnected,
                    connected: false,
                    client_id: None,
                    message_id: 0,
                    advice,
                    backoff_period: 0,
                    scheduled_send: None,
                    batch_id: 0,
                    internal_batch: false,
                    message_queue: Vec::new(),
                    channels: HashMap::new(),
                    transports: TransportRegistry::new(),
                    transport: None,
                    extensions: Vec::new(),
                    event_listeners: HashMap::new(),
                    event_listener_id: 0,
                    handshake_properties: None,
                }),
            }),
        }
    }

    /// Creates a client with the long-polling HTTP transport registered,
    /// ready to handshake.
    pub fn with_long_polling(url: impl Into<String>) -> Result<Self, BayeuxError> {
        let client = Client::new(url);
        client.register_transport(Arc::new(LongPollingTransport::new()))?;
        Ok(client)
    }

    /// The server URL.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// The current options.
    pub fn options(&self) -> ClientOptions {
        self.inner.options.lock().clone()
    }

    /// Replaces the options.
    pub fn configure(&self, options: ClientOptions) {
        debug!("options changed");
        *self.inner.options.lock() = options;
    }

    /// The current session status.
    pub fn status(&self) -> ClientStatus {
        self.inner.state.lock().status
    }

    /// Whether the session counts as disconnected.
    pub fn is_disconnected(&self) -> bool {
        self.status().is_disconnected()
    }

    /// Whether outbound messages are currently being queued.
    pub fn is_batching(&self) -> bool {
        let state = self.inner.state.lock();
        state.batch_id > 0 || state.internal_batch
    }

    /// The session id assigned by the server, if any.
    pub fn client_id(&self) -> Option<String> {
        self.inner.state.lock().client_id.clone()
    }

    /// The last message id handed out.
    pub fn message_id(&self) -> u64 {
        self.inner.state.lock().message_id
    }

    /// The effective advice.
    pub fn advice(&self) -> Advice {
        self.inner.state.lock().advice.clone()
    }

    /// The current backoff period, in milliseconds.
    pub fn backoff_period(&self) -> u64 {
        self.inner.state.lock().backoff_period
    }

    /// The name of the transport currently in use.
    pub fn transport_name(&self) -> Option<String> {
        self.inner.state.lock().transport.as_ref().map(|transport| transport.name().to_owned())
    }

    /// Fetches a channel handle, creating the channel on first lookup.
    pub fn channel(&self, id: impl Into<ChannelId>) -> Channel {
        let id = id.into();
        self.inner.state.lock().channels.entry(id.clone()).or_default();
        Channel::new(self.clone(), id)
    }

    /// Drops every subscription on every channel without telling the
    /// server.
    pub fn clear_subscriptions(&self) {
        info!("clearing subscriptions");
        let mut state = self.inner.state.lock();
        for channel in state.channels.values_mut() {
            channel.subscriptions.clear();
        }
    }

    /// Registers a transport for negotiation. Returns `false` when a
    /// transport with the same name is already registered, and fails when
    /// the transport rejects the client URL.
    pub fn register_transport(&self, transport: Arc<dyn Transport>) -> Result<bool, BayeuxError> {
        if !self.inner.state.lock().transports.add(transport.clone()) {
            warn!(transport = transport.name(), "transport already registered");
            return Ok(false);
        }
        if let Err(error) = transport.register(self.clone(), &self.inner.url) {
            self.inner.state.lock().transports.remove(transport.name());
            return Err(error);
        }
        debug!(transport = transport.name(), "registered transport");
        Ok(true)
    }

    /// Unregisters a transport by name, returning it.
    pub fn unregister_transport(&self, name: &str) -> Option<Arc<dyn Transport>> {
        let transport = self.inner.state.lock().transports.remove(name)?;
        transport.unregister();
        debug!(transport = name, "unregistered transport");
        Some(transport)
    }

    /// The names of every registered transport.
    pub fn known_transports(&self) -> Vec<String> {
        self.inner.state.lock().transports.known_transports()
    }

    /// Looks a registered transport up by name.
    pub fn transport(&self, name: &str) -> Option<Arc<dyn Transport>> {
        self.inner.state.lock().transports.get(name)
    }

    /// Appends an extension to the chain and hands it this client.
    pub fn register_extension(&self, extension: Arc<dyn Extension>) {
        self.inner.state.lock().extensions.push(extension.clone());
        debug!(extension = extension.name(), "registered extension");
        extension.register(self.clone());
    }

    /// Removes an extension by identity, reporting whether it was
    /// registered.
    pub fn unregister_extension(&self, extension: &Arc<dyn Extension>) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            let before = state.extensions.len();
            state.extensions.retain(|registered| !Arc::ptr_eq(registered, extension));
            state.extensions.len() != before
        };
        if removed {
            extension.unregister();
            debug!(extension = extension.name(), "unregistered extension");
        } else {
            warn!(extension = extension.name(), "extension not registered");
        }
        removed
    }

    /// Registers a callback for an event, returning its id.
    pub fn register_listener(
        &self,
        event: impl Into<String>,
        callback: EventCallback,
    ) -> ListenerId {
        let mut state = self.inner.state.lock();
        state.event_listener_id += 1;
        let id = state.event_listener_id;
        state
            .event_listeners
            .entry(event.into())
            .or_default()
            .push(EventListener { id, callback });
        id
    }

    /// Removes event listeners, reporting whether any matched.
    pub fn unregister_listener(&self, matcher: EventMatch<'_>) -> bool {
        let mut state = self.inner.state.lock();
        let mut removed = 0;
        match matcher {
            EventMatch::Id(id) => {
                for listeners in state.event_listeners.values_mut() {
                    if let Some(index) =
                        listeners.iter().position(|listener| listener.id == id)
                    {
                        listeners.remove(index);
                        removed = 1;
                        break;
                    }
                }
            }
            EventMatch::Event(event) => {
                if let Some(listeners) = state.event_listeners.get_mut(event) {
                    removed = listeners.len();
                    listeners.clear();
                }
            }
            EventMatch::Callback(callback) => {
                for listeners in state.event_listeners.values_mut() {
                    let before = listeners.len();
                    listeners
                        .retain(|listener| !Arc::ptr_eq(&listener.callback, callback));
                    removed += before - listeners.len();
                }
            }
            EventMatch::EventCallback(event, callback) => {
                if let Some(listeners) = state.event_listeners.get_mut(event) {
                    let before = listeners.len();
                    listeners
                        .retain(|listener| !Arc::ptr_eq(&listener.callback, callback));
                    removed += before - listeners.len();
                }
            }
        }
        debug!(removed, "unregistered event listeners");
        removed > 0
    }

    /// Invokes every listener registered for `event`.
    pub fn fire(&self, event: &str, payload: &ClientEvent) {
        debug!(event, "firing event");
        let listeners =
            self.inner.state.lock().event_listeners.get(event).cloned().unwrap_or_default();
        for listener in listeners {
            (listener.callback)(self, payload);
        }
    }

    /// Starts a handshake with the server, resetting any previous session.
    pub fn handshake(&self, properties: Option<Message>) {
        debug!("initiating client handshake");
        self.set_status(ClientStatus::Disconnected);
        self.handshake_inner(properties);
    }

    /// Reconfigures the client and starts a handshake.
    pub fn initialize(&self, properties: Option<Message>, options: Option<ClientOptions>) {
        debug!("initializing client");
        if let Some(options) = options {
            self.configure(options);
        }
        self.handshake(properties);
    }

    /// Sends a disconnect to the server. `sync` hints the transport to
    /// flush on a best-effort basis before the caller goes away.
    pub fn disconnect(&self, properties: Option<Message>, sync: bool) {
        if self.is_disconnected() {
            debug!("client already disconnected, skipping disconnect");
            return;
        }
        let mut message = properties.unwrap_or_default();
        message.set_channel(META_DISCONNECT.clone());
        debug!("sending disconnect");
        self.set_status(ClientStatus::Disconnecting);
        self.send_messages(vec![message], true, sync);
    }

    /// Submits a message for sending, honoring batching and the handshake
    /// hold.
    pub fn send(&self, message: Message) {
        let send_now = {
            let mut state = self.inner.state.lock();
            if state.batch_id > 0 || state.internal_batch || state.status.is_handshaking() {
                debug!("in batch, queueing message");
                state.message_queue.push(message);
                return;
            }
            debug!("sending message immediately");
            message
        };
        self.send_messages(vec![send_now], false, false);
    }

    /// Opens a batch: outbound messages queue until the matching
    /// [`end_batch`](Self::end_batch).
    pub fn start_batch(&self) {
        let mut state = self.inner.state.lock();
        state.batch_id += 1;
        debug!(batch = state.batch_id, "started batch");
    }

    /// Closes a batch, flushing the queue once no batch remains open.
    pub fn end_batch(&self) -> Result<(), BayeuxError> {
        let flush = {
            let mut state = self.inner.state.lock();
            if state.batch_id == 0 {
                return Err(BayeuxError::Batch);
            }
            debug!(batch = state.batch_id, "ended batch");
            state.batch_id -= 1;
            state.batch_id == 0 && !state.internal_batch && !state.status.is_disconnected()
        };
        if flush {
            self.flush_batch();
        }
        Ok(())
    }

    /// Opens a batch held by the returned guard; dropping the guard ends
    /// it on every exit path.
    pub fn batch(&self) -> BatchGuard {
        self.start_batch();
        BatchGuard { client: self.clone() }
    }

    /// Sends every queued message in one transport call, in enqueue order.
    /// A no-op when the queue is empty.
    pub fn flush_batch(&self) {
        let messages = std::mem::take(&mut self.inner.state.lock().message_queue);
        debug!(count = messages.len(), "flushing batch");
        if messages.is_empty() {
            debug!("no queued messages, skipping flush");
            return;
        }
        self.send_messages(messages, false, false);
    }

    /// Delivers messages received by a transport into the inbound
    /// pipeline.
    pub fn receive_messages(&self, messages: Vec<Message>) -> Result<(), BayeuxError> {
        info!(count = messages.len(), "received messages");
        for message in messages {
            self.receive(message)?;
        }
        Ok(())
    }

    /// Routes messages a transport could not exchange to their failure
    /// handlers.
    pub fn fail_messages(
        &self,
        messages: Vec<Message>,
        error: BayeuxError,
    ) -> Result<(), BayeuxError> {
        debug!(count = messages.len(), "failing messages");
        self.handle_failure(messages, &error)
    }

    // ---- channel plumbing ----------------------------------------------

    pub(crate) fn with_channel_state<R>(
        &self,
        id: &ChannelId,
        action: impl FnOnce(&mut ChannelState) -> R,
    ) -> R {
        let mut state = self.inner.state.lock();
        action(state.channels.entry(id.clone()).or_default())
    }

    pub(crate) fn report_listener_exception(
        &self,
        listener_id: ListenerId,
        message: Message,
        error: ListenerError,
    ) {
        let payload =
            ClientEvent::ListenerException { listener_id, message, error: Arc::from(error) };
        self.fire(EVENT_LISTENER_EXCEPTION, &payload);
    }

    // ---- state machine internals ---------------------------------------

    fn set_status(&self, status: ClientStatus) {
        let mut state = self.inner.state.lock();
        if state.status == status {
            return;
        }
        info!(from = %state.status, to = %status, "status");
        state.status = status;
    }

    fn update_advice(&self, new_advice: Option<Advice>) {
        if let Some(new_advice) = new_advice {
            let defaults = self.inner.options.lock().advice.clone();
            let merged = new_advice.merged_over(&defaults);
            debug!(advice = ?merged, "new advice");
            self.inner.state.lock().advice = merged;
        }
    }

    fn reset_backoff_period(&self) {
        debug!("resetting backoff period");
        self.inner.state.lock().backoff_period = 0;
    }

    fn increase_backoff_period(&self) {
        let options = self.options();
        let mut state = self.inner.state.lock();
        if state.backoff_period < options.maximum_backoff_period {
            state.backoff_period += options.backoff_period_increment;
            debug!(backoff = state.backoff_period, "increased backoff period");
        }
    }

    /// Schedules `work` after `advice.interval + backoff`, superseding any
    /// previously scheduled send. Zero delay runs inline.
    fn delay_send(&self, work: DelayedWork) {
        let delay = {
            let mut state = self.inner.state.lock();
            if let Some(scheduled) = state.scheduled_send.take() {
                debug!("cancelling delayed send");
                scheduled.abort();
            }
            state.advice.interval.unwrap_or(0) + state.backoff_period
        };
        debug!(delay_ms = delay, work = ?work, "send scheduled");
        if delay == 0 {
            self.run_delayed(work);
        } else {
            let client = self.clone();
            let scheduled = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                client.run_delayed(work);
            });
            self.inner.state.lock().scheduled_send = Some(scheduled);
        }
    }

    fn run_delayed(&self, work: DelayedWork) {
        match work {
            DelayedWork::Connect => self.connect(),
            DelayedWork::Handshake => {
                let properties = self.inner.state.lock().handshake_properties.clone();
                self.handshake_inner(properties);
            }
        }
    }

    fn delay_connect(&self) {
        debug!("scheduling delayed connect");
        self.set_status(ClientStatus::Connecting);
        self.delay_send(DelayedWork::Connect);
    }

    fn delay_handshake(&self) {
        debug!("scheduling delayed handshake");
        self.set_status(ClientStatus::Rehandshaking);
        self.inner.state.lock().internal_batch = true;
        self.delay_send(DelayedWork::Handshake);
    }

    fn connect(&self) {
        if self.is_disconnected() {
            debug!("client is disconnected, skipping connect");
            return;
        }
        let (transport_name, connected) = {
            let state = self.inner.state.lock();
            (
                state.transport.as_ref().map(|transport| transport.name().to_owned()),
                state.connected,
            )
        };
        let Some(transport_name) = transport_name else {
            warn!("no transport negotiated, skipping connect");
            return;
        };
        let mut message = Message::new()
            .with_channel(META_CONNECT.clone())
            .with_connection_type(&transport_name);
        // After a broken connection the next connect should return
        // immediately instead of being held, so listeners promptly observe
        // the re-established session.
        if !connected {
            message.set_advice(&Advice::new().with_timeout(0));
        }
        self.set_status(ClientStatus::Connecting);
        debug!("sending connect");
        self.send_messages(vec![message], true, false);
        self.set_status(ClientStatus::Connected);
    }

    fn handshake_inner(&self, properties: Option<Message>) {
        info!("starting handshake");
        self.inner.state.lock().client_id = None;
        self.clear_subscriptions();

        // A fresh handshake starts over from the configured advice; a
        // retried or server-requested one keeps the current advice but must
        // connect on success.
        if self.is_disconnected() {
            debug!("client disconnected, resetting transports and advice");
            let transports = self.inner.state.lock().transports.all();
            for transport in transports {
                transport.reset();
            }
            let defaults = self.inner.options.lock().advice.clone();
            self.update_advice(Some(defaults));
        } else {
            debug!("client not disconnected, using retry advice");
            let mut advice = self.advice();
            advice.reconnect = Some(Reconnect::Retry);
            self.update_advice(Some(advice));
        }

        // Hold every application message until the session is established.
        {
            let mut state = self.inner.state.lock();
            state.batch_id = 0;
            state.internal_batch = true;
            state.handshake_properties = properties.clone();
        }

        let (transport_names, negotiated) = {
            let state = self.inner.state.lock();
            let names = state.transports.find_transports(BAYEUX_VERSION);
            let negotiated = state.transports.negotiate(&names, BAYEUX_VERSION);
            (names, negotiated)
        };
        debug!(transports = ?transport_names, "supported transports");

        let advice = self.advice();
        let mut message = properties.unwrap_or_default();
        message.set(Message::VERSION, BAYEUX_VERSION);
        message.set(Message::MINIMUM_VERSION, MINIMUM_BAYEUX_VERSION);
        message.set_channel(META_HANDSHAKE.clone());
        message.set(Message::SUPPORTED_CONNECTION_TYPES, transport_names);
        message.set_advice(&Advice {
            reconnect: None,
            interval: advice.interval,
            timeout: advice.timeout,
        });

        // The first candidate stands in until the server states what it
        // supports.
        debug!(transport = ?negotiated.as_ref().map(|transport| transport.name().to_owned()), "initial transport");
        self.inner.state.lock().transport = negotiated;

        self.set_status(ClientStatus::Handshaking);
        debug!("sending handshake");
        self.send_messages(vec![message], true, false);
    }

    /// Tears the session down, failing whatever is still queued.
    fn disconnect_inner(&self, abort: bool) {
        let (queued, transport) = {
            let mut state = self.inner.state.lock();
            if state.status == ClientStatus::Disconnected {
                return;
            }
            debug!("disconnecting client");
            info!(from = %state.status, to = %ClientStatus::Disconnected, "status");
            state.status = ClientStatus::Disconnected;
            if let Some(scheduled) = state.scheduled_send.take() {
                scheduled.abort();
            }
            state.client_id = None;
            state.batch_id = 0;
            state.backoff_period = 0;
            (std::mem::take(&mut state.message_queue), state.transport.clone())
        };
        if abort {
            if let Some(transport) = transport {
                debug!("aborting transport");
                transport.abort();
            }
        }
        if !queued.is_empty() {
            debug!(count = queued.len(), "failing queued messages");
            let error = BayeuxError::Status(self.status());
            if let Err(error) = self.handle_failure(queued, &error) {
                warn!(error = %error, "failure handling for queued messages raised");
            }
        }
    }

    // ---- outbound pipeline ---------------------------------------------

    /// Prepares and hands a batch to the transport. Setup messages
    /// (handshake, connect, disconnect) bypass the connected-status gate.
    fn send_messages(&self, messages: Vec<Message>, for_setup: bool, sync: bool) -> bool {
        if messages.is_empty() {
            return false;
        }
        let status = self.status();
        if !for_setup
            && !matches!(status, ClientStatus::Connecting | ClientStatus::Connected)
        {
            debug!(status = %status, "client is not connected, cannot send messages");
            if let Err(error) = self.handle_failure(messages, &BayeuxError::Status(status)) {
                warn!(error = %error, "failure handling for unsendable messages raised");
            }
            return false;
        }

        // Messages queued before the handshake finished predate the client
        // id, so stamp it here rather than at creation time.
        let client_id = self.client_id();
        let mut prepared = Vec::with_capacity(messages.len());
        for mut message in messages {
            if let Some(client_id) = &client_id {
                message.set(Message::CLIENT_ID, client_id.as_str());
            }
            match self.apply_outgoing_extensions(message) {
                Some(message) => prepared.push(message),
                None => continue,
            }
        }
        if prepared.is_empty() {
            debug!("all messages cancelled by extensions, skipping send");
            return false;
        }

        {
            let mut state = self.inner.state.lock();
            for message in &mut prepared {
                state.message_id += 1;
                message.set(Message::ID, state.message_id.to_string());
            }
        }

        let transport = self.inner.state.lock().transport.clone();
        let Some(transport) = transport else {
            warn!("no transport negotiated, failing messages");
            let error = BayeuxError::Communication("no transport negotiated".to_owned());
            if let Err(error) = self.handle_failure(prepared, &error) {
                warn!(error = %error, "failure handling for unsendable messages raised");
            }
            return false;
        };
        debug!(count = prepared.len(), transport = transport.name(), "passing messages to transport");
        transport.send(prepared, sync);
        true
    }

    fn apply_outgoing_extensions(&self, message: Message) -> Option<Message> {
        let extensions = self.inner.state.lock().extensions.clone();
        let mut current = message;
        for extension in &extensions {
            match self.apply_extension(extension, current, true) {
                Some(message) => current = message,
                None => {
                    debug!("message cancelled, skipping other extensions");
                    return None;
                }
            }
        }
        Some(current)
    }

    fn apply_incoming_extensions(&self, message: Message) -> Option<Message> {
        let mut extensions = self.inner.state.lock().extensions.clone();
        if self.options().reverse_incoming_extensions {
            extensions.reverse();
        }
        let mut current = message;
        for extension in &extensions {
            match self.apply_extension(extension, current, false) {
                Some(message) => current = message,
                None => {
                    debug!("message cancelled, skipping other extensions");
                    return None;
                }
            }
        }
        Some(current)
    }

    fn apply_extension(
        &self,
        extension: &Arc<dyn Extension>,
        message: Message,
        outgoing: bool,
    ) -> Option<Message> {
        debug!(extension = extension.name(), outgoing, "applying extension");
        let result = if outgoing {
            extension.send(message.clone())
        } else {
            extension.receive(message.clone())
        };
        match result {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(extension = extension.name(), error = %error, "extension raised");
                let payload = ClientEvent::ExtensionException {
                    message,
                    error: Arc::from(error),
                    outgoing,
                };
                self.fire(EVENT_EXTENSION_EXCEPTION, &payload);
                None
            }
        }
    }

    // ---- inbound pipeline ----------------------------------------------

    fn receive(&self, message: Message) -> Result<(), BayeuxError> {
        debug!("receiving message");
        let Some(message) = self.apply_incoming_extensions(message) else {
            debug!("message cancelled by extensions");
            return Ok(());
        };
        self.update_advice(message.advice());
        match meta_suffix(&message).as_deref() {
            Some("handshake") => self.handle_handshake_response(message),
            Some("connect") => self.handle_connect_response(message),
            Some("disconnect") => self.handle_disconnect_response(message),
            Some("subscribe") => self.handle_subscribe_response(message),
            Some("unsubscribe") => self.handle_unsubscribe_response(message),
            _ => self.handle_message_response(message),
        }
    }

    fn handle_handshake_response(&self, message: Message) -> Result<(), BayeuxError> {
        debug!("handling handshake response");
        if message.failure() {
            info!("client failed to handshake");
            self.notify_handshake_failure(message);
            return Ok(());
        }

        let client_id = message.client_id().map(str::to_owned);
        info!(client_id = client_id.as_deref().unwrap_or_default(), "handshake successful");
        self.inner.state.lock().client_id = client_id;

        let server_types = message.supported_connection_types();
        let version = message.version().unwrap_or_default().to_owned();
        let negotiated = {
            let state = self.inner.state.lock();
            state.transports.negotiate(&server_types, &version)
        };
        let Some(new_transport) = negotiated else {
            let client_types = self.inner.state.lock().transports.find_transports(&version);
            return Err(BayeuxError::TransportNegotiation { client_types, server_types });
        };
        {
            let mut state = self.inner.state.lock();
            let changed = state
                .transport
                .as_ref()
                .map_or(true, |current| current.name() != new_transport.name());
            if changed {
                debug!(transport = new_transport.name(), "switching transport");
                state.transport = Some(new_transport);
            }
        }

        // The negotiated transport is in place, so listeners may publish
        // from their callbacks; they are told about the connect below.
        self.notify_listeners(&META_HANDSHAKE, &message);

        let mut action = self.advice().reconnect.unwrap_or(Reconnect::Retry);
        if self.is_disconnected() {
            action = Reconnect::None;
        }
        match action {
            Reconnect::Retry => {
                self.reset_backoff_period();
                self.delay_connect();
            }
            Reconnect::None => self.disconnect_inner(false),
            other => return Err(BayeuxError::Action(other.to_string())),
        }

        // Let held application messages flow now that the session exists
        // (the internal batch opened when the handshake started).
        self.inner.state.lock().internal_batch = false;
        self.flush_batch();
        Ok(())
    }

    fn handle_connect_response(&self, message: Message) -> Result<(), BayeuxError> {
        debug!("handling connect response");
        if self.is_disconnected() {
            debug!("client disconnected, discarding connect response");
            return Ok(());
        }
        let successful = message.successful().unwrap_or(false);
        self.inner.state.lock().connected = successful;
        if !successful {
            info!("client failed to connect");
            return self.notify_connect_failure(message);
        }
        info!("client is now connected");
        self.notify_listeners(&META_CONNECT, &message);
        match self.advice().reconnect.unwrap_or(Reconnect::Retry) {
            Reconnect::Retry => {
                self.reset_backoff_period();
                self.delay_connect();
            }
            Reconnect::None => self.disconnect_inner(false),
            other => return Err(BayeuxError::Action(other.to_string())),
        }
        Ok(())
    }

    fn handle_disconnect_response(&self, message: Message) -> Result<(), BayeuxError> {
        debug!("handling disconnect response");
        if message.successful().unwrap_or(false) {
            info!("client is now disconnected");
            self.disconnect_inner(false);
            self.notify_listeners(&META_DISCONNECT, &message);
        } else {
            info!("client failed to disconnect");
            self.notify_disconnect_failure(message);
        }
        Ok(())
    }

    fn handle_subscribe_response(&self, message: Message) -> Result<(), BayeuxError> {
        debug!("handling subscribe response");
        let channel = message.subscription();
        if message.successful().unwrap_or(false) {
            info!(channel = ?channel, "client subscribed");
            self.notify_listeners(&META_SUBSCRIBE, &message);
        } else {
            info!(channel = ?channel, "client failed to subscribe");
            self.notify_subscribe_failure(message);
        }
        Ok(())
    }

    fn handle_unsubscribe_response(&self, message: Message) -> Result<(), BayeuxError> {
        debug!("handling unsubscribe response");
        let channel = message.subscription();
        if message.successful().unwrap_or(false) {
            info!(channel = ?channel, "client unsubscribed");
            self.notify_listeners(&META_UNSUBSCRIBE, &message);
        } else {
            info!(channel = ?channel, "client failed to unsubscribe");
            self.notify_unsubscribe_failure(message);
        }
        Ok(())
    }

    fn handle_message_response(&self, message: Message) -> Result<(), BayeuxError> {
        debug!("handling message response");
        match message.successful() {
            None => {
                if message.has_data() {
                    if let Some(channel) = message.channel() {
                        self.notify_listeners(&channel, &message);
                    } else {
                        warn!("message without channel received");
                    }
                } else {
                    warn!("unknown message received");
                }
            }
            Some(true) => {
                debug!("client received successful message");
                self.notify_listeners(&META_PUBLISH, &message);
            }
            Some(false) => {
                debug!("client received unsuccessful message");
                self.notify_message_failure(message);
            }
        }
        Ok(())
    }

    // ---- failure routing -----------------------------------------------

    fn handle_failure(
        &self,
        messages: Vec<Message>,
        error: &BayeuxError,
    ) -> Result<(), BayeuxError> {
        debug!(count = messages.len(), error = %error, "handling failed messages");
        for message in messages {
            match meta_suffix(&message).as_deref() {
                Some("handshake") => self.handle_handshake_failure(message, error),
                Some("connect") => self.handle_connect_failure(message, error)?,
                Some("disconnect") => self.handle_disconnect_failure(message, error),
                Some("subscribe") => self.handle_subscribe_failure(message, error),
                Some("unsubscribe") => self.handle_unsubscribe_failure(message, error),
                _ => self.handle_message_failure(message, error),
            }
        }
        Ok(())
    }

    fn handle_handshake_failure(&self, message: Message, error: &BayeuxError) {
        debug!("handling failed handshake");
        let mut failure = Message::failure_from(&message, Some(error.clone()));
        failure.set_advice(
            &Advice::new()
                .with_reconnect(Reconnect::Retry)
                .with_interval(self.backoff_period()),
        );
        self.notify_handshake_failure(failure);
    }

    fn handle_connect_failure(
        &self,
        message: Message,
        error: &BayeuxError,
    ) -> Result<(), BayeuxError> {
        debug!("handling failed connect");
        self.inner.state.lock().connected = false;
        let mut failure = Message::failure_from(&message, Some(error.clone()));
        failure.set_advice(
            &Advice::new()
                .with_reconnect(Reconnect::Retry)
                .with_interval(self.backoff_period()),
        );
        self.notify_connect_failure(failure)
    }

    fn handle_disconnect_failure(&self, message: Message, error: &BayeuxError) {
        debug!("handling failed disconnect");
        self.notify_disconnect_failure(Message::failure_from(&message, Some(error.clone())));
    }

    fn handle_subscribe_failure(&self, message: Message, error: &BayeuxError) {
        debug!("handling failed subscribe");
        self.notify_subscribe_failure(Message::failure_from(&message, Some(error.clone())));
    }

    fn handle_unsubscribe_failure(&self, message: Message, error: &BayeuxError) {
        debug!("handling failed unsubscribe");
        self.notify_unsubscribe_failure(Message::failure_from(&message, Some(error.clone())));
    }

    fn handle_message_failure(&self, message: Message, error: &BayeuxError) {
        debug!("handling failed message");
        self.notify_message_failure(Message::failure_from(&message, Some(error.clone())));
    }

    fn notify_handshake_failure(&self, message: Message) {
        debug!("notifying listeners of failed handshake");
        self.notify_listeners(&META_HANDSHAKE, &message);
        self.notify_listeners(&META_UNSUCCESSFUL, &message);
        let action = self.advice().reconnect.unwrap_or(Reconnect::Retry);
        if !self.is_disconnected() && action != Reconnect::None {
            self.increase_backoff_period();
            self.delay_handshake();
        } else {
            self.disconnect_inner(false);
        }
    }

    fn notify_connect_failure(&self, message: Message) -> Result<(), BayeuxError> {
        debug!("notifying listeners of failed connect");
        self.notify_listeners(&META_CONNECT, &message);
        self.notify_listeners(&META_UNSUCCESSFUL, &message);
        let mut action = self.advice().reconnect.unwrap_or(Reconnect::Retry);
        if self.is_disconnected() {
            action = Reconnect::None;
        }
        match action {
            Reconnect::Retry => {
                debug!("retry reconnect advice received");
                self.increase_backoff_period();
                self.delay_connect();
            }
            Reconnect::Handshake => {
                debug!("handshake reconnect advice received");
                let transports = self.inner.state.lock().transports.all();
                for transport in transports {
                    transport.reset();
                }
                self.reset_backoff_period();
                self.delay_handshake();
            }
            Reconnect::None => {
                debug!("no reconnect advice received");
                self.disconnect_inner(false);
            }
            Reconnect::Unknown(action) => return Err(BayeuxError::Action(action)),
        }
        Ok(())
    }

    fn notify_disconnect_failure(&self, message: Message) {
        debug!("notifying listeners of failed disconnect");
        self.disconnect_inner(true);
        self.notify_listeners(&META_DISCONNECT, &message);
        self.notify_listeners(&META_UNSUCCESSFUL, &message);
    }

    fn notify_subscribe_failure(&self, message: Message) {
        debug!("notifying listeners of failed subscribe");
        self.notify_listeners(&META_SUBSCRIBE, &message);
        self.notify_listeners(&META_UNSUCCESSFUL, &message);
    }

    fn notify_unsubscribe_failure(&self, message: Message) {
        debug!("notifying listeners of failed unsubscribe");
        self.notify_listeners(&META_UNSUBSCRIBE, &message);
        self.notify_listeners(&META_UNSUCCESSFUL, &message);
    }

    fn notify_message_failure(&self, message: Message) {
        debug!("notifying listeners of failed message");
        self.notify_listeners(&META_PUBLISH, &message);
        self.notify_listeners(&META_UNSUCCESSFUL, &message);
    }

    /// Delivers a message to the channel and every wildcard channel
    /// covering it, most specific first. Callbacks always see the concrete
    /// channel.
    fn notify_listeners(&self, channel_id: &ChannelId, message: &Message) {
        debug!(channel = %channel_id, "notifying listeners");
        let channel = self.channel(channel_id.clone());
        channel.notify_listeners(&channel, message);
        for wild in channel_id.wilds() {
            let wild_channel = self.channel(wild);
            wild_channel.notify_listeners(&channel, message);
        }
    }
}

/// The handler-table key for meta messages: the path segments after
/// `meta`, joined with `_`. Returns `None` off the meta tree.
fn meta_suffix(message: &Message) -> Option<String> {
    message
        .channel()
        .filter(|channel| channel.is_meta())
        .map(|channel| channel.parts()[1..].join("_"))
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Client")
            .field("url", &self.inner.url)
            .field("status", &state.status)
            .field("client_id", &state.client_id)
            .finish()
    }
}
