use std::{fmt, sync::Arc};

use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    channel_id::{ChannelId, META_SUBSCRIBE, META_UNSUBSCRIBE},
    client::Client,
    message::Message,
};

/// Identifier handed out for channel and event listeners, monotonically
/// increasing within the owning scope.
pub type ListenerId = u64;

/// Error a listener may surface; reported through the client event bus and
/// never allowed to break notification.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Callback invoked with the concrete channel a message arrived on, which
/// for wildcard registrations differs from the channel registered on.
pub type ListenerCallback =
    Arc<dyn Fn(&Channel, &Message) -> Result<(), ListenerError> + Send + Sync>;

/// A listener registration.
#[derive(Clone)]
pub struct Listener {
    /// The id returned at registration time.
    pub id: ListenerId,
    /// The registered callback.
    pub callback: ListenerCallback,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener").field("id", &self.id).finish()
    }
}

/// Selects listeners for removal: by id (first match) or by callback
/// identity (every match).
pub enum ListenerMatch<'a> {
    /// The id returned by `add_listener`/`subscribe`.
    Id(ListenerId),
    /// The registered callback, matched by pointer identity.
    Callback(&'a ListenerCallback),
}

fn remove_matching(listeners: &mut Vec<Listener>, matcher: &ListenerMatch<'_>) -> bool {
    match matcher {
        ListenerMatch::Id(id) => {
            match listeners.iter().position(|listener| listener.id == *id) {
                Some(index) => {
                    listeners.remove(index);
                    true
                }
                None => false,
            }
        }
        ListenerMatch::Callback(callback) => {
            let before = listeners.len();
            listeners.retain(|listener| !Arc::ptr_eq(&listener.callback, callback));
            listeners.len() != before
        }
    }
}

/// The client-owned registry slot behind a [`Channel`] handle.
#[derive(Debug, Default)]
pub(crate) struct ChannelState {
    pub(crate) listeners: Vec<Listener>,
    pub(crate) subscriptions: Vec<Listener>,
    next_listener_id: ListenerId,
}

impl ChannelState {
    fn next_id(&mut self) -> ListenerId {
        self.next_listener_id += 1;
        self.next_listener_id
    }
}

/// A handle to one of the client's channels.
///
/// Channels are created lazily on first lookup and live for the life of the
/// client; the handle itself is cheap to clone and carries no state beyond
/// the id.
#[derive(Clone)]
pub struct Channel {
    client: Client,
    id: ChannelId,
}

impl Channel {
    pub(crate) fn new(client: Client, id: ChannelId) -> Self {
        Self { client, id }
    }

    /// The channel id.
    pub fn channel_id(&self) -> &ChannelId {
        &self.id
    }

    /// Whether this is a `/meta` channel.
    pub fn is_meta(&self) -> bool {
        self.id.is_meta()
    }

    /// Whether this is a shallow wildcard channel.
    pub fn is_wild(&self) -> bool {
        self.id.is_wild()
    }

    /// Whether this is a deep wildcard channel.
    pub fn is_wild_deep(&self) -> bool {
        self.id.is_wild_deep()
    }

    /// The id's path segments.
    pub fn parts(&self) -> &[String] {
        self.id.parts()
    }

    /// The wildcard channels matching this one.
    pub fn wilds(&self) -> Vec<ChannelId> {
        self.id.wilds()
    }

    /// Whether any subscriptions are registered.
    pub fn has_subscriptions(&self) -> bool {
        self.client.with_channel_state(&self.id, |state| !state.subscriptions.is_empty())
    }

    /// Registers a listener, returning its id. Listeners see every message
    /// delivered to the channel, data-bearing or not.
    pub fn add_listener(&self, callback: ListenerCallback) -> ListenerId {
        self.client.with_channel_state(&self.id, |state| {
            let id = state.next_id();
            state.listeners.push(Listener { id, callback });
            debug!(channel = %self.id, listener = id, "added listener");
            id
        })
    }

    /// Removes listeners, reporting whether any matched.
    pub fn remove_listener(&self, matcher: ListenerMatch<'_>) -> bool {
        self.client
            .with_channel_state(&self.id, |state| remove_matching(&mut state.listeners, &matcher))
    }

    /// Drops every listener.
    pub fn clear_listeners(&self) {
        self.client.with_channel_state(&self.id, |state| state.listeners.clear());
    }

    /// Drops every subscription without telling the server.
    pub fn clear_subscriptions(&self) {
        debug!(channel = %self.id, "cleared subscriptions");
        self.client.with_channel_state(&self.id, |state| state.subscriptions.clear());
    }

    /// Registers a subscription, returning its id.
    ///
    /// The first subscription sends a `/meta/subscribe` to the server, with
    /// `properties` merged into the message; later ones are purely local.
    pub fn subscribe(
        &self,
        callback: ListenerCallback,
        properties: Option<&Message>,
    ) -> ListenerId {
        let first =
            self.client.with_channel_state(&self.id, |state| state.subscriptions.is_empty());
        if first {
            debug!(channel = %self.id, "first subscription, sending subscribe");
            let mut message = properties.cloned().unwrap_or_default();
            message.set_channel(META_SUBSCRIBE.clone());
            message.set_subscription(self.id.clone());
            self.client.send(message);
        }
        self.client.with_channel_state(&self.id, |state| {
            let id = state.next_id();
            state.subscriptions.push(Listener { id, callback });
            id
        })
    }

    /// Removes subscriptions, reporting whether any matched.
    ///
    /// When the last subscription goes away a `/meta/unsubscribe` is sent,
    /// with `properties` merged into the message.
    pub fn unsubscribe(&self, matcher: ListenerMatch<'_>, properties: Option<&Message>) -> bool {
        let (removed, now_empty) = self.client.with_channel_state(&self.id, |state| {
            let removed = remove_matching(&mut state.subscriptions, &matcher);
            (removed, state.subscriptions.is_empty())
        });
        if removed && now_empty {
            debug!(channel = %self.id, "no subscriptions left, sending unsubscribe");
            let mut message = properties.cloned().unwrap_or_default();
            message.set_channel(META_UNSUBSCRIBE.clone());
            message.set_subscription(self.id.clone());
            self.client.send(message);
        }
        removed
    }

    /// Publishes application data on this channel, with `properties` merged
    /// into the message.
    pub fn publish(&self, data: impl Into<Value>, properties: Option<&Message>) {
        debug!(channel = %self.id, "publishing");
        let mut message = properties.cloned().unwrap_or_default();
        message.set_channel(self.id.clone());
        message.set(Message::DATA, data.into());
        self.client.send(message);
    }

    /// Delivers a message to this channel's listeners and, when the message
    /// carries data, its subscriptions.
    ///
    /// `channel` is the concrete channel the message arrived on, passed
    /// through to every callback. A failing callback is reported to the
    /// client and never stops the iteration.
    pub fn notify_listeners(&self, channel: &Channel, message: &Message) {
        let (listeners, subscriptions) = self.client.with_channel_state(&self.id, |state| {
            (state.listeners.clone(), state.subscriptions.clone())
        });
        for listener in &listeners {
            self.invoke(listener, channel, message);
        }
        if message.has_data() {
            for subscription in &subscriptions {
                self.invoke(subscription, channel, message);
            }
        }
    }

    fn invoke(&self, listener: &Listener, channel: &Channel, message: &Message) {
        if let Err(error) = (listener.callback)(channel, message) {
            warn!(channel = %self.id, listener = listener.id, error = %error, "listener failed");
            self.client.report_listener_exception(listener.id, message.clone(), error);
        }
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}
