#![deny(rustdoc::broken_intra_doc_links)]
#![doc = include_str!("../README.md")]

pub mod advice;
pub mod channel;
pub mod channel_id;
mod client;
pub mod errors;
pub mod extensions;
pub mod message;
pub mod status;
pub mod transports;

pub use advice::{Advice, Reconnect};
pub use channel::{
    Channel, Listener, ListenerCallback, ListenerError, ListenerId, ListenerMatch,
};
pub use channel_id::ChannelId;
pub use client::{
    BatchGuard, Client, ClientEvent, ClientOptions, EventCallback, EventMatch, BAYEUX_VERSION,
    EVENT_EXTENSION_EXCEPTION, EVENT_LISTENER_EXCEPTION, MINIMUM_BAYEUX_VERSION,
};
pub use errors::BayeuxError;
pub use extensions::{AckExtension, Extension, ExtensionError, TimestampExtension};
pub use message::Message;
pub use status::ClientStatus;
pub use transports::{HttpOptions, LongPollingTransport, Transport, TransportRegistry};
