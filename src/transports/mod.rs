//! The wire layer: the [`Transport`] contract, the long-polling HTTP
//! implementation and the named registry used for negotiation.

pub mod long_polling;
pub mod registry;
pub mod util;

pub use long_polling::{HttpOptions, LongPollingTransport};
pub use registry::TransportRegistry;

use std::{fmt, time::Duration};

use crate::{channel_id::META_CONNECT, client::Client, errors::BayeuxError, message::Message};

/// Default base network timeout, in milliseconds.
pub const DEFAULT_MAXIMUM_NETWORK_DELAY: u64 = 10_000;

/// A pluggable wire layer.
///
/// `send` serializes and dispatches a batch without blocking the caller; on
/// completion the transport reports back through
/// [`Client::receive_messages`] with the response messages or
/// [`Client::fail_messages`] with the sent ones and the error.
pub trait Transport: fmt::Debug + Send + Sync {
    /// Unique transport identifier advertised during handshakes.
    fn name(&self) -> &str;

    /// Whether this transport can speak the given Bayeux version.
    fn accept(&self, bayeux_version: &str) -> bool;

    /// Attaches the transport to a client, validating the server URL.
    fn register(&self, client: Client, url: &str) -> Result<(), BayeuxError>;

    /// Detaches the transport from its client.
    fn unregister(&self);

    /// Drops negotiated state ahead of a fresh handshake.
    fn reset(&self) {}

    /// Cancels in-flight work without reporting it as failed.
    fn abort(&self) {}

    /// Serializes and dispatches a batch. `sync` is a best-effort hint that
    /// the caller is flushing before going away.
    fn send(&self, messages: Vec<Message>, sync: bool);

    /// Base timeout budget for a round trip, in milliseconds.
    fn maximum_network_delay(&self) -> u64 {
        DEFAULT_MAXIMUM_NETWORK_DELAY
    }

    /// Effective network timeout for a batch: the base delay plus, for a
    /// lone meta connect, however long the server is allowed to hold the
    /// poll open.
    fn timeout(&self, messages: &[Message]) -> Duration {
        let mut millis = self.maximum_network_delay();
        if let [message] = messages {
            if message.channel_is(&META_CONNECT) {
                millis += message.advice().and_then(|advice| advice.timeout).unwrap_or(0);
            }
        }
        Duration::from_millis(millis)
    }
}

/// Validates a transport URL, requiring a parseable URL with a non-empty
/// host.
pub(crate) fn parse_url(transport: &str, value: &str) -> Result<url::Url, BayeuxError> {
    match url::Url::parse(value) {
        Ok(url) if url.host_str().map_or(false, |host| !host.is_empty()) => Ok(url),
        _ => Err(BayeuxError::ConnectionString {
            transport: transport.to_owned(),
            value: value.to_owned(),
        }),
    }
}
