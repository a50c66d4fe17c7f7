//! Pluggable per-message transforms applied to both pipelines.

mod ack;
mod timestamp;

pub use ack::AckExtension;
pub use timestamp::TimestampExtension;

use std::fmt;

use crate::{client::Client, message::Message};

/// Error surfaced by an extension hook; reported through the client event
/// bus and treated as a dropped message.
pub type ExtensionError = Box<dyn std::error::Error + Send + Sync>;

/// A transform applied to every message on its way in or out.
///
/// Extensions run in registration order on send and, by default, in reverse
/// registration order on receive. Returning `Ok(None)` drops the message and
/// skips the rest of the chain; returning `Err` additionally fires
/// [`EVENT_EXTENSION_EXCEPTION`](crate::EVENT_EXTENSION_EXCEPTION).
pub trait Extension: fmt::Debug + Send + Sync {
    /// Identifier used in diagnostics.
    fn name(&self) -> &str;

    /// Called when the extension is attached to a client.
    fn register(&self, _client: Client) {}

    /// Called when the extension is detached from its client.
    fn unregister(&self) {}

    /// Transforms an inbound message.
    fn receive(&self, message: Message) -> Result<Option<Message>, ExtensionError> {
        Ok(Some(message))
    }

    /// Transforms an outbound message.
    fn send(&self, message: Message) -> Result<Option<Message>, ExtensionError> {
        Ok(Some(message))
    }
}
