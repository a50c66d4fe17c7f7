use chrono::Utc;

use super::{Extension, ExtensionError};
use crate::message::Message;

/// Stamps every outbound message with the current GMT time in RFC 2822
/// form, e.g. `Sat, 01 Aug 2026 12:00:00 GMT`.
#[derive(Debug, Default)]
pub struct TimestampExtension;

impl TimestampExtension {
    /// Creates the extension.
    pub fn new() -> Self {
        Self
    }
}

impl Extension for TimestampExtension {
    fn name(&self) -> &str {
        "timestamp"
    }

    fn send(&self, mut message: Message) -> Result<Option<Message>, ExtensionError> {
        message.set(
            Message::TIMESTAMP,
            Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
        Ok(Some(message))
    }
}
