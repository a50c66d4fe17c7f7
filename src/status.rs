use std::fmt;

/// Lifecycle states of a client session.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ClientStatus {
    /// Before the first handshake, or after the connection is broken.
    Unconnected,
    /// A handshake has been sent.
    Handshaking,
    /// A failed or expired handshake is being retried.
    Rehandshaking,
    /// A connect is being sent.
    Connecting,
    /// The client is connected to the Bayeux server.
    Connected,
    /// A disconnect has been sent.
    Disconnecting,
    /// The disconnect completed.
    Disconnected,
}

impl ClientStatus {
    /// Whether the status counts as disconnected for protocol purposes.
    pub fn is_disconnected(self) -> bool {
        matches!(self, ClientStatus::Disconnecting | ClientStatus::Disconnected)
    }

    /// Whether a handshake is in progress, first attempt or retry.
    pub fn is_handshaking(self) -> bool {
        matches!(self, ClientStatus::Handshaking | ClientStatus::Rehandshaking)
    }

    /// The lowercase wire-style name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientStatus::Unconnected => "unconnected",
            ClientStatus::Handshaking => "handshaking",
            ClientStatus::Rehandshaking => "rehandshaking",
            ClientStatus::Connecting => "connecting",
            ClientStatus::Connected => "connected",
            ClientStatus::Disconnecting => "disconnecting",
            ClientStatus::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
