use thiserror::Error;

use crate::status::ClientStatus;

/// Errors raised by the Bayeux client.
///
/// Every fallible operation in this crate reports through this single
/// taxonomy. Variants compare equal when their payloads match, which lets
/// failure messages delivered to listeners be asserted against the error
/// that produced them.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BayeuxError {
    /// The server advised a reconnect action the client does not recognize.
    #[error("unrecognized advice action \"{0}\"")]
    Action(String),

    /// A batch was ended without a matching start.
    #[error("batch ended without a matching start")]
    Batch,

    /// An opaque transport failure, carrying the underlying description.
    #[error("communication error: {0}")]
    Communication(String),

    /// A transport was given a URL it cannot connect to.
    #[error("invalid connection string \"{value}\" for transport {transport}")]
    ConnectionString {
        /// Name of the rejecting transport.
        transport: String,
        /// The offending URL.
        value: String,
    },

    /// The server responded with a non-successful HTTP status.
    #[error("server responded with error code {0}")]
    Server(u16),

    /// The client status does not allow the attempted operation.
    #[error("client status \"{0}\" is not valid for this operation")]
    Status(ClientStatus),

    /// A transport-level network timeout.
    #[error("operation timed out")]
    Timeout,

    /// The client and server could not agree on a transport.
    #[error(
        "could not negotiate transport with server; client: {}; server: {}",
        .client_types.join(", "),
        .server_types.join(", ")
    )]
    TransportNegotiation {
        /// Transports the client offered.
        client_types: Vec<String>,
        /// Transports the server supports.
        server_types: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(
            BayeuxError::Action("bounce".into()).to_string(),
            "unrecognized advice action \"bounce\""
        );
        assert_eq!(
            BayeuxError::ConnectionString {
                transport: "long-polling".into(),
                value: "not-a-url".into()
            }
            .to_string(),
            "invalid connection string \"not-a-url\" for transport long-polling"
        );
        assert_eq!(BayeuxError::Server(502).to_string(), "server responded with error code 502");
        assert_eq!(
            BayeuxError::Status(ClientStatus::Disconnected).to_string(),
            "client status \"disconnected\" is not valid for this operation"
        );
        assert_eq!(
            BayeuxError::TransportNegotiation {
                client_types: vec!["long-polling".into()],
                server_types: vec!["websocket".into(), "callback-polling".into()],
            }
            .to_string(),
            "could not negotiate transport with server; client: long-polling; \
             server: websocket, callback-polling"
        );
    }

    #[test]
    fn equality() {
        assert_eq!(BayeuxError::Timeout, BayeuxError::Timeout);
        assert_eq!(BayeuxError::Server(404), BayeuxError::Server(404));
        assert_ne!(BayeuxError::Server(404), BayeuxError::Server(500));
        assert_ne!(
            BayeuxError::Status(ClientStatus::Connected),
            BayeuxError::Status(ClientStatus::Disconnected)
        );
        assert_ne!(BayeuxError::Batch, BayeuxError::Timeout);
    }
}
