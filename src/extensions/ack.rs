use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use super::{Extension, ExtensionError};
use crate::{
    channel_id::{META_CONNECT, META_HANDSHAKE},
    client::Client,
    message::{self, Message},
};

const FIELD_ACK: &str = "ack";

/// Negotiates per-connect acknowledgement ids with the server.
///
/// During the handshake the extension advertises whether the client wants
/// acks (the `ack_enabled` client option). When the server confirms support,
/// every successful meta connect receipt records the server's ack id and
/// every outgoing meta connect echoes it back, letting the server detect
/// messages lost across reconnects.
#[derive(Debug, Default)]
pub struct AckExtension {
    state: Mutex<AckState>,
}

#[derive(Debug, Default)]
struct AckState {
    client: Option<Client>,
    server_supports_acks: bool,
    ack_id: Option<i64>,
}

impl AckExtension {
    /// Creates the extension.
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent ack id received from the server.
    pub fn ack_id(&self) -> Option<i64> {
        self.state.lock().ack_id
    }

    /// Whether the server confirmed ack support during the handshake.
    pub fn server_supports_acks(&self) -> bool {
        self.state.lock().server_supports_acks
    }

    fn ack_of(message: &Message) -> Option<Value> {
        message.ext().and_then(|ext| ext.get(FIELD_ACK)).cloned()
    }

    fn set_ack(message: &mut Message, value: Value) {
        message.ext_mut().insert(FIELD_ACK.to_owned(), value);
    }
}

impl Extension for AckExtension {
    fn name(&self) -> &str {
        "ack"
    }

    fn register(&self, client: Client) {
        self.state.lock().client = Some(client);
    }

    fn unregister(&self) {
        self.state.lock().client = None;
    }

    fn receive(&self, message: Message) -> Result<Option<Message>, ExtensionError> {
        let mut state = self.state.lock();
        if message.channel_is(&META_HANDSHAKE) {
            if Self::ack_of(&message).map_or(false, |ack| message::truthy(&ack)) {
                state.server_supports_acks = true;
            }
            debug!(supported = state.server_supports_acks, "server ack support");
        } else if state.server_supports_acks
            && message.channel_is(&META_CONNECT)
            && message.successful().unwrap_or(false)
        {
            if let Some(ack_id) = Self::ack_of(&message).and_then(|ack| ack.as_i64()) {
                debug!(ack_id, "server sent ack id");
                state.ack_id = Some(ack_id);
            }
        }
        Ok(Some(message))
    }

    fn send(&self, mut message: Message) -> Result<Option<Message>, ExtensionError> {
        let mut state = self.state.lock();
        if message.channel_is(&META_HANDSHAKE) {
            let enabled =
                state.client.as_ref().map_or(true, |client| client.options().ack_enabled);
            Self::set_ack(&mut message, Value::Bool(enabled));
            debug!("handshake being sent, clearing ack id");
            state.ack_id = None;
        } else if state.server_supports_acks && message.channel_is(&META_CONNECT) {
            debug!(ack_id = ?state.ack_id, "sending ack id");
            Self::set_ack(&mut message, state.ack_id.map_or(Value::Null, Value::from));
        }
        Ok(Some(message))
    }
}
