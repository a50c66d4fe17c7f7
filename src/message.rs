use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{
    advice::{Advice, Reconnect},
    channel_id::ChannelId,
    errors::BayeuxError,
};

/// Python-style truthiness for JSON values, used to decide whether a message
/// carries deliverable data.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map_or(true, |number| number != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(entries) => !entries.is_empty(),
    }
}

/// A Bayeux message: a string-keyed JSON map with typed views over the
/// recognized protocol fields.
///
/// Unknown fields round-trip untouched through the JSON codec. Failure
/// messages generated locally additionally carry the triggering error and
/// the original request; those two fields never serialize.
#[derive(Clone, Debug, Default)]
pub struct Message {
    fields: Map<String, Value>,
    exception: Option<BayeuxError>,
    request: Option<Box<Message>>,
}

impl Message {
    /// The `advice` field name.
    pub const ADVICE: &'static str = "advice";
    /// The `channel` field name.
    pub const CHANNEL: &'static str = "channel";
    /// The `clientId` field name.
    pub const CLIENT_ID: &'static str = "clientId";
    /// The `connectionType` field name.
    pub const CONNECTION_TYPE: &'static str = "connectionType";
    /// The `data` field name.
    pub const DATA: &'static str = "data";
    /// The `error` field name.
    pub const ERROR: &'static str = "error";
    /// The `ext` field name.
    pub const EXT: &'static str = "ext";
    /// The `id` field name.
    pub const ID: &'static str = "id";
    /// The `interval` field name (inside `advice`).
    pub const INTERVAL: &'static str = "interval";
    /// The `minimumVersion` field name.
    pub const MINIMUM_VERSION: &'static str = "minimumVersion";
    /// The `reconnect` field name (inside `advice`).
    pub const RECONNECT: &'static str = "reconnect";
    /// The `subscription` field name.
    pub const SUBSCRIPTION: &'static str = "subscription";
    /// The `successful` field name.
    pub const SUCCESSFUL: &'static str = "successful";
    /// The `supportedConnectionTypes` field name.
    pub const SUPPORTED_CONNECTION_TYPES: &'static str = "supportedConnectionTypes";
    /// The `timeout` field name (inside `advice`).
    pub const TIMEOUT: &'static str = "timeout";
    /// The `timestamp` field name.
    pub const TIMESTAMP: &'static str = "timestamp";
    /// The `version` field name.
    pub const VERSION: &'static str = "version";

    /// An empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a raw field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Sets a raw field.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Removes a raw field, returning its previous value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Whether the field is present.
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Copies every field of `other` into this message.
    pub fn merge(&mut self, other: &Message) {
        for (field, value) in &other.fields {
            self.fields.insert(field.clone(), value.clone());
        }
    }

    /// The channel the message travels on.
    pub fn channel(&self) -> Option<ChannelId> {
        self.get(Self::CHANNEL).and_then(Value::as_str).map(ChannelId::new)
    }

    /// Whether the message travels on the given channel.
    pub fn channel_is(&self, channel: &ChannelId) -> bool {
        self.get(Self::CHANNEL).and_then(Value::as_str) == Some(channel.as_str())
    }

    /// Sets the channel, canonicalizing through [`ChannelId`].
    pub fn set_channel(&mut self, channel: impl Into<ChannelId>) {
        self.set(Self::CHANNEL, channel.into().as_str());
    }

    /// Builder-style [`set_channel`](Self::set_channel).
    pub fn with_channel(mut self, channel: impl Into<ChannelId>) -> Self {
        self.set_channel(channel);
        self
    }

    /// The session id assigned by the server.
    pub fn client_id(&self) -> Option<&str> {
        self.get(Self::CLIENT_ID).and_then(Value::as_str)
    }

    /// Builder-style client id setter.
    pub fn with_client_id(self, client_id: &str) -> Self {
        self.with(Self::CLIENT_ID, client_id)
    }

    /// The message id.
    pub fn id(&self) -> Option<&str> {
        self.get(Self::ID).and_then(Value::as_str)
    }

    /// Builder-style id setter.
    pub fn with_id(self, id: &str) -> Self {
        self.with(Self::ID, id)
    }

    /// The application payload.
    pub fn data(&self) -> Option<&Value> {
        self.get(Self::DATA)
    }

    /// Whether the message carries a non-empty payload.
    pub fn has_data(&self) -> bool {
        self.data().map_or(false, truthy)
    }

    /// Builder-style data setter.
    pub fn with_data(self, data: impl Into<Value>) -> Self {
        self.with(Self::DATA, data)
    }

    /// The success flag, absent on server pushes.
    pub fn successful(&self) -> Option<bool> {
        self.get(Self::SUCCESSFUL).and_then(Value::as_bool)
    }

    /// Builder-style success flag setter.
    pub fn with_successful(self, successful: bool) -> Self {
        self.with(Self::SUCCESSFUL, successful)
    }

    /// Whether the message is anything but an explicit success.
    pub fn failure(&self) -> bool {
        !self.successful().unwrap_or(false)
    }

    /// The advice the message carries, if any. An empty advice object counts
    /// as absent.
    pub fn advice(&self) -> Option<Advice> {
        let value = self.get(Self::ADVICE)?;
        if !truthy(value) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Sets the advice field.
    pub fn set_advice(&mut self, advice: &Advice) {
        self.set(Self::ADVICE, Value::from(advice));
    }

    /// Builder-style [`set_advice`](Self::set_advice).
    pub fn with_advice(mut self, advice: &Advice) -> Self {
        self.set_advice(advice);
        self
    }

    /// The extension envelope.
    pub fn ext(&self) -> Option<&Map<String, Value>> {
        self.get(Self::EXT).and_then(Value::as_object)
    }

    /// The extension envelope, created as an empty object when absent.
    pub fn ext_mut(&mut self) -> &mut Map<String, Value> {
        let entry = self
            .fields
            .entry(Self::EXT.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        entry.as_object_mut().expect("ext was just made an object")
    }

    /// The channel a subscribe/unsubscribe refers to.
    pub fn subscription(&self) -> Option<ChannelId> {
        self.get(Self::SUBSCRIPTION).and_then(Value::as_str).map(ChannelId::new)
    }

    /// Sets the subscription channel.
    pub fn set_subscription(&mut self, channel: impl Into<ChannelId>) {
        self.set(Self::SUBSCRIPTION, channel.into().as_str());
    }

    /// Builder-style [`set_subscription`](Self::set_subscription).
    pub fn with_subscription(mut self, channel: impl Into<ChannelId>) -> Self {
        self.set_subscription(channel);
        self
    }

    /// The transport name a connect rides on.
    pub fn connection_type(&self) -> Option<&str> {
        self.get(Self::CONNECTION_TYPE).and_then(Value::as_str)
    }

    /// Builder-style connection type setter.
    pub fn with_connection_type(self, connection_type: &str) -> Self {
        self.with(Self::CONNECTION_TYPE, connection_type)
    }

    /// The transports the sender supports.
    pub fn supported_connection_types(&self) -> Vec<String> {
        self.get(Self::SUPPORTED_CONNECTION_TYPES)
            .and_then(Value::as_array)
            .map(|types| {
                types.iter().filter_map(Value::as_str).map(str::to_owned).collect()
            })
            .unwrap_or_default()
    }

    /// Builder-style supported connection types setter.
    pub fn with_supported_connection_types(self, types: &[String]) -> Self {
        self.with(Self::SUPPORTED_CONNECTION_TYPES, types.to_vec())
    }

    /// The protocol version.
    pub fn version(&self) -> Option<&str> {
        self.get(Self::VERSION).and_then(Value::as_str)
    }

    /// The oldest protocol version the sender accepts.
    pub fn minimum_version(&self) -> Option<&str> {
        self.get(Self::MINIMUM_VERSION).and_then(Value::as_str)
    }

    /// Builder-style version setter.
    pub fn with_version(self, version: &str) -> Self {
        self.with(Self::VERSION, version)
    }

    /// The error description supplied by the server.
    pub fn error(&self) -> Option<&str> {
        self.get(Self::ERROR).and_then(Value::as_str)
    }

    /// The timestamp stamped by the timestamp extension.
    pub fn timestamp(&self) -> Option<&str> {
        self.get(Self::TIMESTAMP).and_then(Value::as_str)
    }

    /// The error behind a locally generated failure message.
    pub fn exception(&self) -> Option<&BayeuxError> {
        self.exception.as_ref()
    }

    /// The request a locally generated failure message wraps.
    pub fn request(&self) -> Option<&Message> {
        self.request.as_deref()
    }

    /// Builds the failure message reported to listeners when `request` could
    /// not be exchanged with the server.
    ///
    /// The id and channel are cloned from the request, `successful` is
    /// forced to `false` and the advice defaults to
    /// `{reconnect: "none", interval: 0}`; failure handlers override the
    /// advice where the protocol calls for a retry.
    pub fn failure_from(request: &Message, exception: Option<BayeuxError>) -> Message {
        let mut message = Message::new().with_successful(false);
        message
            .set_advice(&Advice::new().with_reconnect(Reconnect::None).with_interval(0));
        if let Some(id) = request.id() {
            let id = id.to_owned();
            message.set(Self::ID, id);
        }
        if let Some(channel) = request.channel() {
            message.set_channel(channel);
        }
        message.request = Some(Box::new(request.clone()));
        message.exception = exception;
        message
    }

    /// Decodes a JSON array or single JSON object into messages.
    pub fn from_json(bytes: &[u8]) -> Result<Vec<Message>, serde_json::Error> {
        let value: Value = serde_json::from_slice(bytes)?;
        let items = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        items
            .into_iter()
            .map(|item| serde_json::from_value::<Map<String, Value>>(item).map(Message::from))
            .collect()
    }

    /// Encodes messages as a JSON array, even for a single message.
    pub fn to_json(messages: &[Message]) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(messages)
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
            && self.exception == other.exception
            && self.request == other.request
    }
}

impl From<Map<String, Value>> for Message {
    fn from(fields: Map<String, Value>) -> Self {
        Message { fields, exception: None, request: None }
    }
}

impl From<&Message> for Value {
    fn from(message: &Message) -> Value {
        Value::Object(message.fields.clone())
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Message::from(Map::<String, Value>::deserialize(deserializer)?))
    }
}
