use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Reconnect action advised by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reconnect {
    /// Retry the failed connect.
    Retry,
    /// Re-handshake before connecting again.
    Handshake,
    /// Stop reconnecting and disconnect.
    None,
    /// An action this client does not recognize.
    Unknown(String),
}

impl Reconnect {
    /// The wire form of the action.
    pub fn as_str(&self) -> &str {
        match self {
            Reconnect::Retry => "retry",
            Reconnect::Handshake => "handshake",
            Reconnect::None => "none",
            Reconnect::Unknown(other) => other,
        }
    }
}

impl fmt::Display for Reconnect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Reconnect {
    fn from(value: &str) -> Self {
        match value {
            "retry" => Reconnect::Retry,
            "handshake" => Reconnect::Handshake,
            "none" => Reconnect::None,
            other => Reconnect::Unknown(other.to_owned()),
        }
    }
}

impl Serialize for Reconnect {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Reconnect {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Reconnect::from(String::deserialize(deserializer)?.as_str()))
    }
}

/// Server-supplied hints controlling reconnection behavior.
///
/// Every field is optional on the wire; the client merges whatever a message
/// carries over its configured defaults to form the effective advice.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    /// What to do after a connect failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<Reconnect>,
    /// Delay added before the next send, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// How long the server may hold a long poll open, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Advice {
    /// Advice with no fields set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reconnect action.
    pub fn with_reconnect(mut self, reconnect: Reconnect) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    /// Sets the interval, in milliseconds.
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Sets the timeout, in milliseconds.
    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overlays this advice on `defaults`; fields present here win.
    pub fn merged_over(&self, defaults: &Advice) -> Advice {
        Advice {
            reconnect: self.reconnect.clone().or_else(|| defaults.reconnect.clone()),
            interval: self.interval.or(defaults.interval),
            timeout: self.timeout.or(defaults.timeout),
        }
    }
}

impl From<&Advice> for Value {
    fn from(advice: &Advice) -> Value {
        let mut map = Map::new();
        if let Some(reconnect) = &advice.reconnect {
            map.insert("reconnect".to_owned(), Value::from(reconnect.as_str()));
        }
        if let Some(interval) = advice.interval {
            map.insert("interval".to_owned(), Value::from(interval));
        }
        if let Some(timeout) = advice.timeout {
            map.insert("timeout".to_owned(), Value::from(timeout));
        }
        Value::Object(map)
    }
}
