use std::{
    borrow::Borrow,
    fmt,
    hash::{Hash, Hasher},
};

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Prefix shared by every protocol-control channel.
pub const META_PREFIX: &str = "/meta";

/// Reserved channel for handshake exchanges.
pub static META_HANDSHAKE: Lazy<ChannelId> = Lazy::new(|| ChannelId::new("/meta/handshake"));
/// Reserved channel for connect (long-poll) exchanges.
pub static META_CONNECT: Lazy<ChannelId> = Lazy::new(|| ChannelId::new("/meta/connect"));
/// Reserved channel for disconnect exchanges.
pub static META_DISCONNECT: Lazy<ChannelId> = Lazy::new(|| ChannelId::new("/meta/disconnect"));
/// Reserved channel for subscribe exchanges.
pub static META_SUBSCRIBE: Lazy<ChannelId> = Lazy::new(|| ChannelId::new("/meta/subscribe"));
/// Reserved channel for unsubscribe exchanges.
pub static META_UNSUBSCRIBE: Lazy<ChannelId> = Lazy::new(|| ChannelId::new("/meta/unsubscribe"));
/// Local channel notified with publish acknowledgements.
pub static META_PUBLISH: Lazy<ChannelId> = Lazy::new(|| ChannelId::new("/meta/publish"));
/// Local channel notified with every failed exchange.
pub static META_UNSUCCESSFUL: Lazy<ChannelId> = Lazy::new(|| ChannelId::new("/meta/unsuccessful"));

/// A Bayeux channel path.
///
/// Channel ids behave as strings (equality and hashing delegate to the
/// underlying path) with the segments precomputed so classification and
/// wildcard enumeration need no reparsing.
#[derive(Clone, Debug, Eq)]
pub struct ChannelId {
    raw: String,
    segments: Vec<String>,
}

impl ChannelId {
    /// Wraps a channel path.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let segments = raw.split('/').map(str::to_owned).collect();
        Self { raw, segments }
    }

    /// The channel path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether this is a `/meta` protocol-control channel.
    pub fn is_meta(&self) -> bool {
        self.raw.starts_with(META_PREFIX)
    }

    /// Whether this is a shallow wildcard channel (`/a/b/*`).
    pub fn is_wild(&self) -> bool {
        self.raw.ends_with("/*")
    }

    /// Whether this is a deep wildcard channel (`/a/b/**`).
    pub fn is_wild_deep(&self) -> bool {
        self.raw.ends_with("/**")
    }

    /// The path segments, excluding the leading empty one.
    pub fn parts(&self) -> &[String] {
        if self.segments.len() <= 1 {
            &[]
        } else {
            &self.segments[1..]
        }
    }

    /// The wildcard channels matching this one, most specific first.
    ///
    /// For `/a/b/c` this is `/a/b/*`, `/a/b/**`, `/a/**`, `/**`; the shallow
    /// wildcard only appears for the deepest named segment.
    pub fn wilds(&self) -> Vec<ChannelId> {
        let mut wilds = Vec::new();
        let last = self.segments.len() - 1;
        for index in (1..=last).rev() {
            let name = format!("{}/*", self.segments[..index].join("/"));
            if index == last {
                wilds.push(ChannelId::new(name.as_str()));
            }
            wilds.push(ChannelId::new(format!("{name}*")));
        }
        wilds
    }
}

impl PartialEq for ChannelId {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl PartialEq<str> for ChannelId {
    fn eq(&self, other: &str) -> bool {
        self.raw == other
    }
}

impl PartialEq<&str> for ChannelId {
    fn eq(&self, other: &&str) -> bool {
        self.raw == *other
    }
}

impl Hash for ChannelId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state)
    }
}

impl Borrow<str> for ChannelId {
    fn borrow(&self) -> &str {
        &self.raw
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for ChannelId {
    fn from(raw: &str) -> Self {
        ChannelId::new(raw)
    }
}

impl From<String> for ChannelId {
    fn from(raw: String) -> Self {
        ChannelId::new(raw)
    }
}

impl From<&ChannelId> for ChannelId {
    fn from(id: &ChannelId) -> Self {
        id.clone()
    }
}

impl Serialize for ChannelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for ChannelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(ChannelId::new(String::deserialize(deserializer)?))
    }
}
