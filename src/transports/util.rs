//! Cookie handling for the HTTP transports.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

/// A cookie captured from a `Set-Cookie` response header.
///
/// Only the attributes the expiry logic needs are retained; everything else
/// the server sent is dropped. `time_received` anchors relative `Max-Age`
/// expiry to the response that set the cookie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value.
    pub value: String,
    /// Lifetime in seconds, relative to `time_received`.
    pub max_age: Option<i64>,
    /// Absolute expiry, used when `max_age` is absent.
    pub expires: Option<DateTime<Utc>>,
    /// When the response carrying the cookie was received.
    pub time_received: DateTime<Utc>,
}

impl Cookie {
    /// Parses a single `Set-Cookie` header value.
    pub fn parse(header: &str, time_received: DateTime<Utc>) -> Option<Cookie> {
        let mut attributes = header.split(';');
        let (name, value) = attributes.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let mut cookie = Cookie {
            name: name.to_owned(),
            value: value.trim().to_owned(),
            max_age: None,
            expires: None,
            time_received,
        };
        for attribute in attributes {
            let (key, value) = match attribute.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),
                None => (attribute.trim(), ""),
            };
            match key.to_ascii_lowercase().as_str() {
                "max-age" => cookie.max_age = value.parse().ok(),
                "expires" => cookie.expires = parse_http_date(value),
                _ => {}
            }
        }
        Some(cookie)
    }

    /// Whether the cookie has expired at `now`, `Max-Age` taking precedence
    /// over `Expires`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if let Some(seconds) = self.max_age {
            return self.time_received + Duration::seconds(seconds) <= now;
        }
        if let Some(expires) = self.expires {
            return expires <= now;
        }
        false
    }

    /// The `name=value` pair for a `Cookie` request header.
    pub fn pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Parses an HTTP date (the RFC 2822 profile servers actually send).
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value).ok().map(|date| date.with_timezone(&Utc))
}

/// The cookies a transport has collected, keyed and iterated by name.
#[derive(Clone, Debug, Default)]
pub struct CookieJar {
    cookies: BTreeMap<String, Cookie>,
}

impl CookieJar {
    /// An empty jar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks a cookie up by name.
    pub fn get(&self, name: &str) -> Option<&Cookie> {
        self.cookies.get(name)
    }

    /// Stores a cookie, replacing any previous one with the same name.
    pub fn set(&mut self, cookie: Cookie) {
        self.cookies.insert(cookie.name.clone(), cookie);
    }

    /// Absorbs `Set-Cookie` header values received at `time_received`.
    pub fn update<'a>(
        &mut self,
        headers: impl IntoIterator<Item = &'a str>,
        time_received: DateTime<Utc>,
    ) {
        for header in headers {
            if let Some(cookie) = Cookie::parse(header, time_received) {
                self.set(cookie);
            }
        }
    }

    /// The `name=value` pairs to send back, name-sorted, filtered to
    /// unexpired cookies unless `include_expired` is set.
    pub fn header_pairs(&self, include_expired: bool, now: DateTime<Utc>) -> Vec<String> {
        self.cookies
            .values()
            .filter(|cookie| include_expired || !cookie.is_expired(now))
            .map(Cookie::pair)
            .collect()
    }
}
