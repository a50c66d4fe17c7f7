use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE, DATE, SET_COOKIE,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use url::Url;

use super::{
    util::{parse_http_date, Cookie, CookieJar},
    Transport, DEFAULT_MAXIMUM_NETWORK_DELAY,
};
use crate::{client::Client, errors::BayeuxError, message::Message};

/// Options recognized by [`LongPollingTransport`].
#[derive(Clone, Debug)]
pub struct HttpOptions {
    /// Extra headers attached to every request.
    pub request_headers: HeaderMap,
    /// Base network timeout, in milliseconds.
    pub maximum_network_delay: u64,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            request_headers: HeaderMap::new(),
            maximum_network_delay: DEFAULT_MAXIMUM_NETWORK_DELAY,
        }
    }
}

/// The classic Bayeux HTTP transport.
///
/// Batches are POSTed as JSON arrays and the server holds the connection
/// open until it has messages for the client or the advice timeout elapses.
/// Completion is reported back to the owning client from a spawned task, so
/// `send` never blocks the caller.
pub struct LongPollingTransport {
    options: Mutex<HttpOptions>,
    cookies: Arc<Mutex<CookieJar>>,
    inner: Mutex<Inner>,
}

struct Inner {
    client: Option<Client>,
    url: Option<Url>,
    append_message_type: bool,
    http: reqwest::Client,
    requests: Vec<JoinHandle<()>>,
}

impl LongPollingTransport {
    /// Creates the transport with default options.
    pub fn new() -> Self {
        Self::with_options(HttpOptions::default())
    }

    /// Creates the transport with the given options.
    pub fn with_options(options: HttpOptions) -> Self {
        Self {
            options: Mutex::new(options),
            cookies: Arc::new(Mutex::new(CookieJar::new())),
            inner: Mutex::new(Inner {
                client: None,
                url: None,
                append_message_type: false,
                http: reqwest::Client::new(),
                requests: Vec::new(),
            }),
        }
    }

    /// Appends a header sent with every request.
    pub fn add_header(&self, name: HeaderName, value: HeaderValue) {
        self.options.lock().request_headers.append(name, value);
    }

    /// Replaces a header sent with every request.
    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.options.lock().request_headers.insert(name, value);
    }

    /// Removes a header, reporting whether it was present.
    pub fn remove_header(&self, name: &HeaderName) -> bool {
        self.options.lock().request_headers.remove(name).is_some()
    }

    /// Looks a collected cookie up by name.
    pub fn cookie(&self, name: &str) -> Option<Cookie> {
        self.cookies.lock().get(name).cloned()
    }

    /// Stores a cookie as if the server had set it.
    pub fn set_cookie(&self, cookie: Cookie) {
        self.cookies.lock().set(cookie);
    }

    /// The `name=value` pairs the transport would send right now.
    pub fn cookie_headers(&self, include_expired: bool) -> Vec<String> {
        self.cookies.lock().header_pairs(include_expired, Utc::now())
    }

    fn request_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json; charset=UTF-8"));
        for (name, value) in self.options.lock().request_headers.iter() {
            headers.append(name.clone(), value.clone());
        }
        let pairs = self.cookies.lock().header_pairs(false, Utc::now());
        if !pairs.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&pairs.join("; ")) {
                headers.insert(COOKIE, value);
            }
        }
        headers
    }

    /// The URL for a batch: the registered URL, with the meta subpath
    /// appended for a lone meta message when the base URL allows it.
    fn request_url(&self, inner: &Inner, messages: &[Message]) -> Option<Url> {
        let url = inner.url.clone()?;
        if !inner.append_message_type {
            return Some(url);
        }
        let [message] = messages else { return Some(url) };
        let Some(channel) = message.channel().filter(|channel| channel.is_meta()) else {
            return Some(url);
        };
        let message_type = channel.parts()[1..].join("/");
        let mut raw = url.to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        raw.push_str(&message_type);
        Some(Url::parse(&raw).unwrap_or(url))
    }
}

impl Default for LongPollingTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LongPollingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongPollingTransport")
            .field("url", &self.inner.lock().url)
            .finish()
    }
}

impl Transport for LongPollingTransport {
    fn name(&self) -> &str {
        "long-polling"
    }

    fn accept(&self, _bayeux_version: &str) -> bool {
        true
    }

    fn register(&self, client: Client, url: &str) -> Result<(), BayeuxError> {
        let parsed = super::parse_url(self.name(), url)?;
        let append_message_type = parsed.query().is_none() && parsed.fragment().is_none();
        let mut inner = self.inner.lock();
        inner.client = Some(client);
        inner.url = Some(parsed);
        inner.append_message_type = append_message_type;
        Ok(())
    }

    fn unregister(&self) {
        let mut inner = self.inner.lock();
        inner.client = None;
        inner.url = None;
    }

    fn reset(&self) {
        debug!("transport reset");
    }

    fn abort(&self) {
        debug!("cancelling pending requests");
        let mut inner = self.inner.lock();
        for request in inner.requests.drain(..) {
            request.abort();
        }
        inner.http = reqwest::Client::new();
    }

    fn send(&self, messages: Vec<Message>, sync: bool) {
        let timeout = self.timeout(&messages);
        let headers = self.request_headers();
        let (client, http, url) = {
            let mut inner = self.inner.lock();
            inner.requests.retain(|request| !request.is_finished());
            let (Some(client), Some(url)) =
                (inner.client.clone(), self.request_url(&inner, &messages))
            else {
                warn!(count = messages.len(), "transport not registered, dropping messages");
                return;
            };
            (client, inner.http.clone(), url)
        };
        let body = match Message::to_json(&messages) {
            Ok(body) => body,
            Err(source) => {
                fail(&client, messages, BayeuxError::Communication(source.to_string()));
                return;
            }
        };
        if sync {
            debug!("sync send requested, flushing on a best-effort basis");
        }

        debug!(url = %url, bytes = body.len(), "posting messages");
        let cookies = self.cookies.clone();
        let request = tokio::spawn(async move {
            let result =
                http.post(url).headers(headers).timeout(timeout).body(body).send().await;
            let response = match result {
                Ok(response) => response,
                Err(source) if source.is_timeout() => {
                    fail(&client, messages, BayeuxError::Timeout);
                    return;
                }
                Err(source) => {
                    fail(&client, messages, BayeuxError::Communication(source.to_string()));
                    return;
                }
            };

            let status = response.status();
            debug!(status = %status, "received response");
            if !status.is_success() {
                fail(&client, messages, BayeuxError::Server(status.as_u16()));
                return;
            }

            let time_received = response
                .headers()
                .get(DATE)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_http_date)
                .unwrap_or_else(Utc::now);
            let set_cookies: Vec<String> = response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok().map(str::to_owned))
                .collect();
            cookies
                .lock()
                .update(set_cookies.iter().map(String::as_str), time_received);

            let bytes = match response.bytes().await {
                Ok(bytes) => bytes,
                Err(source) => {
                    fail(&client, messages, BayeuxError::Communication(source.to_string()));
                    return;
                }
            };
            debug!(bytes = bytes.len(), "received body");
            match Message::from_json(&bytes) {
                Ok(received) => {
                    if let Err(source) = client.receive_messages(received) {
                        error!(error = %source, "failed to process received messages");
                    }
                }
                Err(source) => {
                    fail(&client, messages, BayeuxError::Communication(source.to_string()))
                }
            }
        });
        self.inner.lock().requests.push(request);
    }

    fn maximum_network_delay(&self) -> u64 {
        self.options.lock().maximum_network_delay
    }
}

fn fail(client: &Client, messages: Vec<Message>, error: BayeuxError) {
    debug!(error = %error, "failed to send messages");
    if let Err(source) = client.fail_messages(messages, error) {
        error!(error = %source, "failure handling raised");
    }
}
