//! `SessionNegotiator` trait and the HTTP implementation.
//!
//! One request/response exchange turns client credentials into a
//! [`Session`]: a server-issued id, the channel endpoint and the token that
//! authorises this client to publish audio on it.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::{ChannelConfig, ClientConfig};

/// Path appended to the API base address.
pub const SESSION_PATH: &str = "/session-storage/session";

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Errors that can occur while negotiating a session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// HTTP transport or connection error.
    #[error("session request failed: {0}")]
    Request(String),

    /// The request did not complete within the configured timeout.
    #[error("session request timed out")]
    Timeout,

    /// The server answered outside the 2xx range.
    #[error("session_http_error_{0}")]
    Status(u16),

    /// The response body is not the expected JSON document.
    #[error("malformed session response: {0}")]
    Malformed(String),

    /// A required field is absent or not a string.
    #[error("session response is missing `{0}`")]
    MissingField(&'static str),
}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SessionError::Timeout
        } else {
            SessionError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One negotiated translation session.  Lives from `start` to teardown.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    /// Base address of the message channel (`ws_url`).
    pub channel_endpoint: String,
    /// Publisher token authorising this client on the channel.
    pub auth_token: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("channel_endpoint", &self.channel_endpoint)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        channel_endpoint: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            channel_endpoint: channel_endpoint.into(),
            auth_token: auth_token.into(),
        }
    }

    /// Full channel address: `{ws_url}?token={publisher}`.
    ///
    /// ```rust
    /// use translate_bridge::session::Session;
    ///
    /// let s = Session::new("s1", "wss://x", "tok");
    /// assert_eq!(s.channel_url(), "wss://x?token=tok");
    /// ```
    pub fn channel_url(&self) -> String {
        let sep = if self.channel_endpoint.contains('?') {
            '&'
        } else {
            '?'
        };
        format!("{}{}token={}", self.channel_endpoint, sep, self.auth_token)
    }
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SessionEnvelope {
    data: Option<SessionData>,
}

#[derive(Deserialize)]
struct SessionData {
    id: Option<String>,
    ws_url: Option<String>,
    publisher: Option<String>,
}

/// Turn an HTTP status and body into a [`Session`].
///
/// Fails on a non-2xx status, a body that is not JSON of the expected shape,
/// or a missing/empty `id`, `ws_url` or `publisher`.
pub fn parse_session_response(status: u16, body: &str) -> Result<Session, SessionError> {
    if !(200..300).contains(&status) {
        return Err(SessionError::Status(status));
    }

    let envelope: SessionEnvelope =
        serde_json::from_str(body).map_err(|e| SessionError::Malformed(e.to_string()))?;
    let data = envelope.data.ok_or(SessionError::MissingField("data"))?;

    fn required(value: Option<String>, name: &'static str) -> Result<String, SessionError> {
        value
            .filter(|v| !v.is_empty())
            .ok_or(SessionError::MissingField(name))
    }

    Ok(Session {
        id: required(data.id, "data.id")?,
        channel_endpoint: required(data.ws_url, "data.ws_url")?,
        auth_token: required(data.publisher, "data.publisher")?,
    })
}

// ---------------------------------------------------------------------------
// SessionNegotiator trait
// ---------------------------------------------------------------------------

/// Obtains a [`Session`] for a client.  No retries: the caller decides
/// whether to try again.
#[async_trait]
pub trait SessionNegotiator: Send + Sync {
    async fn create_session(&self, config: &ClientConfig) -> Result<Session, SessionError>;
}

// ---------------------------------------------------------------------------
// HttpNegotiator
// ---------------------------------------------------------------------------

/// Negotiates sessions with `POST {api_url}/session-storage/session`.
pub struct HttpNegotiator {
    client: reqwest::Client,
}

impl HttpNegotiator {
    /// Build a negotiator whose requests time out after
    /// `config.request_timeout_secs`.
    pub fn from_config(config: &ChannelConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .unwrap_or_else(|e| {
                log::warn!("session: HTTP client builder failed ({e}), using defaults");
                reqwest::Client::new()
            });
        Self { client }
    }

    /// Request body: a publisher-only session.
    pub fn request_body() -> serde_json::Value {
        serde_json::json!({
            "data": {
                "subscriber_count": 0,
                "publisher_can_subscribe": true
            }
        })
    }
}

#[async_trait]
impl SessionNegotiator for HttpNegotiator {
    async fn create_session(&self, config: &ClientConfig) -> Result<Session, SessionError> {
        let url = format!("{}{}", config.api_url.trim_end_matches('/'), SESSION_PATH);
        log::debug!("session: POST {url}");

        let response = self
            .client
            .post(&url)
            .header("ClientId", &config.client_id)
            .header("ClientSecret", &config.client_secret)
            .json(&Self::request_body())
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        let session = parse_session_response(status, &body)?;

        log::info!("session: created {}", session.id);
        Ok(session)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
