//! Cookie-persisting HTTP client used to emulate a browser session.
//!
//! The university's login infrastructure only cooperates with clients that
//! behave like a real browser: cookies must be carried across every hop,
//! redirects must be inspected rather than followed, and some pages demand a
//! specific referer. This client keeps its own name-keyed cookie jar and
//! surfaces 3xx responses as ordinary data so callers can read both the
//! `Location` header and the response body.

use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, CACHE_CONTROL, CONTENT_TYPE, COOKIE,
    LOCATION, REFERER, SET_COOKIE,
};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Default user agent, matching what the report server expects to see.
const DEFAULT_USER_AGENT: &str = "AutoMarkCheckBot/1.0";

/// Errors from the session layer.
///
/// Only failures to reach the server live here. Unexpected status codes and
/// unexpected page contents are the caller's concern.
#[derive(Debug, Error)]
pub enum SessionError {
    /// DNS, connect, TLS, or timeout failure
    #[error("transport error: {message}")]
    Transport { message: String },

    /// A header value (usually the referer) could not be encoded
    #[error("invalid header value: {message}")]
    BadHeader { message: String },
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Transport {
            message: err.to_string(),
        }
    }
}

/// Outcome of a session request.
///
/// A redirect is a successful result here, not an error: SAML flows routinely
/// answer a credentials POST with a 302 whose body still matters (rejection
/// strings appear in it) and whose `Location` drives the next hop.
#[derive(Debug)]
pub enum SessionResponse {
    /// Any non-3xx response, whatever its status code.
    Page {
        status: StatusCode,
        body: String,
        headers: HeaderMap,
    },
    /// A 3xx response carrying a `Location` header.
    Redirect {
        status: StatusCode,
        location: String,
        body: String,
        headers: HeaderMap,
    },
}

impl SessionResponse {
    /// The response body, regardless of variant.
    pub fn body(&self) -> &str {
        match self {
            SessionResponse::Page { body, .. } => body,
            SessionResponse::Redirect { body, .. } => body,
        }
    }

    /// Consumes the response, returning its body.
    pub fn into_body(self) -> String {
        match self {
            SessionResponse::Page { body, .. } => body,
            SessionResponse::Redirect { body, .. } => body,
        }
    }

    /// The response headers, regardless of variant.
    pub fn headers(&self) -> &HeaderMap {
        match self {
            SessionResponse::Page { headers, .. } => headers,
            SessionResponse::Redirect { headers, .. } => headers,
        }
    }

    /// The HTTP status code.
    pub fn status(&self) -> StatusCode {
        match self {
            SessionResponse::Page { status, .. } => *status,
            SessionResponse::Redirect { status, .. } => *status,
        }
    }

    /// The redirect target, if this was a 3xx response.
    pub fn redirect_location(&self) -> Option<&str> {
        match self {
            SessionResponse::Redirect { location, .. } => Some(location),
            SessionResponse::Page { .. } => None,
        }
    }
}

/// A cookie stored in the jar.
#[derive(Debug, Clone)]
struct StoredCookie {
    value: String,
    /// Path attribute as the server sent it. The jar attaches every cookie
    /// to every request regardless, but the recorded path keeps the
    /// force-widening workaround observable.
    path: Option<String>,
}

/// Configuration for a [`SessionClient`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Stateful HTTP client that accumulates cookies across requests.
///
/// One instance backs exactly one login attempt; the jar is never shared and
/// never persisted. Redirect following is disabled so callers see every hop.
pub struct SessionClient {
    client: Client,
    cookies: BTreeMap<String, StoredCookie>,
    user_agent: String,
}

impl SessionClient {
    /// Creates a client with default configuration.
    pub fn new() -> Result<Self, SessionError> {
        Self::with_config(SessionConfig::default())
    }

    /// Creates a client with custom configuration.
    pub fn with_config(config: SessionConfig) -> Result<Self, SessionError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SessionError::Transport {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            cookies: BTreeMap::new(),
            user_agent: config.user_agent,
        })
    }

    /// The user agent this client sends.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Performs a GET, carrying the jar's cookies and standard headers.
    pub async fn get(
        &mut self,
        url: &str,
        referer: Option<&str>,
    ) -> Result<SessionResponse, SessionError> {
        trace!(url, "session GET");

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "*/*")
            .header(ACCEPT_ENCODING, "identity")
            .header(CACHE_CONTROL, "no-cache");

        if let Some(header) = self.cookie_header() {
            request = request.header(COOKIE, header);
        }
        if let Some(referer) = referer {
            request = request.header(REFERER, encode_header(referer)?);
        }

        let response = request.send().await?;
        self.absorb(response).await
    }

    /// Performs a form POST.
    ///
    /// Field values are joined verbatim (`k=v&k=v`); values that need
    /// percent-escaping must arrive pre-escaped, since SAML payloads are
    /// escaped selectively by the login flows.
    pub async fn post(
        &mut self,
        url: &str,
        fields: &[(&str, String)],
        referer: Option<&str>,
    ) -> Result<SessionResponse, SessionError> {
        let body = fields
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&");

        trace!(url, bytes = body.len(), "session POST");

        let mut request = self
            .client
            .post(url)
            .header(ACCEPT, "*/*")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(CACHE_CONTROL, "no-cache")
            .body(body);

        if let Some(header) = self.cookie_header() {
            request = request.header(COOKIE, header);
        }
        if let Some(referer) = referer {
            request = request.header(REFERER, encode_header(referer)?);
        }

        let response = request.send().await?;
        self.absorb(response).await
    }

    /// Reads the value of a stored cookie.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|c| c.value.as_str())
    }

    /// Inserts or replaces a cookie.
    pub fn set_cookie(&mut self, name: &str, value: &str) {
        self.cookies.insert(
            name.to_string(),
            StoredCookie {
                value: value.to_string(),
                path: None,
            },
        );
    }

    /// Resets the cookie jar.
    pub fn clear_cookies(&mut self) {
        self.cookies.clear();
    }

    /// Widens a cookie's path attribute to `/`.
    ///
    /// Student Records scopes its session cookie to the home page only, which
    /// would hide it from the grades page under path-respecting cookie
    /// handling. This jar attaches everything anyway, so the call records the
    /// widened path and exists to keep the workaround explicit. Returns false
    /// when the cookie is absent (a sign the login did not complete).
    pub fn force_root_path(&mut self, name: &str) -> bool {
        match self.cookies.get_mut(name) {
            Some(cookie) => {
                debug!(name, old_path = ?cookie.path, "widening cookie path to /");
                cookie.path = Some("/".to_string());
                true
            }
            None => {
                warn!(name, "cannot widen path of missing cookie");
                false
            }
        }
    }

    /// Builds the outgoing `Cookie` header from the jar.
    fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, cookie)| format!("{name}={}", cookie.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Reads the response, merging its `Set-Cookie` headers into the jar.
    async fn absorb(&mut self, response: reqwest::Response) -> Result<SessionResponse, SessionError> {
        let status = response.status();
        let headers = response.headers().clone();

        for raw in headers.get_all(SET_COOKIE) {
            let Ok(raw) = raw.to_str() else {
                warn!("ignoring undecodable Set-Cookie header");
                continue;
            };
            if let Some((name, cookie)) = parse_set_cookie(raw) {
                trace!(name, "stored cookie");
                self.cookies.insert(name, cookie);
            }
        }

        let body = response.text().await?;

        if status.is_redirection() {
            match headers.get(LOCATION).and_then(|h| h.to_str().ok()) {
                Some(location) => {
                    debug!(%status, location, "redirect response");
                    return Ok(SessionResponse::Redirect {
                        status,
                        location: location.to_string(),
                        body,
                        headers,
                    });
                }
                None => {
                    warn!(%status, "redirect status without a Location header");
                }
            }
        }

        Ok(SessionResponse::Page {
            status,
            body,
            headers,
        })
    }
}

/// Escapes a value for an `application/x-www-form-urlencoded` body.
///
/// [`SessionClient::post`] joins fields verbatim, so callers escape exactly
/// the values that need it (SAML payloads, passwords) and leave the rest
/// untouched, matching what the upstream endpoints were observed to accept.
pub fn form_escape(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Encodes a header value, rejecting strings reqwest cannot carry.
fn encode_header(value: &str) -> Result<HeaderValue, SessionError> {
    HeaderValue::from_str(value).map_err(|e| SessionError::BadHeader {
        message: format!("{value:?}: {e}"),
    })
}

/// Parses one `Set-Cookie` header into a name and stored cookie.
///
/// Last write wins at the jar level; attributes other than `Path` are
/// dropped because the jar does not do scope matching.
fn parse_set_cookie(raw: &str) -> Option<(String, StoredCookie)> {
    let mut parts = raw.split(';');
    let pair = parts.next()?.trim();
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut path = None;
    for attr in parts {
        if let Some((key, val)) = attr.trim().split_once('=') {
            if key.eq_ignore_ascii_case("path") {
                path = Some(val.trim().to_string());
            }
        }
    }

    Some((
        name.to_string(),
        StoredCookie {
            value: value.trim().to_string(),
            path,
        },
    ))
}
