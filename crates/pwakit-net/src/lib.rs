//! # PwaKit Net
//!
//! Request/response model and network access for the PwaKit offline layer.
//!
//! ## Design Goals
//!
//! 1. **Typed requests**: method, URL and destination kind travel together
//! 2. **Explicit body duplication**: a response is split with [`Response::duplicate`]
//!    before it is both returned and stored
//! 3. **Injectable network**: everything that reaches the network goes through
//!    the [`Fetcher`] trait, so hosts and tests can swap the transport

use std::convert::Infallible;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use mime::Mime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub mod loader;

pub use loader::{LoaderConfig, ResourceLoader};

/// Errors that can occur in networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network unreachable: {0}")]
    Offline(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Unique identifier for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Destination ====================

/// What the fetched resource will be used for.
///
/// Browsers assign this to every fetch; the offline layer picks its caching
/// strategy from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// A navigation.
    Document,
    /// A stylesheet.
    Style,
    /// A script.
    Script,
    /// A web font.
    Font,
    /// An image.
    Image,
    /// Anything else (XHR, manifests, media, empty destination).
    #[default]
    Other,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Style => "style",
            Self::Script => "script",
            Self::Font => "font",
            Self::Image => "image",
            Self::Other => "other",
        }
    }

    /// Guess the destination from the URL path when the host has none.
    pub fn guess_from_url(url: &Url) -> Self {
        let path = url.path();
        if path.is_empty() || path.ends_with('/') {
            return Self::Document;
        }

        let extension = path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if matches!(extension.as_str(), "woff" | "woff2" | "ttf" | "otf" | "eot") {
            return Self::Font;
        }

        match mime_guess::from_path(path).first() {
            Some(guess) => match (guess.type_().as_str(), guess.subtype().as_str()) {
                ("text", "html") => Self::Document,
                ("text", "css") => Self::Style,
                ("text" | "application", "javascript") => Self::Script,
                ("image", _) => Self::Image,
                ("font", _) => Self::Font,
                _ => Self::Other,
            },
            None => Self::Other,
        }
    }
}

impl FromStr for Destination {
    type Err = Infallible;

    /// Parse a browser destination string; unknown values become `Other`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "document" => Self::Document,
            "style" => Self::Style,
            "script" => Self::Script,
            "font" => Self::Font,
            "image" => Self::Image,
            _ => Self::Other,
        })
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==================== Request ====================

/// Identity under which a response is cached: method plus absolute URL.
pub fn cache_key(method: &Method, url: &Url) -> String {
    format!("{} {}", method, url)
}

/// HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub destination: Destination,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            id: RequestId::new(),
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            destination: Destination::Other,
            body: None,
            timeout: None,
        }
    }

    /// Create a navigation (document) request.
    pub fn navigate(url: Url) -> Self {
        Self::get(url).with_destination(Destination::Document)
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(url)
        }
    }

    /// Set the destination.
    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set timeout.
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == Method::GET
    }

    /// Cache identity of this request.
    pub fn cache_key(&self) -> String {
        cache_key(&self.method, &self.url)
    }
}

// ==================== Response ====================

/// HTTP response with a fully buffered body.
///
/// Deliberately not `Clone`: a response is consumed once, and storing it
/// alongside returning it goes through [`Response::duplicate`].
#[derive(Debug)]
pub struct Response {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// The final URL differs from the requested one.
    pub redirected: bool,
    /// Served from a cache bucket rather than the network.
    pub from_cache: bool,
    body: Bytes,
}

impl Response {
    /// Create a network response.
    pub fn new(url: Url, status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            url,
            status,
            headers,
            redirected: false,
            from_cache: false,
            body: body.into(),
        }
    }

    /// Create a locally generated `200 OK` response.
    pub fn synthetic(url: Url, content_type: &Mime, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(content_type.as_ref()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        Self::new(url, StatusCode::OK, headers, body)
    }

    /// Check if request was successful (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Only a plain `200 OK` that was not redirected may be stored.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::OK && !self.redirected
    }

    /// Parsed `Content-Type`, if present and valid.
    pub fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<Mime>().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Split off an independent copy of this response.
    pub fn duplicate(&self) -> Self {
        Self {
            url: self.url.clone(),
            status: self.status,
            headers: self.headers.clone(),
            redirected: self.redirected,
            from_cache: self.from_cache,
            body: self.body.clone(),
        }
    }

    /// Get the body as bytes.
    pub fn bytes(self) -> Bytes {
        self.body
    }

    /// Get the body as text.
    pub fn text(self) -> Result<String, NetError> {
        String::from_utf8(self.body.to_vec()).map_err(|e| NetError::RequestFailed(e.to_string()))
    }

    /// Get the body as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        serde_json::from_slice(&self.body).map_err(|e| NetError::RequestFailed(e.to_string()))
    }
}

// ==================== Fetcher ====================

/// Network seam used by the offline layer.
pub trait Fetcher: Send + Sync {
    /// Perform `request` against the network.
    fn fetch<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, NetError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_request_builder() {
        let request = Request::get(url("https://example.com/app.js"))
            .with_destination(Destination::Script)
            .header(
                HeaderName::from_static("accept"),
                HeaderValue::from_static("*/*"),
            )
            .timeout(Duration::from_secs(10));

        assert!(request.is_get());
        assert_eq!(request.destination, Destination::Script);
        assert!(request.headers.contains_key("accept"));
        assert_eq!(request.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_cache_key_includes_method() {
        let get = Request::get(url("https://example.com/form"));
        let post = Request::post(url("https://example.com/form"), Bytes::from_static(b"x"));
        assert_eq!(get.cache_key(), "GET https://example.com/form");
        assert_ne!(get.cache_key(), post.cache_key());
    }

    #[test]
    fn test_request_id_uniqueness() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_destination_from_str() {
        assert_eq!("document".parse::<Destination>().unwrap(), Destination::Document);
        assert_eq!("Style".parse::<Destination>().unwrap(), Destination::Style);
        assert_eq!("".parse::<Destination>().unwrap(), Destination::Other);
        assert_eq!("audio".parse::<Destination>().unwrap(), Destination::Other);
    }

    #[test]
    fn test_destination_guess() {
        let guess = |s: &str| Destination::guess_from_url(&url(s));
        assert_eq!(guess("https://example.com/"), Destination::Document);
        assert_eq!(guess("https://example.com/index.html"), Destination::Document);
        assert_eq!(guess("https://example.com/style.css"), Destination::Style);
        assert_eq!(guess("https://example.com/script.js"), Destination::Script);
        assert_eq!(guess("https://example.com/logo.png"), Destination::Image);
        assert_eq!(guess("https://cdn.example.com/fa-solid-900.woff2"), Destination::Font);
        assert_eq!(guess("https://example.com/manifest.json"), Destination::Other);
    }

    #[test]
    fn test_response_cacheable_only_for_plain_200() {
        let ok = Response::new(url("https://example.com/a"), StatusCode::OK, HeaderMap::new(), "a");
        assert!(ok.is_cacheable());

        let missing = Response::new(
            url("https://example.com/a"),
            StatusCode::NOT_FOUND,
            HeaderMap::new(),
            "",
        );
        assert!(!missing.is_cacheable());

        let created = Response::new(
            url("https://example.com/a"),
            StatusCode::CREATED,
            HeaderMap::new(),
            "",
        );
        assert!(created.ok());
        assert!(!created.is_cacheable());

        let mut redirected = ok.duplicate();
        redirected.redirected = true;
        assert!(!redirected.is_cacheable());
    }

    #[test]
    fn test_duplicate_is_independent() {
        let original = Response::synthetic(
            url("https://example.com/app.css"),
            &mime::TEXT_CSS,
            "body {}",
        );
        let copy = original.duplicate();

        assert_eq!(original.text().unwrap(), "body {}");
        assert_eq!(copy.content_type(), Some(mime::TEXT_CSS));
        assert_eq!(copy.bytes(), Bytes::from_static(b"body {}"));
    }
}
