//! Fetch interception: per-destination cache strategies with network
//! fallback and offline placeholders.
//!
//! | Destination       | Strategy                                                   |
//! |-------------------|------------------------------------------------------------|
//! | document          | app shell from cache, else network, else shell again       |
//! | style / script    | cache, else network (stored), else empty placeholder       |
//! | font              | cache, else network (stored), else error                   |
//! | image / other     | cache, else network (stored), else SVG placeholder (image) |

use std::sync::{Arc, Mutex};

use pwakit_net::{Destination, Fetcher, NetError, Request, Response};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::cache::{CacheEntry, CacheStore};
use crate::{ServiceWorkerError, ServiceWorkerEvent};

const FALLBACK_CSS: &str = "/* Fallback CSS */";
const FALLBACK_JS: &str = "// Fallback JS";
const OFFLINE_SVG: &str = concat!(
    r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200" viewBox="0 0 200 200">"##,
    r##"<rect width="200" height="200" fill="#f0f0f0"/>"##,
    r##"<text x="100" y="100" text-anchor="middle" fill="#999">Offline</text></svg>"##,
);

/// Result of intercepting a fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// Not handled; the host performs the request itself.
    Passthrough,
    /// Respond with this response.
    Respond(Response),
}

impl FetchOutcome {
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Passthrough => None,
            Self::Respond(response) => Some(response),
        }
    }
}

/// Offline placeholder for a destination, if it has one.
pub fn placeholder(request: &Request) -> Option<Response> {
    let url = request.url.clone();
    match request.destination {
        Destination::Style => Some(Response::synthetic(url, &mime::TEXT_CSS, FALLBACK_CSS)),
        Destination::Script => Some(Response::synthetic(
            url,
            &mime::APPLICATION_JAVASCRIPT,
            FALLBACK_JS,
        )),
        Destination::Image => Some(Response::synthetic(url, &mime::IMAGE_SVG, OFFLINE_SVG)),
        Destination::Document | Destination::Font | Destination::Other => None,
    }
}

// ==================== Background writes ====================

/// Detached cache writes.
///
/// Writes are spawned and never awaited by the request path. Failures are
/// logged and published as [`ServiceWorkerEvent::CacheWriteFailed`].
pub struct CacheWriter {
    store: Arc<dyn CacheStore>,
    events: mpsc::UnboundedSender<ServiceWorkerEvent>,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheWriter {
    pub fn new(
        store: Arc<dyn CacheStore>,
        events: mpsc::UnboundedSender<ServiceWorkerEvent>,
    ) -> Self {
        Self {
            store,
            events,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Spawn a write of `entry` into `cache`.
    pub fn spawn_put(&self, cache: &str, entry: CacheEntry) {
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let cache = cache.to_string();

        let handle = tokio::spawn(async move {
            let url = entry.url.clone();
            match store.put(&cache, entry).await {
                Ok(()) => trace!(cache = %cache, url = %url, "Cached response"),
                Err(e) => {
                    warn!(cache = %cache, url = %url, error = %e, "Background cache write failed");
                    let _ = events.send(ServiceWorkerEvent::CacheWriteFailed {
                        cache,
                        url,
                        error: e.to_string(),
                    });
                }
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Wait for every write spawned so far.
    pub async fn flush(&self) {
        let handles = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|p| p.into_inner()));
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background cache write task aborted");
            }
        }
    }
}

// ==================== Interceptor ====================

/// Applies the caching strategy for each intercepted request.
pub struct RequestInterceptor {
    cache_name: String,
    shell_key: String,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    writer: CacheWriter,
}

impl RequestInterceptor {
    pub fn new(
        cache_name: String,
        shell_key: String,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        events: mpsc::UnboundedSender<ServiceWorkerEvent>,
    ) -> Self {
        let writer = CacheWriter::new(Arc::clone(&store), events);
        Self {
            cache_name,
            shell_key,
            store,
            fetcher,
            writer,
        }
    }

    /// Handle one request.
    ///
    /// Non-GET requests are never looked up or stored.
    pub async fn handle(&self, request: &Request) -> Result<FetchOutcome, ServiceWorkerError> {
        if !request.is_get() {
            trace!(url = %request.url, method = %request.method, "Passing through non-GET request");
            return Ok(FetchOutcome::Passthrough);
        }

        trace!(
            request_id = request.id.raw(),
            url = %request.url,
            destination = %request.destination,
            "Intercepting request"
        );

        let response = match request.destination {
            Destination::Document => self.navigate(request).await?,
            Destination::Style | Destination::Script | Destination::Image => {
                match self.cache_first(request).await? {
                    Ok(response) => response,
                    Err(e) => self.offline_placeholder(request, e)?,
                }
            }
            Destination::Font | Destination::Other => self.cache_first(request).await??,
        };

        Ok(FetchOutcome::Respond(response))
    }

    /// Wait for background cache writes.
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    /// Navigations resolve to the app shell, whatever path was requested.
    async fn navigate(&self, request: &Request) -> Result<Response, ServiceWorkerError> {
        let first_try = match self.store.match_any(&self.shell_key).await {
            Ok(Some(shell)) => return shell.into_response(),
            Ok(None) => self.fetcher.fetch(request).await.map_err(ServiceWorkerError::from),
            Err(e) => Err(e),
        };

        match first_try {
            Ok(response) => Ok(response),
            Err(e) => {
                debug!(url = %request.url, error = %e, "Navigation failed, retrying app shell");
                match self.store.match_any(&self.shell_key).await? {
                    Some(shell) => shell.into_response(),
                    None => Err(e),
                }
            }
        }
    }

    /// Serve from cache, else fetch and store a copy in the background.
    ///
    /// The outer error is a cache failure; the inner one is the network's.
    async fn cache_first(
        &self,
        request: &Request,
    ) -> Result<Result<Response, NetError>, ServiceWorkerError> {
        if let Some(entry) = self.store.match_any(&request.cache_key()).await? {
            trace!(url = %request.url, "Cache hit");
            return entry.into_response().map(Ok);
        }

        let response = match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => return Ok(Err(e)),
        };

        if response.is_cacheable() {
            let entry = CacheEntry::from_response(request, response.duplicate());
            self.writer.spawn_put(&self.cache_name, entry);
        } else {
            trace!(url = %request.url, status = %response.status, "Not caching response");
        }

        Ok(Ok(response))
    }

    fn offline_placeholder(
        &self,
        request: &Request,
        error: NetError,
    ) -> Result<Response, ServiceWorkerError> {
        debug!(
            url = %request.url,
            destination = %request.destination,
            error = %error,
            "Network failed, serving offline placeholder"
        );
        placeholder(request).ok_or_else(|| ServiceWorkerError::from(error))
    }
}
