//! Cache buckets and the storage seam shared by the lifecycle manager and
//! the request interceptor.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::BoxFuture;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use pwakit_net::{Request, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;

use crate::ServiceWorkerError;

// ==================== Cache Entry ====================

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Capture `response` under the identity of `request`.
    ///
    /// Takes the response by value: callers that still need to return it
    /// pass a [`Response::duplicate`].
    pub fn from_response(request: &Request, response: Response) -> Self {
        let mut headers = HashMap::new();
        for name in response.headers.keys() {
            let joined = response
                .headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(", ");
            headers.insert(name.as_str().to_string(), joined);
        }

        Self {
            url: request.url.to_string(),
            method: request.method.to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.bytes().to_vec(),
            cached_at: pwakit_common::now_millis(),
        }
    }

    /// Cache identity, `"{METHOD} {URL}"`.
    pub fn key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    /// Rebuild a response flagged as served from cache.
    pub fn into_response(self) -> Result<Response, ServiceWorkerError> {
        let url = Url::parse(&self.url)
            .map_err(|e| ServiceWorkerError::CacheError(format!("{}: {}", self.url, e)))?;
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| ServiceWorkerError::CacheError(format!("{}: {}", self.url, e)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(n, v);
            }
        }

        let mut response = Response::new(url, status, headers, Bytes::from(self.body));
        response.from_cache = true;
        Ok(response)
    }
}

/// Cache key for a GET of `url`.
pub fn get_key(url: &Url) -> String {
    pwakit_net::cache_key(&Method::GET, url)
}

mod body_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// ==================== Cache ====================

/// A cache bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries by key.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request key.
    pub fn match_key(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Add entry, replacing any previous entry for the same key.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.key(), entry);
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Store ====================

/// Named bucket storage (the `caches` global).
///
/// Every mutation is idempotent by key; concurrent writers to one key end
/// with whichever write lands last.
pub trait CacheStore: Send + Sync {
    /// Open a bucket, creating it if absent.
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), ServiceWorkerError>>;

    /// Check if a bucket exists.
    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, ServiceWorkerError>>;

    /// Bucket names in creation order.
    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, ServiceWorkerError>>;

    /// Delete a bucket. Returns whether it existed.
    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, ServiceWorkerError>>;

    /// Store an entry in a bucket, creating the bucket if absent.
    fn put<'a>(
        &'a self,
        name: &'a str,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<(), ServiceWorkerError>>;

    /// Look a key up in one bucket.
    fn match_in<'a>(
        &'a self,
        name: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CacheEntry>, ServiceWorkerError>>;

    /// Look a key up across every bucket, oldest bucket first.
    fn match_any<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CacheEntry>, ServiceWorkerError>>;

    /// Keys stored in one bucket.
    fn entry_keys<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ServiceWorkerError>>;
}

/// Buckets plus their creation order.
#[derive(Debug, Default)]
struct CacheStorage {
    caches: HashMap<String, Cache>,
    order: Vec<String>,
}

impl CacheStorage {
    fn open(&mut self, name: &str) -> &mut Cache {
        if !self.caches.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    fn delete(&mut self, name: &str) -> bool {
        self.order.retain(|n| n != name);
        self.caches.remove(name).is_some()
    }
}

/// In-process [`CacheStore`]. Clones share the same buckets.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    inner: Arc<RwLock<CacheStorage>>,
}

impl MemoryCacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot a bucket.
    pub async fn snapshot(&self, name: &str) -> Option<Cache> {
        self.inner.read().await.caches.get(name).cloned()
    }
}

impl CacheStore for MemoryCacheStore {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), ServiceWorkerError>> {
        Box::pin(async move {
            self.inner.write().await.open(name);
            Ok(())
        })
    }

    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, ServiceWorkerError>> {
        Box::pin(async move { Ok(self.inner.read().await.caches.contains_key(name)) })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, ServiceWorkerError>> {
        Box::pin(async move { Ok(self.inner.read().await.order.clone()) })
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, ServiceWorkerError>> {
        Box::pin(async move { Ok(self.inner.write().await.delete(name)) })
    }

    fn put<'a>(
        &'a self,
        name: &'a str,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<(), ServiceWorkerError>> {
        Box::pin(async move {
            self.inner.write().await.open(name).put(entry);
            Ok(())
        })
    }

    fn match_in<'a>(
        &'a self,
        name: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CacheEntry>, ServiceWorkerError>> {
        Box::pin(async move {
            let storage = self.inner.read().await;
            Ok(storage
                .caches
                .get(name)
                .and_then(|cache| cache.match_key(key))
                .cloned())
        })
    }

    fn match_any<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CacheEntry>, ServiceWorkerError>> {
        Box::pin(async move {
            let storage = self.inner.read().await;
            Ok(storage
                .order
                .iter()
                .filter_map(|name| storage.caches.get(name))
                .find_map(|cache| cache.match_key(key))
                .cloned())
        })
    }

    fn entry_keys<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ServiceWorkerError>> {
        Box::pin(async move {
            let storage = self.inner.read().await;
            Ok(storage
                .caches
                .get(name)
                .map(Cache::keys)
                .unwrap_or_default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwakit_net::Destination;

    fn entry(url: &str, body: &str) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            method: "GET".to_string(),
            status: 200,
            headers: HashMap::new(),
            body: body.as_bytes().to_vec(),
            cached_at: 0,
        }
    }

    #[test]
    fn test_cache_put_replaces() {
        let mut cache = Cache::new("v1");
        cache.put(entry("https://example.com/style.css", "a"));
        cache.put(entry("https://example.com/style.css", "b"));

        assert_eq!(cache.len(), 1);
        let hit = cache.match_key("GET https://example.com/style.css").unwrap();
        assert_eq!(hit.body, b"b");
    }

    #[test]
    fn test_entry_round_trip_through_response() {
        let url = Url::parse("https://example.com/app.js").unwrap();
        let request = Request::get(url.clone()).with_destination(Destination::Script);
        let response = Response::synthetic(url, &mime::APPLICATION_JAVASCRIPT, "let a = 1;");

        let entry = CacheEntry::from_response(&request, response);
        assert_eq!(entry.key(), "GET https://example.com/app.js");
        assert_eq!(
            entry.headers.get("content-type").map(String::as_str),
            Some("application/javascript")
        );

        let restored = entry.into_response().unwrap();
        assert!(restored.from_cache);
        assert_eq!(restored.status, StatusCode::OK);
        assert_eq!(restored.content_type(), Some(mime::APPLICATION_JAVASCRIPT));
        assert_eq!(restored.text().unwrap(), "let a = 1;");
    }

    #[test]
    fn test_entry_serializes_body_as_base64() {
        let json = serde_json::to_string(&entry("https://example.com/a", "hi")).unwrap();
        assert!(json.contains("\"body\":\"aGk=\""));

        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.body, b"hi");
    }

    #[tokio::test]
    async fn test_memory_store_buckets() {
        let store = MemoryCacheStore::new();
        assert!(!store.has("v1").await.unwrap());

        store.open("v1").await.unwrap();
        store.open("v2").await.unwrap();
        store.open("v1").await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["v1", "v2"]);

        assert!(store.delete("v1").await.unwrap());
        assert!(!store.delete("v1").await.unwrap());
        assert_eq!(store.keys().await.unwrap(), vec!["v2"]);
    }

    #[tokio::test]
    async fn test_memory_store_match_any_prefers_oldest_bucket() {
        let store = MemoryCacheStore::new();
        store.put("old", entry("https://example.com/a", "old")).await.unwrap();
        store.put("new", entry("https://example.com/a", "new")).await.unwrap();

        let hit = store.match_any("GET https://example.com/a").await.unwrap().unwrap();
        assert_eq!(hit.body, b"old");

        let hit = store
            .match_in("new", "GET https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.body, b"new");

        assert!(store.match_any("GET https://example.com/b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_clones_share_state() {
        let store = MemoryCacheStore::new();
        let other = store.clone();
        store.put("v1", entry("https://example.com/a", "a")).await.unwrap();

        assert_eq!(
            other.entry_keys("v1").await.unwrap(),
            vec!["GET https://example.com/a"]
        );
        assert_eq!(other.snapshot("v1").await.unwrap().len(), 1);
    }
}
