//! On-disk [`CacheStore`]: one JSON file per bucket plus an index that keeps
//! bucket creation order.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::cache::{Cache, CacheEntry, CacheStore};
use crate::ServiceWorkerError;

/// Bucket files always end in `.json`, so this name cannot collide with one.
const INDEX_FILE: &str = "buckets.idx";

fn io_error(path: &Path, err: std::io::Error) -> ServiceWorkerError {
    ServiceWorkerError::CacheError(format!("{}: {}", path.display(), err))
}

/// Bucket store persisted under a directory.
///
/// All operations are serialized through one lock so read-modify-write of a
/// bucket file never interleaves.
#[derive(Debug)]
pub struct FileCacheStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileCacheStore {
    /// Use `root` as the store directory, creating it if needed.
    pub async fn open_dir(root: impl Into<PathBuf>) -> Result<Self, ServiceWorkerError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| io_error(&root, e))?;
        debug!(root = %root.display(), "Opened file cache store");
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{}.json", urlencoding::encode(name)))
    }

    async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ServiceWorkerError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                ServiceWorkerError::CacheError(format!("{}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(path, e)),
        }
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ServiceWorkerError> {
        let json = serde_json::to_vec(value)
            .map_err(|e| ServiceWorkerError::CacheError(format!("{}: {}", path.display(), e)))?;
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = path.with_file_name(tmp_name);
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| io_error(path, e))
    }

    async fn read_index(&self) -> Result<Vec<String>, ServiceWorkerError> {
        Ok(Self::read_json(&self.root.join(INDEX_FILE))
            .await?
            .unwrap_or_default())
    }

    async fn write_index(&self, names: &[String]) -> Result<(), ServiceWorkerError> {
        Self::write_json(&self.root.join(INDEX_FILE), &names).await
    }

    async fn read_bucket(&self, name: &str) -> Result<Option<Cache>, ServiceWorkerError> {
        Self::read_json(&self.bucket_path(name)).await
    }

    /// Load a bucket, creating it (file and index entry) if absent.
    async fn load_or_create(&self, name: &str) -> Result<Cache, ServiceWorkerError> {
        let mut index = self.read_index().await?;
        if !index.iter().any(|n| n == name) {
            index.push(name.to_string());
            self.write_index(&index).await?;
        }

        match self.read_bucket(name).await? {
            Some(cache) => Ok(cache),
            None => {
                let cache = Cache::new(name);
                Self::write_json(&self.bucket_path(name), &cache).await?;
                trace!(name, "Created bucket file");
                Ok(cache)
            }
        }
    }
}

impl CacheStore for FileCacheStore {
    fn open<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<(), ServiceWorkerError>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            self.load_or_create(name).await.map(|_| ())
        })
    }

    fn has<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, ServiceWorkerError>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            Ok(self.read_index().await?.iter().any(|n| n == name))
        })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>, ServiceWorkerError>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            self.read_index().await
        })
    }

    fn delete<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<bool, ServiceWorkerError>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut index = self.read_index().await?;
            let existed = index.iter().any(|n| n == name);
            if existed {
                index.retain(|n| n != name);
                self.write_index(&index).await?;
            }

            let path = self.bucket_path(name);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path, e)),
            }
            Ok(existed)
        })
    }

    fn put<'a>(
        &'a self,
        name: &'a str,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<(), ServiceWorkerError>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut cache = self.load_or_create(name).await?;
            cache.put(entry);
            Self::write_json(&self.bucket_path(name), &cache).await
        })
    }

    fn match_in<'a>(
        &'a self,
        name: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CacheEntry>, ServiceWorkerError>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            Ok(self
                .read_bucket(name)
                .await?
                .and_then(|cache| cache.match_key(key).cloned()))
        })
    }

    fn match_any<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<CacheEntry>, ServiceWorkerError>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            for name in self.read_index().await? {
                if let Some(hit) = self
                    .read_bucket(&name)
                    .await?
                    .and_then(|cache| cache.match_key(key).cloned())
                {
                    return Ok(Some(hit));
                }
            }
            Ok(None)
        })
    }

    fn entry_keys<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ServiceWorkerError>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            Ok(self
                .read_bucket(name)
                .await?
                .map(|cache| cache.keys())
                .unwrap_or_default())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hashbrown::HashMap;

    fn entry(url: &str, body: &[u8]) -> CacheEntry {
        CacheEntry {
            url: url.to_string(),
            method: "GET".to_string(),
            status: 200,
            headers: HashMap::new(),
            body: body.to_vec(),
            cached_at: 1,
        }
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = FileCacheStore::open_dir(dir.path()).await.unwrap();
            store.put("pwakit-v1", entry("https://example.com/", b"<html>")).await.unwrap();
            store.open("pwakit-v2").await.unwrap();
        }

        let store = FileCacheStore::open_dir(dir.path()).await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["pwakit-v1", "pwakit-v2"]);

        let hit = store
            .match_any("GET https://example.com/")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.body, b"<html>");
    }

    #[tokio::test]
    async fn test_file_store_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::open_dir(dir.path()).await.unwrap();

        store.put("old", entry("https://example.com/a", &[0, 159, 255])).await.unwrap();
        assert!(store.has("old").await.unwrap());
        assert!(store.delete("old").await.unwrap());
        assert!(!store.has("old").await.unwrap());
        assert!(!store.delete("old").await.unwrap());
        assert!(!dir.path().join("old.json").exists());
    }

    #[tokio::test]
    async fn test_file_store_binary_body_and_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCacheStore::open_dir(dir.path()).await.unwrap();

        store
            .put("site/v1", entry("https://example.com/font.woff2", &[0, 1, 2, 255]))
            .await
            .unwrap();

        assert!(dir.path().join("site%2Fv1.json").exists());
        let hit = store
            .match_in("site/v1", "GET https://example.com/font.woff2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.body, vec![0, 1, 2, 255]);
        assert_eq!(
            store.entry_keys("site/v1").await.unwrap(),
            vec!["GET https://example.com/font.woff2"]
        );
    }
}
