//! Cache lifecycle: populate a version's bucket at install, purge stale
//! buckets at activation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use pwakit_net::{Destination, Fetcher, Request, Response};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::cache::{CacheEntry, CacheStore};
use crate::clients::Clients;
use crate::{ServiceWorkerError, ServiceWorkerId};

/// Service worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Created, nothing fetched yet.
    #[default]
    Parsed,
    /// Populating the bucket. A failed install stays here.
    Installing,
    /// Bucket populated, waiting to activate.
    Installed,
    /// Purging stale buckets.
    Activating,
    /// Serving fetches.
    Activated,
    /// Replaced by a newer version.
    Redundant,
}

/// Outcome of a successful install.
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub cache_name: String,
    /// Keys written, in manifest order.
    pub cached: Vec<String>,
}

/// Outcome of an activation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivationReport {
    pub cache_name: String,
    /// Stale buckets removed.
    pub deleted: Vec<String>,
    /// Stale buckets whose deletion failed.
    pub failed: Vec<String>,
    /// Clients whose controller changed.
    pub claimed: Vec<String>,
}

/// Install/activate state machine for one version's bucket.
pub struct CacheLifecycle {
    cache_name: String,
    manifest: Vec<Url>,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    state: RwLock<LifecycleState>,
    skip_waiting: AtomicBool,
}

impl CacheLifecycle {
    pub fn new(
        cache_name: String,
        manifest: Vec<Url>,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            cache_name,
            manifest,
            store,
            fetcher,
            state: RwLock::new(LifecycleState::Parsed),
            skip_waiting: AtomicBool::new(false),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Ask to be activated without waiting for existing clients to close.
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::Release);
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::Acquire)
    }

    async fn transition(
        &self,
        allowed: &[LifecycleState],
        to: LifecycleState,
    ) -> Result<(), ServiceWorkerError> {
        let mut state = self.state.write().await;
        if !allowed.contains(&*state) {
            return Err(ServiceWorkerError::StateError(format!(
                "{}: cannot move from {:?} to {:?}",
                self.cache_name, *state, to
            )));
        }
        debug!(cache = %self.cache_name, from = ?*state, to = ?to, "Lifecycle transition");
        *state = to;
        Ok(())
    }

    /// Fetch the whole manifest and store it in this version's bucket.
    ///
    /// All-or-nothing: any failed fetch fails the install and leaves the
    /// state at `Installing`. Re-running an install overwrites every entry.
    pub async fn install(&self) -> Result<InstallReport, ServiceWorkerError> {
        use LifecycleState::*;
        self.transition(&[Parsed, Installing, Installed], Installing)
            .await?;

        info!(cache = %self.cache_name, entries = self.manifest.len(), "Installing");

        match self.populate().await {
            Ok(report) => {
                *self.state.write().await = Installed;
                self.skip_waiting();
                info!(cache = %self.cache_name, cached = report.cached.len(), "Installed");
                Ok(report)
            }
            Err(e) => {
                error!(cache = %self.cache_name, error = %e, "Install failed");
                Err(e)
            }
        }
    }

    async fn fetch_entry(&self, url: &Url) -> Result<(Request, Response), ServiceWorkerError> {
        let request = Request::get(url.clone()).with_destination(Destination::guess_from_url(url));
        let response = self
            .fetcher
            .fetch(&request)
            .await
            .map_err(|e| ServiceWorkerError::InstallFailed(format!("{}: {}", url, e)))?;

        if !response.ok() {
            return Err(ServiceWorkerError::InstallFailed(format!(
                "{}: status {}",
                url, response.status
            )));
        }
        Ok((request, response))
    }

    async fn populate(&self) -> Result<InstallReport, ServiceWorkerError> {
        let fetched = try_join_all(self.manifest.iter().map(|url| self.fetch_entry(url))).await?;

        let existed = self.store.has(&self.cache_name).await?;
        self.store.open(&self.cache_name).await?;

        let mut cached = Vec::with_capacity(fetched.len());
        for (request, response) in fetched {
            let entry = CacheEntry::from_response(&request, response);
            let key = entry.key();
            if let Err(e) = self.store.put(&self.cache_name, entry).await {
                if !existed {
                    if let Err(cleanup) = self.store.delete(&self.cache_name).await {
                        warn!(cache = %self.cache_name, error = %cleanup, "Could not remove partial bucket");
                    }
                }
                return Err(ServiceWorkerError::InstallFailed(format!("{}: {}", key, e)));
            }
            cached.push(key);
        }

        Ok(InstallReport {
            cache_name: self.cache_name.clone(),
            cached,
        })
    }

    /// Delete every other bucket, then take control of all clients.
    pub async fn activate(
        &self,
        clients: &RwLock<Clients>,
        worker: ServiceWorkerId,
    ) -> Result<ActivationReport, ServiceWorkerError> {
        use LifecycleState::*;
        self.transition(&[Installed], Activating).await?;
        info!(cache = %self.cache_name, "Activating");

        let names = match self.store.keys().await {
            Ok(names) => names,
            Err(e) => {
                *self.state.write().await = Installed;
                return Err(e);
            }
        };
        let stale: Vec<String> = names
            .into_iter()
            .filter(|name| name != &self.cache_name)
            .collect();

        let (deleted, failed) = self.delete_buckets(&stale).await;
        let claimed = clients.write().await.claim(worker);

        *self.state.write().await = Activated;
        info!(
            cache = %self.cache_name,
            deleted = deleted.len(),
            failed = failed.len(),
            claimed = claimed.len(),
            "Activated"
        );

        Ok(ActivationReport {
            cache_name: self.cache_name.clone(),
            deleted,
            failed,
            claimed,
        })
    }

    /// Delete every bucket, this version's included.
    ///
    /// Returns whether every deletion succeeded.
    pub async fn clear_all(&self) -> Result<bool, ServiceWorkerError> {
        let names = self.store.keys().await?;
        let (deleted, failed) = self.delete_buckets(&names).await;
        info!(deleted = deleted.len(), failed = failed.len(), "Cleared all caches");
        Ok(failed.is_empty())
    }

    /// Delete buckets independently; one failure never stops the others.
    async fn delete_buckets(&self, names: &[String]) -> (Vec<String>, Vec<String>) {
        let results = join_all(names.iter().map(|name| async move {
            (name.clone(), self.store.delete(name).await)
        }))
        .await;

        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        for (name, result) in results {
            match result {
                Ok(_) => {
                    info!(cache = %name, "Deleted old cache");
                    deleted.push(name);
                }
                Err(e) => {
                    warn!(cache = %name, error = %e, "Failed to delete cache");
                    failed.push(name);
                }
            }
        }
        (deleted, failed)
    }

    /// Mark this version as superseded.
    pub async fn mark_redundant(&self) {
        *self.state.write().await = LifecycleState::Redundant;
    }

    /// Treat an already-populated bucket as active (used when restoring a
    /// persisted registration).
    pub async fn mark_restored(&self) {
        *self.state.write().await = LifecycleState::Activated;
    }
}
