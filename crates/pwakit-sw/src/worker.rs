//! One deployed version of the offline layer.

use std::sync::Arc;

use pwakit_net::{Fetcher, Request};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use crate::cache::{get_key, CacheStore};
use crate::clients::Clients;
use crate::config::OfflineConfig;
use crate::intercept::{FetchOutcome, RequestInterceptor};
use crate::lifecycle::{ActivationReport, CacheLifecycle, InstallReport, LifecycleState};
use crate::push::Notification;
use crate::{ServiceWorkerError, ServiceWorkerEvent, ServiceWorkerId};

/// A service worker bound to one version's configuration.
pub struct ServiceWorker {
    id: ServiceWorkerId,
    config: OfflineConfig,
    lifecycle: CacheLifecycle,
    interceptor: RequestInterceptor,
    events: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorker {
    /// Build a worker for `config`. Fails if any configured URL is invalid.
    pub fn new(
        config: OfflineConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        events: mpsc::UnboundedSender<ServiceWorkerEvent>,
    ) -> Result<Self, ServiceWorkerError> {
        config.validate()?;
        let cache_name = config.cache_name();
        let manifest = config.manifest_urls()?;
        let shell_key = get_key(&config.shell()?);

        let lifecycle = CacheLifecycle::new(
            cache_name.clone(),
            manifest,
            Arc::clone(&store),
            Arc::clone(&fetcher),
        );
        let interceptor =
            RequestInterceptor::new(cache_name, shell_key, store, fetcher, events.clone());

        Ok(Self {
            id: ServiceWorkerId::new(),
            config,
            lifecycle,
            interceptor,
            events,
        })
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    /// Bucket name of this version.
    pub fn version(&self) -> &str {
        self.lifecycle.cache_name()
    }

    pub fn config(&self) -> &OfflineConfig {
        &self.config
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.state().await
    }

    pub fn skip_waiting(&self) {
        self.lifecycle.skip_waiting();
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.lifecycle.skip_waiting_requested()
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        // No receiver just means nobody is listening.
        let _ = self.events.send(event);
    }

    async fn emit_state(&self) {
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id: self.id,
            version: self.version().to_string(),
            new_state: self.state().await,
        });
    }

    /// Populate this version's bucket.
    pub async fn install(&self) -> Result<InstallReport, ServiceWorkerError> {
        let result = self.lifecycle.install().await;
        self.emit_state().await;

        match &result {
            Ok(report) => self.emit(ServiceWorkerEvent::Installed {
                version: self.version().to_string(),
                cached: report.cached.len(),
            }),
            Err(e) => self.emit(ServiceWorkerEvent::InstallFailed {
                version: self.version().to_string(),
                error: e.to_string(),
            }),
        }
        result
    }

    /// Purge stale buckets and claim every client.
    pub async fn activate(
        &self,
        clients: &RwLock<Clients>,
    ) -> Result<ActivationReport, ServiceWorkerError> {
        let report = self.lifecycle.activate(clients, self.id).await?;
        self.emit_state().await;

        for name in &report.deleted {
            self.emit(ServiceWorkerEvent::CacheDeleted { name: name.clone() });
        }
        for client_id in &report.claimed {
            self.emit(ServiceWorkerEvent::ControllerChange {
                client_id: client_id.clone(),
                worker_id: self.id,
            });
        }
        Ok(report)
    }

    /// Adopt an already-populated bucket without reinstalling.
    pub(crate) async fn restore(&self) {
        self.lifecycle.mark_restored().await;
        self.emit_state().await;
    }

    pub(crate) async fn retire(&self) {
        self.lifecycle.mark_redundant().await;
        self.emit_state().await;
    }

    /// Delete every bucket. Returns whether all deletions succeeded.
    pub async fn clear_caches(&self) -> Result<bool, ServiceWorkerError> {
        self.lifecycle.clear_all().await
    }

    /// Run one request through the interceptor.
    pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome, ServiceWorkerError> {
        self.interceptor.handle(request).await
    }

    /// Build the notification to show for a push.
    pub fn handle_push(&self, payload: Option<&[u8]>) -> Notification {
        info!(version = %self.version(), "Push received");
        Notification::from_push(payload, &self.config.notifications)
    }

    /// Run the background sync task for `tag`.
    ///
    /// Returns whether the tag was handled. The task has no queued work yet.
    pub async fn handle_sync(&self, tag: &str) -> Result<bool, ServiceWorkerError> {
        if tag != self.config.sync_tag {
            debug!(tag, "Ignoring unknown sync tag");
            return Ok(false);
        }

        info!(tag, "Background sync triggered");
        self.emit(ServiceWorkerEvent::SyncCompleted {
            tag: tag.to_string(),
        });
        Ok(true)
    }

    /// Wait for outstanding background cache writes.
    pub async fn flush(&self) {
        self.interceptor.flush().await;
    }
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("version", &self.version())
            .finish()
    }
}
