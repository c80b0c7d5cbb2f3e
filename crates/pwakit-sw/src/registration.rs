//! Registration and the container that dispatches lifecycle, fetch,
//! message, push and sync events to the right worker.

use std::sync::Arc;

use pwakit_net::{Fetcher, Request};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::CacheStore;
use crate::clients::{Client, Clients};
use crate::config::OfflineConfig;
use crate::intercept::FetchOutcome;
use crate::lifecycle::{ActivationReport, InstallReport};
use crate::messages::{ControlMessage, ControlReply, MessageEvent};
use crate::push::{ClickOutcome, Notification};
use crate::worker::ServiceWorker;
use crate::{ServiceWorkerError, ServiceWorkerEvent};

/// Worker slots of a registration.
#[derive(Debug, Clone)]
pub struct ServiceWorkerRegistration {
    scope: Url,
    installing: Option<Arc<ServiceWorker>>,
    waiting: Option<Arc<ServiceWorker>>,
    active: Option<Arc<ServiceWorker>>,
}

impl ServiceWorkerRegistration {
    fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub fn installing(&self) -> Option<&Arc<ServiceWorker>> {
        self.installing.as_ref()
    }

    pub fn waiting(&self) -> Option<&Arc<ServiceWorker>> {
        self.waiting.as_ref()
    }

    pub fn active(&self) -> Option<&Arc<ServiceWorker>> {
        self.active.as_ref()
    }

    /// The worker that answers messages: active, else waiting, else installing.
    fn current(&self) -> Option<Arc<ServiceWorker>> {
        self.active
            .as_ref()
            .or(self.waiting.as_ref())
            .or(self.installing.as_ref())
            .cloned()
    }
}

/// Outcome of [`ServiceWorkerContainer::register`].
#[derive(Debug, Clone, Serialize)]
pub struct RegisterReport {
    pub install: InstallReport,
    /// Present when the new version was activated right away.
    pub activation: Option<ActivationReport>,
}

/// Service worker container.
pub struct ServiceWorkerContainer {
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    registration: RwLock<Option<ServiceWorkerRegistration>>,
    clients: RwLock<Clients>,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a container and the receiving end of its event channel.
    pub fn new(
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                store,
                fetcher,
                registration: RwLock::new(None),
                clients: RwLock::new(Clients::new()),
                event_tx,
            },
            event_rx,
        )
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        let _ = self.event_tx.send(event);
    }

    fn build_worker(&self, config: OfflineConfig) -> Result<Arc<ServiceWorker>, ServiceWorkerError> {
        Ok(Arc::new(ServiceWorker::new(
            config,
            Arc::clone(&self.store),
            Arc::clone(&self.fetcher),
            self.event_tx.clone(),
        )?))
    }

    /// Snapshot of the registration, if any.
    pub async fn registration(&self) -> Option<ServiceWorkerRegistration> {
        self.registration.read().await.clone()
    }

    pub fn clients(&self) -> &RwLock<Clients> {
        &self.clients
    }

    /// Worker currently serving fetches.
    pub async fn controller(&self) -> Option<Arc<ServiceWorker>> {
        self.registration
            .read()
            .await
            .as_ref()
            .and_then(|r| r.active.clone())
    }

    async fn current(&self) -> Option<Arc<ServiceWorker>> {
        self.registration
            .read()
            .await
            .as_ref()
            .and_then(|r| r.current())
    }

    /// Install the version described by `config`.
    ///
    /// A successful install asks to skip waiting, so the new version is
    /// activated before this returns. A failed install leaves the worker in
    /// the installing slot and the previous active version untouched.
    pub async fn register(
        &self,
        config: OfflineConfig,
    ) -> Result<RegisterReport, ServiceWorkerError> {
        let scope = config.scope_url()?;
        let worker = self.build_worker(config)?;

        info!(version = %worker.version(), scope = %scope, "Update found");
        self.emit(ServiceWorkerEvent::UpdateFound {
            version: worker.version().to_string(),
        });

        {
            let mut registration = self.registration.write().await;
            let registration =
                registration.get_or_insert_with(|| ServiceWorkerRegistration::new(scope.clone()));
            registration.scope = scope;
            registration.installing = Some(Arc::clone(&worker));
        }

        let install = worker.install().await?;

        {
            let mut registration = self.registration.write().await;
            if let Some(registration) = registration.as_mut() {
                if registration
                    .installing
                    .as_ref()
                    .is_some_and(|w| Arc::ptr_eq(w, &worker))
                {
                    registration.installing = None;
                }
                registration.waiting = Some(Arc::clone(&worker));
            }
        }

        let activation = if worker.skip_waiting_requested() {
            self.activate_waiting().await?
        } else {
            None
        };

        Ok(RegisterReport {
            install,
            activation,
        })
    }

    /// Adopt the bucket of `config` as active if it is already populated.
    ///
    /// Returns `None` when the version was never installed into the store.
    pub async fn restore(
        &self,
        config: OfflineConfig,
    ) -> Result<Option<Arc<ServiceWorker>>, ServiceWorkerError> {
        let scope = config.scope_url()?;
        if !self.store.has(&config.cache_name()).await? {
            debug!(cache = %config.cache_name(), "Nothing to restore");
            return Ok(None);
        }

        let worker = self.build_worker(config)?;
        worker.restore().await;
        self.clients.write().await.claim(worker.id());

        let previous = {
            let mut registration = self.registration.write().await;
            let registration =
                registration.get_or_insert_with(|| ServiceWorkerRegistration::new(scope.clone()));
            registration.scope = scope;
            registration.active.replace(Arc::clone(&worker))
        };
        if let Some(previous) = previous {
            previous.retire().await;
        }

        info!(version = %worker.version(), "Restored registration");
        Ok(Some(worker))
    }

    /// Activate the waiting worker, if there is one.
    ///
    /// The previously active worker becomes redundant. If activation fails
    /// the worker goes back to waiting.
    pub async fn activate_waiting(&self) -> Result<Option<ActivationReport>, ServiceWorkerError> {
        let worker = match self
            .registration
            .write()
            .await
            .as_mut()
            .and_then(|r| r.waiting.take())
        {
            Some(worker) => worker,
            None => {
                debug!("No waiting worker to activate");
                return Ok(None);
            }
        };

        let report = match worker.activate(&self.clients).await {
            Ok(report) => report,
            Err(e) => {
                warn!(version = %worker.version(), error = %e, "Activation failed");
                if let Some(registration) = self.registration.write().await.as_mut() {
                    registration.waiting.get_or_insert(worker);
                }
                return Err(e);
            }
        };

        let previous = self
            .registration
            .write()
            .await
            .as_mut()
            .and_then(|r| r.active.replace(Arc::clone(&worker)));
        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &worker) {
                previous.retire().await;
            }
        }

        Ok(Some(report))
    }

    /// Route a fetch to the active worker. Without one the host handles it.
    pub async fn handle_fetch(&self, request: &Request) -> Result<FetchOutcome, ServiceWorkerError> {
        match self.controller().await {
            Some(worker) => worker.handle_fetch(request).await,
            None => Ok(FetchOutcome::Passthrough),
        }
    }

    /// Post a message and wait for its reply, if it gets one.
    pub async fn post_message(&self, data: serde_json::Value) -> Option<ControlReply> {
        let (event, reply) = MessageEvent::with_reply(data);
        self.handle_message(event).await;
        reply.await.ok()
    }

    /// Handle one control message. Unknown messages are ignored.
    pub async fn handle_message(&self, mut event: MessageEvent) {
        info!(data = %event.data, "Message received");
        let Some(message) = ControlMessage::parse(&event.data) else {
            return;
        };

        match message {
            ControlMessage::SkipWaiting => {
                let waiting = self
                    .registration
                    .read()
                    .await
                    .as_ref()
                    .and_then(|r| r.waiting.clone());
                match waiting {
                    Some(worker) => {
                        worker.skip_waiting();
                        if let Err(e) = self.activate_waiting().await {
                            warn!(error = %e, "Skip waiting failed");
                        }
                    }
                    None => debug!("Skip waiting with no waiting worker"),
                }
            }
            ControlMessage::GetVersion => match self.current().await {
                Some(worker) => event.respond(ControlReply::Version {
                    version: worker.version().to_string(),
                }),
                None => debug!("Version requested with no worker"),
            },
            ControlMessage::ClearCache => {
                let success = match self.current().await {
                    Some(worker) => worker.clear_caches().await.unwrap_or_else(|e| {
                        warn!(error = %e, "Clearing caches failed");
                        false
                    }),
                    None => {
                        debug!("Cache clear requested with no worker");
                        false
                    }
                };
                event.respond(ControlReply::Cleared { success });
            }
        }
    }

    /// Build the notification for a push.
    pub async fn push(&self, payload: Option<&[u8]>) -> Result<Notification, ServiceWorkerError> {
        let worker = self
            .current()
            .await
            .ok_or_else(|| ServiceWorkerError::NotFound("no registered worker".to_string()))?;
        Ok(worker.handle_push(payload))
    }

    /// Handle a click on `notification`. Returns the window opened, if any.
    pub async fn notification_click(
        &self,
        notification: &Notification,
        action: Option<&str>,
    ) -> Result<Option<Client>, ServiceWorkerError> {
        let worker = self
            .current()
            .await
            .ok_or_else(|| ServiceWorkerError::NotFound("no registered worker".to_string()))?;
        info!(action = action.unwrap_or("default"), "Notification clicked");

        match notification.click(action, worker.config())? {
            ClickOutcome::OpenWindow(url) => {
                let controller = self.controller().await.map(|w| w.id());
                Ok(Some(self.clients.write().await.open_window(url, controller)))
            }
            ClickOutcome::Dismissed => Ok(None),
        }
    }

    /// Fire a background sync event.
    pub async fn sync(&self, tag: &str) -> Result<bool, ServiceWorkerError> {
        match self.controller().await {
            Some(worker) => worker.handle_sync(tag).await,
            None => Ok(false),
        }
    }

    /// Wait for background writes of every registered worker.
    pub async fn flush(&self) {
        let workers: Vec<Arc<ServiceWorker>> = match self.registration.read().await.as_ref() {
            Some(r) => [&r.installing, &r.waiting, &r.active]
                .into_iter()
                .flatten()
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        for worker in workers {
            worker.flush().await;
        }
    }
}
