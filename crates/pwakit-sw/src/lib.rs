//! # PwaKit Service Worker
//!
//! Offline-serving layer for an installable web app.
//!
//! ## Features
//!
//! - **Versioned buckets**: one cache bucket per deployed version, populated
//!   from a fixed manifest at install and purged of stale versions at activation
//! - **Fetch interception**: per-destination caching strategies with network
//!   fallback and synthetic offline placeholders
//! - **Control channel**: `SKIP_WAITING`, `GET_VERSION`, `CLEAR_CACHE`
//! - **Push & notifications**: payload parsing and click routing
//! - **Background sync**: tag dispatch
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (event dispatcher)
//!     │
//!     ├── ServiceWorkerRegistration
//!     │       ├── installing (ServiceWorker)
//!     │       ├── waiting    (ServiceWorker)
//!     │       └── active     (ServiceWorker)
//!     │               ├── CacheLifecycle      install / activate
//!     │               └── RequestInterceptor  fetch
//!     │
//!     ├── Clients
//!     │
//!     └── dyn CacheStore (MemoryCacheStore | FileCacheStore)
//!             └── Cache (bucket): "GET <url>" → CacheEntry
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use pwakit_net::NetError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod disk;
pub mod intercept;
pub mod lifecycle;
pub mod messages;
pub mod push;
pub mod registration;
pub mod worker;

pub use cache::{Cache, CacheEntry, CacheStore, MemoryCacheStore};
pub use clients::{Client, Clients};
pub use config::{NotificationConfig, OfflineConfig};
pub use disk::FileCacheStore;
pub use intercept::{FetchOutcome, RequestInterceptor};
pub use lifecycle::{ActivationReport, CacheLifecycle, InstallReport, LifecycleState};
pub use messages::{ControlMessage, ControlReply, MessageEvent};
pub use push::{ClickOutcome, Notification, NotificationAction, NotificationData};
pub use registration::{RegisterReport, ServiceWorkerContainer, ServiceWorkerRegistration};
pub use worker::ServiceWorker;

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone)]
pub enum ServiceWorkerError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<NetError> for ServiceWorkerError {
    fn from(err: NetError) -> Self {
        Self::NetworkError(err.to_string())
    }
}

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Events published on the container's channel.
#[derive(Debug, Clone)]
pub enum ServiceWorkerEvent {
    /// A new version started installing.
    UpdateFound { version: String },
    /// A worker moved to a new lifecycle state.
    StateChange {
        worker_id: ServiceWorkerId,
        version: String,
        new_state: LifecycleState,
    },
    /// Install finished and the bucket is populated.
    Installed { version: String, cached: usize },
    /// Install failed; the previous version keeps serving.
    InstallFailed { version: String, error: String },
    /// A bucket was deleted.
    CacheDeleted { name: String },
    /// A background cache write failed.
    CacheWriteFailed {
        cache: String,
        url: String,
        error: String,
    },
    /// A client is now controlled by a different worker.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
    /// A background sync task ran.
    SyncCompleted { tag: String },
}
