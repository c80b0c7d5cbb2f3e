//! Offline layer configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::ServiceWorkerError;

/// Assets cached at install time unless the deployment overrides them.
const DEFAULT_MANIFEST: &[&str] = &[
    "./",
    "./index.html",
    "./style.css",
    "./script.js",
    "./manifest.json",
    "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700&display=swap",
    "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/css/all.min.css",
    "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/webfonts/fa-solid-900.woff2",
    "https://cdnjs.cloudflare.com/ajax/libs/font-awesome/6.0.0/webfonts/fa-brands-400.woff2",
];

/// Configuration for one deployed version of the offline layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Bucket name prefix shared by every version.
    pub cache_prefix: String,

    /// Version tag; the bucket is named `{cache_prefix}-{version}`.
    pub version: String,

    /// Base URL relative entries are resolved against.
    pub scope: String,

    /// Entry point served for every navigation.
    pub shell_url: String,

    /// URLs that must be cached for an install to succeed.
    pub manifest: Vec<String>,

    /// Background sync tag handled by the worker.
    pub sync_tag: String,

    /// Push notification defaults.
    pub notifications: NotificationConfig,
}

/// Defaults applied to every push notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    pub badge: Option<String>,
    pub vibrate: Vec<u32>,
    /// Page opened on click when the payload has no `url`.
    pub default_url: String,
    pub explore_title: String,
    pub close_title: String,
    pub require_interaction: bool,
    pub silent: bool,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "pwakit".to_string(),
            version: "v1.1.0".to_string(),
            scope: "http://localhost/".to_string(),
            shell_url: "./index.html".to_string(),
            manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
            sync_tag: "background-sync".to_string(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            title: "PwaKit".to_string(),
            body: "A new update is available".to_string(),
            icon: None,
            badge: None,
            vibrate: vec![100, 50, 100],
            default_url: "./".to_string(),
            explore_title: "View more".to_string(),
            close_title: "Close".to_string(),
            require_interaction: false,
            silent: false,
        }
    }
}

impl OfflineConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ServiceWorkerError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ServiceWorkerError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub async fn load(path: &Path) -> Result<Self, ServiceWorkerError> {
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            ServiceWorkerError::ConfigError(format!("{}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Name of this version's bucket.
    pub fn cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.version)
    }

    pub fn scope_url(&self) -> Result<Url, ServiceWorkerError> {
        Url::parse(&self.scope)
            .map_err(|e| ServiceWorkerError::ConfigError(format!("scope '{}': {}", self.scope, e)))
    }

    /// Resolve a manifest-style reference against the scope.
    pub fn resolve(&self, reference: &str) -> Result<Url, ServiceWorkerError> {
        self.scope_url()?
            .join(reference)
            .map_err(|e| ServiceWorkerError::ConfigError(format!("'{}': {}", reference, e)))
    }

    pub fn shell(&self) -> Result<Url, ServiceWorkerError> {
        self.resolve(&self.shell_url)
    }

    /// Manifest entries as absolute URLs, in order.
    pub fn manifest_urls(&self) -> Result<Vec<Url>, ServiceWorkerError> {
        self.manifest.iter().map(|entry| self.resolve(entry)).collect()
    }

    /// Check that every name and URL is usable.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if self.cache_prefix.trim().is_empty() {
            return Err(ServiceWorkerError::ConfigError(
                "cache_prefix must not be empty".to_string(),
            ));
        }
        if self.version.trim().is_empty() {
            return Err(ServiceWorkerError::ConfigError(
                "version must not be empty".to_string(),
            ));
        }
        self.shell()?;
        self.manifest_urls()?;
        self.resolve(&self.notifications.default_url)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OfflineConfig::default();
        assert_eq!(config.cache_name(), "pwakit-v1.1.0");
        assert_eq!(config.manifest.len(), 9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_relative_and_absolute() {
        let config = OfflineConfig {
            scope: "https://example.com/app/".to_string(),
            ..Default::default()
        };

        assert_eq!(
            config.shell().unwrap().as_str(),
            "https://example.com/app/index.html"
        );

        let urls = config.manifest_urls().unwrap();
        assert_eq!(urls[0].as_str(), "https://example.com/app/");
        assert_eq!(urls[5].host_str(), Some("fonts.googleapis.com"));
    }

    #[test]
    fn test_from_json_partial() {
        let config = OfflineConfig::from_json(
            r#"{"version": "v2", "manifest": ["./index.html"], "notifications": {"title": "Hi"}}"#,
        )
        .unwrap();

        assert_eq!(config.cache_name(), "pwakit-v2");
        assert_eq!(config.manifest, vec!["./index.html".to_string()]);
        assert_eq!(config.notifications.title, "Hi");
        assert_eq!(config.notifications.vibrate, vec![100, 50, 100]);
    }

    #[test]
    fn test_invalid_scope_rejected() {
        let result = OfflineConfig::from_json(r#"{"scope": "not a url"}"#);
        assert!(matches!(result, Err(ServiceWorkerError::ConfigError(_))));
    }

    #[test]
    fn test_empty_version_rejected() {
        let result = OfflineConfig::from_json(r#"{"version": " "}"#);
        assert!(matches!(result, Err(ServiceWorkerError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = OfflineConfig::load(Path::new("/nonexistent/pwakit.json")).await;
        assert!(matches!(result, Err(ServiceWorkerError::ConfigError(_))));
    }
}
