//! Push payloads and notification clicks.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use url::Url;

use crate::config::{NotificationConfig, OfflineConfig};
use crate::ServiceWorkerError;

/// Action id that opens the notification's url.
pub const ACTION_EXPLORE: &str = "explore";
/// Action id that only dismisses the notification.
pub const ACTION_CLOSE: &str = "close";

/// Data attached to a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    pub date_of_arrival: u64,
    pub primary_key: u64,
    /// Page to open on click, relative to the scope or absolute.
    pub url: String,
}

/// A button shown on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// A notification ready to be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
    pub require_interaction: bool,
    pub silent: bool,
}

/// Fields a push payload may override.
#[derive(Debug, Default, Deserialize)]
struct PushOverrides {
    title: Option<serde_json::Value>,
    body: Option<serde_json::Value>,
    url: Option<serde_json::Value>,
}

/// Text of a truthy value, or nothing.
///
/// `null`, `false`, zero and the empty string are falsy. Arrays and objects
/// are truthy and render as JSON text.
fn truthy(value: Option<serde_json::Value>) -> Option<String> {
    use serde_json::Value;

    match value? {
        Value::Null | Value::Bool(false) => None,
        Value::Bool(true) => Some("true".to_string()),
        Value::Number(n) if n.as_f64().is_some_and(|f| f == 0.0) => None,
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

impl Notification {
    /// Notification built from `config` alone.
    pub fn with_defaults(config: &NotificationConfig) -> Self {
        Self {
            title: config.title.clone(),
            body: config.body.clone(),
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: config.vibrate.clone(),
            data: NotificationData {
                date_of_arrival: pwakit_common::now_millis(),
                primary_key: 1,
                url: config.default_url.clone(),
            },
            actions: vec![
                NotificationAction {
                    action: ACTION_EXPLORE.to_string(),
                    title: config.explore_title.clone(),
                },
                NotificationAction {
                    action: ACTION_CLOSE.to_string(),
                    title: config.close_title.clone(),
                },
            ],
            require_interaction: config.require_interaction,
            silent: config.silent,
        }
    }

    /// Build the notification for a push.
    ///
    /// A JSON object may override `title`, `body` and `url` with truthy
    /// values. Other JSON values carry no overrides, except `null`, which like
    /// a payload that is not JSON becomes the body verbatim. An absent or
    /// empty payload leaves every default in place.
    pub fn from_push(payload: Option<&[u8]>, config: &NotificationConfig) -> Self {
        let mut notification = Self::with_defaults(config);

        let payload = match payload {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return notification,
        };

        match serde_json::from_slice::<serde_json::Value>(payload) {
            Ok(serde_json::Value::Object(map)) => {
                let overrides: PushOverrides =
                    serde_json::from_value(serde_json::Value::Object(map)).unwrap_or_default();
                if let Some(title) = truthy(overrides.title) {
                    notification.title = title;
                }
                if let Some(body) = truthy(overrides.body) {
                    notification.body = body;
                }
                if let Some(url) = truthy(overrides.url) {
                    notification.data.url = url;
                }
            }
            Ok(serde_json::Value::Null) => {
                debug!("Push payload is null, using it as the body");
                notification.body = String::from_utf8_lossy(payload).into_owned();
            }
            Ok(other) => trace!(payload = %other, "Push payload carries no overrides"),
            Err(e) => {
                debug!(error = %e, "Push payload is not JSON, using it as the body");
                notification.body = String::from_utf8_lossy(payload).into_owned();
            }
        }

        notification
    }

    /// What a click on this notification does.
    ///
    /// `close` only dismisses. Every other action, including a click on the
    /// notification body (`None`), opens `data.url` resolved against the scope.
    pub fn click(
        &self,
        action: Option<&str>,
        config: &OfflineConfig,
    ) -> Result<ClickOutcome, ServiceWorkerError> {
        if action == Some(ACTION_CLOSE) {
            return Ok(ClickOutcome::Dismissed);
        }

        let target = if self.data.url.is_empty() {
            config.notifications.default_url.as_str()
        } else {
            self.data.url.as_str()
        };
        Ok(ClickOutcome::OpenWindow(config.resolve(target)?))
    }
}

/// Result of a notification click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Open (and focus) a window at this URL.
    OpenWindow(Url),
    /// Just close the notification.
    Dismissed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OfflineConfig {
        OfflineConfig {
            scope: "https://example.com/app/".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_without_payload() {
        let config = config();
        let n = Notification::from_push(None, &config.notifications);

        assert_eq!(n.title, "PwaKit");
        assert_eq!(n.body, "A new update is available");
        assert_eq!(n.vibrate, vec![100, 50, 100]);
        assert_eq!(n.data.url, "./");
        assert_eq!(n.data.primary_key, 1);
        assert_eq!(n.actions.len(), 2);
        assert_eq!(n.actions[0].action, "explore");
        assert_eq!(n.actions[1].action, "close");

        let empty = Notification::from_push(Some(b""), &config.notifications);
        assert_eq!(empty.body, n.body);
    }

    #[test]
    fn test_json_overrides() {
        let config = config();
        let n = Notification::from_push(
            Some(br#"{"title": "Sale", "body": "50% off", "url": "./offers"}"#),
            &config.notifications,
        );
        assert_eq!(n.title, "Sale");
        assert_eq!(n.body, "50% off");
        assert_eq!(n.data.url, "./offers");
    }

    #[test]
    fn test_falsy_fields_ignored() {
        let config = config();
        let n = Notification::from_push(
            Some(br#"{"title": "", "body": 0, "url": null}"#),
            &config.notifications,
        );
        assert_eq!(n.title, "PwaKit");
        assert_eq!(n.body, "A new update is available");
        assert_eq!(n.data.url, "./");

        let off = Notification::from_push(Some(br#"{"body": false}"#), &config.notifications);
        assert_eq!(off.body, "A new update is available");

        let scalar = Notification::from_push(Some(b"17"), &config.notifications);
        assert_eq!(scalar.body, "A new update is available");
        let text = Notification::from_push(Some(br#""hello""#), &config.notifications);
        assert_eq!(text.body, "A new update is available");
    }

    #[test]
    fn test_truthy_non_string_fields_override() {
        let config = config();
        let n = Notification::from_push(
            Some(br#"{"title": true, "body": 42, "url": 1.5}"#),
            &config.notifications,
        );
        assert_eq!(n.title, "true");
        assert_eq!(n.body, "42");
        assert_eq!(n.data.url, "1.5");
    }

    #[test]
    fn test_null_payload_becomes_body() {
        let config = config();
        let n = Notification::from_push(Some(b"null"), &config.notifications);
        assert_eq!(n.title, "PwaKit");
        assert_eq!(n.body, "null");
    }

    #[test]
    fn test_plain_text_payload_becomes_body() {
        let config = config();
        let n = Notification::from_push(Some(b"New blog post"), &config.notifications);
        assert_eq!(n.title, "PwaKit");
        assert_eq!(n.body, "New blog post");
    }

    #[test]
    fn test_click_routes() {
        let config = config();
        let n = Notification::from_push(Some(br#"{"url": "./offers"}"#), &config.notifications);

        let expected = Url::parse("https://example.com/app/offers").unwrap();
        assert_eq!(
            n.click(Some("explore"), &config).unwrap(),
            ClickOutcome::OpenWindow(expected.clone())
        );
        assert_eq!(n.click(None, &config).unwrap(), ClickOutcome::OpenWindow(expected));
        assert_eq!(n.click(Some("close"), &config).unwrap(), ClickOutcome::Dismissed);

        let plain = Notification::from_push(None, &config.notifications);
        assert_eq!(
            plain.click(None, &config).unwrap(),
            ClickOutcome::OpenWindow(Url::parse("https://example.com/app/").unwrap())
        );
    }

    #[test]
    fn test_serializes_with_web_field_names() {
        let config = config();
        let value = serde_json::to_value(Notification::from_push(None, &config.notifications)).unwrap();
        assert_eq!(value["requireInteraction"], false);
        assert_eq!(value["data"]["primaryKey"], 1);
        assert!(value.get("icon").is_none());
    }
}
