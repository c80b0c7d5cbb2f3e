//! Control channel between a page and the offline layer.

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::debug;

/// A control message, `{"type": "..."}` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate the waiting worker now. No reply.
    SkipWaiting,
    /// Reply with the current bucket name.
    GetVersion,
    /// Delete every bucket and reply with the outcome.
    ClearCache,
}

impl ControlMessage {
    /// Interpret arbitrary message data.
    ///
    /// Anything that is not an object with a known `type` yields `None`;
    /// extra fields are ignored.
    pub fn parse(data: &serde_json::Value) -> Option<Self> {
        match serde_json::from_value(data.clone()) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(data = %data, error = %e, "Ignoring unrecognized message");
                None
            }
        }
    }
}

/// Reply posted back on a message's port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlReply {
    Version { version: String },
    Cleared { success: bool },
}

/// A message delivered to the worker, with an optional reply port.
#[derive(Debug)]
pub struct MessageEvent {
    pub data: serde_json::Value,
    pub reply: Option<oneshot::Sender<ControlReply>>,
}

impl MessageEvent {
    /// A message with a reply port; the receiver resolves once the worker
    /// answers, or errors if it never will.
    pub fn with_reply(data: serde_json::Value) -> (Self, oneshot::Receiver<ControlReply>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                data,
                reply: Some(tx),
            },
            rx,
        )
    }

    /// A fire-and-forget message.
    pub fn new(data: serde_json::Value) -> Self {
        Self { data, reply: None }
    }

    /// Post `reply` on the port, if there is one and it is still open.
    pub fn respond(&mut self, reply: ControlReply) {
        if let Some(port) = self.reply.take() {
            if port.send(reply).is_err() {
                debug!("Reply port closed before answer");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_known_types() {
        assert_eq!(
            ControlMessage::parse(&json!({"type": "SKIP_WAITING"})),
            Some(ControlMessage::SkipWaiting)
        );
        assert_eq!(
            ControlMessage::parse(&json!({"type": "GET_VERSION", "extra": 1})),
            Some(ControlMessage::GetVersion)
        );
        assert_eq!(
            ControlMessage::parse(&json!({"type": "CLEAR_CACHE"})),
            Some(ControlMessage::ClearCache)
        );
    }

    #[test]
    fn test_parse_unknown_or_malformed() {
        assert_eq!(ControlMessage::parse(&json!({"type": "REBOOT"})), None);
        assert_eq!(ControlMessage::parse(&json!({"kind": "GET_VERSION"})), None);
        assert_eq!(ControlMessage::parse(&json!("GET_VERSION")), None);
        assert_eq!(ControlMessage::parse(&serde_json::Value::Null), None);
    }

    #[test]
    fn test_reply_wire_shape() {
        let version = ControlReply::Version {
            version: "pwakit-v1".to_string(),
        };
        assert_eq!(serde_json::to_value(&version).unwrap(), json!({"version": "pwakit-v1"}));

        let cleared = ControlReply::Cleared { success: true };
        assert_eq!(serde_json::to_value(&cleared).unwrap(), json!({"success": true}));
    }

    #[tokio::test]
    async fn test_respond_once() {
        let (mut event, rx) = MessageEvent::with_reply(json!({"type": "GET_VERSION"}));
        event.respond(ControlReply::Cleared { success: false });
        event.respond(ControlReply::Cleared { success: true });

        assert_eq!(rx.await.unwrap(), ControlReply::Cleared { success: false });
    }

    #[test]
    fn test_respond_without_port() {
        let mut event = MessageEvent::new(json!({"type": "CLEAR_CACHE"}));
        event.respond(ControlReply::Cleared { success: true });
        assert!(event.reply.is_none());
    }
}
