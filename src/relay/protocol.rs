//! Relay envelope format.
//!
//! Every message crossing the boundary is a JSON object:
//!
//! ```json
//! {"source":"fixonce-capture","kind":"captured_error","payload":{...}}
//! {"source":"fixonce-capture","kind":"page_opened","payload":{"url":"http://localhost:3000/"}}
//! ```
//!
//! The privileged side only trusts what [`accept`] returns.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::record::{truncate_chars, ErrorRecord, MAX_URL_CHARS};
use crate::sanitize::{contains_sensitive, sanitize_url};

/// Tag carried by every envelope from the capture side.
pub const SOURCE_TAG: &str = "fixonce-capture";

/// Envelope discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Payload is an [`ErrorRecord`].
    CapturedError,
    /// Payload is `{"url": ...}`.
    PageOpened,
}

/// Wire form of a relayed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// Producer tag, must equal [`SOURCE_TAG`].
    pub source: String,
    /// What the payload holds.
    pub kind: MessageKind,
    /// Kind-specific payload.
    pub payload: Value,
}

#[derive(Serialize, Deserialize)]
struct PagePayload {
    url: String,
}

/// A validated relay message.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// A captured error.
    CapturedError(ErrorRecord),
    /// The monitored context navigated to `url`.
    PageOpened {
        /// Page URL.
        url: String,
    },
}

impl RelayMessage {
    /// Captured error message.
    pub fn captured(record: ErrorRecord) -> Self {
        RelayMessage::CapturedError(record)
    }

    /// Page-opened message.
    pub fn page_opened(url: impl Into<String>) -> Self {
        RelayMessage::PageOpened { url: url.into() }
    }

    /// Wrap into a tagged envelope.
    pub fn to_envelope(&self) -> Result<RelayEnvelope, serde_json::Error> {
        let (kind, payload) = match self {
            RelayMessage::CapturedError(record) => {
                (MessageKind::CapturedError, serde_json::to_value(record)?)
            }
            RelayMessage::PageOpened { url } => (
                MessageKind::PageOpened,
                serde_json::to_value(PagePayload { url: url.clone() })?,
            ),
        };
        Ok(RelayEnvelope {
            source: SOURCE_TAG.to_string(),
            kind,
            payload,
        })
    }

    /// Envelope as a raw JSON value.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self.to_envelope()?)
    }
}

/// Validate a raw value from the capture side.
///
/// Anything with the wrong tag or shape is dropped. Records are sealed
/// again, so a sender that skipped sanitization gains nothing.
pub fn accept(raw: Value) -> Option<RelayMessage> {
    let envelope: RelayEnvelope = match serde_json::from_value(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!("Dropping relay message with bad envelope: {}", e);
            return None;
        }
    };

    if envelope.source != SOURCE_TAG {
        debug!("Dropping relay message from foreign source {:?}", envelope.source);
        return None;
    }

    match envelope.kind {
        MessageKind::CapturedError => {
            let mut record: ErrorRecord = match serde_json::from_value(envelope.payload) {
                Ok(record) => record,
                Err(e) => {
                    debug!("Dropping captured error with bad payload: {}", e);
                    return None;
                }
            };
            if contains_sensitive(&record.message) {
                debug!("Relayed record was not sanitized at capture, sealing again");
            }
            record.seal();
            Some(RelayMessage::CapturedError(record))
        }
        MessageKind::PageOpened => {
            let page: PagePayload = serde_json::from_value(envelope.payload).ok()?;
            Some(RelayMessage::PageOpened {
                url: truncate_chars(&sanitize_url(&page.url), MAX_URL_CHARS),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ErrorKind, Severity};
    use serde_json::json;

    fn record() -> ErrorRecord {
        ErrorRecord::new(ErrorKind::ConsoleError, Severity::Error, "boom")
            .with_page_url("http://localhost:3000/")
    }

    #[test]
    fn test_envelope_shape() {
        let value = RelayMessage::page_opened("http://localhost:3000/").to_value().unwrap();
        assert_eq!(value["source"], "fixonce-capture");
        assert_eq!(value["kind"], "page_opened");
        assert_eq!(value["payload"]["url"], "http://localhost:3000/");
    }

    #[test]
    fn test_accepts_own_messages() {
        let msg = RelayMessage::captured(record());
        let accepted = accept(msg.to_value().unwrap()).unwrap();
        match accepted {
            RelayMessage::CapturedError(r) => {
                assert_eq!(r.message, "boom");
                assert_eq!(r.page_url, "http://localhost:3000/");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_foreign_tag() {
        let mut value = RelayMessage::captured(record()).to_value().unwrap();
        value["source"] = json!("some-extension");
        assert!(accept(value).is_none());
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(accept(json!("just a string")).is_none());
        assert!(accept(json!({"source": SOURCE_TAG, "kind": "unknown", "payload": {}})).is_none());
        assert!(
            accept(json!({"source": SOURCE_TAG, "kind": "captured_error", "payload": {"message": 1}}))
                .is_none()
        );
        assert!(accept(json!({"source": SOURCE_TAG, "kind": "page_opened", "payload": {}})).is_none());
    }

    #[test]
    fn test_unsanitized_payload_is_sealed() {
        let mut raw = record();
        raw.message = "login failed for bob@example.com password=hunter2".into();
        let value = RelayMessage::captured(raw).to_value().unwrap();

        match accept(value).unwrap() {
            RelayMessage::CapturedError(r) => {
                assert!(!r.message.contains("bob@example.com"));
                assert!(!r.message.contains("hunter2"));
                assert!(r.message.contains("[EMAIL]"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
