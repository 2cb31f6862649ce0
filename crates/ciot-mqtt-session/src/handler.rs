//! Incoming message classification.
//!
//! Maps raw publishes on the device's config and commands topics to
//! typed `IncomingMessage` variants so callers never match topic strings.

use ciot_protocol::topics;

use crate::transport::InboundPublish;

/// A classified inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
    /// Latest device configuration.
    Config(Vec<u8>),
    /// Command, optionally addressed to a subfolder.
    Command {
        subfolder: Option<String>,
        payload: Vec<u8>,
    },
    /// Anything else, including topics for other devices.
    Unknown { topic: String, payload: Vec<u8> },
}

/// Classify a publish received by the device `device_id`.
pub fn classify(device_id: &str, publish: &InboundPublish) -> IncomingMessage {
    let payload = publish.payload.clone();

    match topics::parse_topic(&publish.topic) {
        Some(parsed) if parsed.device_id == device_id => {
            match (parsed.category.as_str(), parsed.subfolder) {
                ("config", None) => IncomingMessage::Config(payload),
                ("commands", subfolder) => IncomingMessage::Command { subfolder, payload },
                _ => IncomingMessage::Unknown {
                    topic: publish.topic.clone(),
                    payload,
                },
            }
        }
        _ => IncomingMessage::Unknown {
            topic: publish.topic.clone(),
            payload,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish(topic: &str, payload: &[u8]) -> InboundPublish {
        InboundPublish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn classify_config() {
        let msg = classify("d1", &publish("/devices/d1/config", b"{\"rate\":5}"));
        assert_eq!(msg, IncomingMessage::Config(b"{\"rate\":5}".to_vec()));
    }

    #[test]
    fn classify_commands() {
        assert_eq!(
            classify("d1", &publish("/devices/d1/commands", b"go")),
            IncomingMessage::Command {
                subfolder: None,
                payload: b"go".to_vec()
            }
        );
        assert_eq!(
            classify("d1", &publish("/devices/d1/commands/led/on", b"")),
            IncomingMessage::Command {
                subfolder: Some("led/on".into()),
                payload: Vec::new()
            }
        );
    }

    #[test]
    fn other_device_is_unknown() {
        let msg = classify("d1", &publish("/devices/d2/config", b"{}"));
        assert!(matches!(msg, IncomingMessage::Unknown { ref topic, .. } if topic == "/devices/d2/config"));
    }

    #[test]
    fn outbound_categories_are_unknown() {
        for topic in ["/devices/d1/events", "/devices/d1/state", "/devices/d1/config/x"] {
            let msg = classify("d1", &publish(topic, b"{}"));
            assert!(matches!(msg, IncomingMessage::Unknown { .. }), "{topic}");
        }
    }

    #[test]
    fn unparseable_topic_is_unknown() {
        let msg = classify("d1", &publish("some/random/topic", b"data"));
        assert!(matches!(msg, IncomingMessage::Unknown { .. }));
    }
}
