//! Relay wire format: control frames and the encrypted share payload.

use crate::storage::EnvValue;
use crate::{Result, SwapenvError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// JSON control frame sent by the relay: `{type, code?, codes?, message?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Sender registered; `code` identifies its session.
    Waiting {
        #[serde(default)]
        code: String,
    },
    /// A receiver joined; its public key follows as a binary frame.
    Ready {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        code: String,
    },
    /// Several senders are waiting; the receiver must pick one.
    Choose {
        #[serde(default)]
        codes: Vec<String>,
    },
    /// The receiver is paired with the sender `code`.
    Connected {
        #[serde(default)]
        code: String,
    },
    Error {
        #[serde(default)]
        message: String,
    },
}

impl ControlMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| SwapenvError::Protocol(format!("Invalid control frame {:?}: {}", text, e)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Waiting { .. } => "waiting",
            Self::Ready { .. } => "ready",
            Self::Choose { .. } => "choose",
            Self::Connected { .. } => "connected",
            Self::Error { .. } => "error",
        }
    }
}

/// Receiver's answer to a `choose` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceReply {
    pub code: String,
}

/// What a sender transfers: one project's selected environments.
///
/// Encoded as `name_len(u8) || name || JSON{env: [EnvValue]}` before
/// encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharePayload {
    pub project_name: String,
    pub environments: BTreeMap<String, Vec<EnvValue>>,
}

impl SharePayload {
    pub const MAX_NAME_LEN: usize = u8::MAX as usize;

    pub fn encode(&self) -> Result<Vec<u8>> {
        let name = self.project_name.as_bytes();
        if name.is_empty() || name.len() > Self::MAX_NAME_LEN {
            return Err(SwapenvError::InvalidInput(format!(
                "Project name must be 1-{} bytes to share, got {}",
                Self::MAX_NAME_LEN,
                name.len()
            )));
        }

        let envs = serde_json::to_vec(&self.environments)?;
        let mut out = Vec::with_capacity(1 + name.len() + envs.len());
        out.push(name.len() as u8);
        out.extend_from_slice(name);
        out.extend_from_slice(&envs);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&name_len, rest) = bytes
            .split_first()
            .ok_or_else(|| SwapenvError::Protocol("Empty share payload".to_string()))?;
        let name_len = name_len as usize;
        if name_len == 0 || rest.len() < name_len {
            return Err(SwapenvError::Protocol(format!(
                "Share payload name length {} out of range",
                name_len
            )));
        }

        let (name, envs) = rest.split_at(name_len);
        let project_name = std::str::from_utf8(name)
            .map_err(|_| SwapenvError::Protocol("Project name is not UTF-8".to_string()))?
            .to_string();
        let environments = serde_json::from_slice(envs)
            .map_err(|e| SwapenvError::Protocol(format!("Invalid environment data: {}", e)))?;

        Ok(Self {
            project_name,
            environments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_frames_parse() {
        assert_eq!(
            ControlMessage::parse(r#"{"type":"waiting","code":"k3x9"}"#).unwrap(),
            ControlMessage::Waiting {
                code: "k3x9".to_string()
            }
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"ready"}"#).unwrap(),
            ControlMessage::Ready {
                code: String::new()
            }
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"choose","codes":["a","b"]}"#).unwrap(),
            ControlMessage::Choose {
                codes: vec!["a".to_string(), "b".to_string()]
            }
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type":"error","message":"no senders"}"#)
                .unwrap()
                .kind(),
            "error"
        );
    }

    #[test]
    fn unknown_control_frame_is_protocol_error() {
        assert!(matches!(
            ControlMessage::parse(r#"{"type":"bogus"}"#),
            Err(SwapenvError::Protocol(_))
        ));
        assert!(matches!(
            ControlMessage::parse("not json"),
            Err(SwapenvError::Protocol(_))
        ));
    }

    #[test]
    fn control_frame_serializes_with_type_tag() {
        let json = serde_json::to_value(ControlMessage::Connected {
            code: "k3x9".to_string(),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"type": "connected", "code": "k3x9"}));
    }

    #[test]
    fn payload_layout() {
        let mut environments = BTreeMap::new();
        environments.insert("dev".to_string(), vec![EnvValue::new("A", "1", 1)]);
        let payload = SharePayload {
            project_name: "demo".to_string(),
            environments,
        };

        let bytes = payload.encode().unwrap();
        assert_eq!(bytes[0], 4);
        assert_eq!(&bytes[1..5], b"demo");
        assert_eq!(bytes[5], b'{');
        assert_eq!(SharePayload::decode(&bytes).unwrap(), payload);
    }

    #[test]
    fn oversized_name_rejected() {
        let payload = SharePayload {
            project_name: "x".repeat(256),
            environments: BTreeMap::new(),
        };
        assert!(matches!(
            payload.encode(),
            Err(SwapenvError::InvalidInput(_))
        ));
    }

    #[test]
    fn truncated_payload_rejected() {
        assert!(matches!(
            SharePayload::decode(&[]),
            Err(SwapenvError::Protocol(_))
        ));
        assert!(matches!(
            SharePayload::decode(&[10, b'a', b'b']),
            Err(SwapenvError::Protocol(_))
        ));
        assert!(matches!(
            SharePayload::decode(&[1, b'a', b'[']),
            Err(SwapenvError::Protocol(_))
        ));
    }
}
