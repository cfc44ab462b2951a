//! JSON framing for protocol messages
//!
//! Every frame is a single JSON object discriminated by its `type` field.
//! Anything that fails to decode, or exceeds [`MAX_FRAME_LEN`], is an
//! *invalid message*.

use super::messages::{CallerMessage, CoordinatorMessage, RemoteMessage};
use crate::errors::{Result, SessionError};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Largest frame accepted from a caller or the remote endpoint
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

fn decode<T: DeserializeOwned>(frame: &str) -> Result<T> {
    if frame.len() > MAX_FRAME_LEN {
        return Err(SessionError::invalid_message(format!(
            "frame of {} bytes exceeds limit of {}",
            frame.len(),
            MAX_FRAME_LEN
        )));
    }
    Ok(serde_json::from_str(frame)?)
}

fn encode<T: Serialize>(message: &T) -> Result<String> {
    serde_json::to_string(message)
        .map_err(|e| SessionError::internal(format!("failed to encode message: {}", e)))
}

pub fn decode_caller(frame: &str) -> Result<CallerMessage> {
    decode(frame)
}

pub fn encode_coordinator(message: &CoordinatorMessage) -> Result<String> {
    encode(message)
}

pub fn decode_remote(frame: &str) -> Result<RemoteMessage> {
    decode(frame)
}

pub fn encode_remote(message: &RemoteMessage) -> Result<String> {
    encode(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CloseCode;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_decode_init_uses_wire_field_names() {
        let msg = decode_caller(r#"{"type":"init","localDatabaseName":"d","serverURL":"wss://x"}"#)
            .unwrap();
        assert_eq!(msg, CallerMessage::init("wss://x", "d"));
    }

    #[test]
    fn test_decode_ping_and_transition() {
        assert_eq!(decode_caller(r#"{"type":"ping"}"#).unwrap(), CallerMessage::ping());
        assert_eq!(
            decode_caller(r#"{"type":"transition","payload":{"op":"put","k":1}}"#).unwrap(),
            CallerMessage::Transition {
                payload: json!({"op": "put", "k": 1})
            }
        );
    }

    #[test]
    fn test_malformed_frames_are_invalid_messages() {
        for frame in [
            "not json",
            r#"{"type":"bogus"}"#,
            r#"{"type":"init","serverURL":"wss://x"}"#,
            r#"{"serverURL":"wss://x","localDatabaseName":"d"}"#,
        ] {
            let err = decode_caller(frame).unwrap_err();
            assert!(
                matches!(err, SessionError::InvalidMessage { .. }),
                "{frame} should be invalid, got {err:?}"
            );
            assert_eq!(err.close_code(), Some(CloseCode::InvalidMessage));
        }
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let frame = format!(
            r#"{{"type":"transition","payload":"{}"}}"#,
            "x".repeat(MAX_FRAME_LEN)
        );
        assert!(matches!(
            decode_caller(&frame),
            Err(SessionError::InvalidMessage { .. })
        ));
    }

    #[test]
    fn test_coordinator_error_frame_carries_numeric_code() {
        let frame = encode_coordinator(&CoordinatorMessage::Error {
            code: CloseCode::InvalidMessage,
            message: "bad".into(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"type": "error", "code": 4000, "message": "bad"}));
    }

    #[test]
    fn test_remote_init_frame() {
        let frame = encode_remote(&RemoteMessage::Init {
            version: "1.4.0".into(),
        })
        .unwrap();
        assert_eq!(frame, r#"{"type":"init","version":"1.4.0"}"#);
        assert_eq!(
            decode_remote(&frame).unwrap(),
            RemoteMessage::Init {
                version: "1.4.0".into()
            }
        );
    }
}
