//! JSON codec helpers.
//!
//! Every frame on the wire is a single JSON document. Transports add their
//! own framing (newline for TCP, one message per NATS publish).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::NetError;
use crate::messages::{Inbound, Notification, Response};

/// Encode a value to JSON bytes.
///
/// # Errors
///
/// Returns [`NetError::Encode`] if serialisation fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, NetError> {
    serde_json::to_vec(value).map_err(NetError::Encode)
}

/// Decode a value from JSON bytes.
///
/// # Errors
///
/// Returns [`NetError::Decode`] if deserialisation fails.
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, NetError> {
    serde_json::from_slice(bytes).map_err(NetError::Decode)
}

/// Decode and classify a frame received from the host.
///
/// A frame with a non-null `id` and either `result` or `error` is a
/// response; a frame with a `method` and no `id` is a notification.
///
/// # Errors
///
/// Returns [`NetError::Decode`] for invalid JSON and [`NetError::Malformed`]
/// for JSON that is neither shape.
pub fn decode_inbound(bytes: &[u8]) -> Result<Inbound, NetError> {
    let value: Value = decode(bytes)?;
    let Value::Object(map) = &value else {
        return Err(NetError::Malformed("expected a JSON object".to_string()));
    };

    let has_id = map.get("id").is_some_and(|id| !id.is_null());
    if has_id && (map.contains_key("result") || map.contains_key("error")) {
        let response: Response = serde_json::from_value(value).map_err(NetError::Decode)?;
        return Ok(Inbound::Response(response));
    }
    if !has_id && map.contains_key("method") {
        let notification: Notification =
            serde_json::from_value(value).map_err(NetError::Decode)?;
        return Ok(Inbound::Notification(notification));
    }

    Err(NetError::Malformed(
        "neither a response nor a notification".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decode_response() {
        let frame = br#"{"id": 5, "result": {"foo": "bar"}}"#;
        match decode_inbound(frame).unwrap() {
            Inbound::Response(resp) => {
                assert_eq!(resp.id, 5);
                assert_eq!(resp.into_result().unwrap(), json!({"foo": "bar"}));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_error_response() {
        let frame = br#"{"id": 9, "error": {"code": 1, "message": "undefined is not a function"}}"#;
        let Inbound::Response(resp) = decode_inbound(frame).unwrap() else {
            panic!("expected response");
        };
        assert!(resp.into_result().is_err());
    }

    #[test]
    fn test_decode_notification_without_params() {
        let frame = br#"{"jsonrpc": "2.0", "method": "state_requested"}"#;
        let Inbound::Notification(n) = decode_inbound(frame).unwrap() else {
            panic!("expected notification");
        };
        assert_eq!(n.method, "state_requested");
        assert!(n.params.is_empty());
    }

    #[test]
    fn test_decode_id_without_result_is_malformed() {
        let frame = br#"{"id": 5}"#;
        assert!(matches!(decode_inbound(frame), Err(NetError::Malformed(_))));
    }

    #[test]
    fn test_decode_non_object_is_malformed() {
        assert!(matches!(decode_inbound(b"[1, 2]"), Err(NetError::Malformed(_))));
    }

    #[test]
    fn test_decode_invalid_bytes() {
        assert!(matches!(decode_inbound(b"{not json"), Err(NetError::Decode(_))));
    }
}
