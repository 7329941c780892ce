//! Codec helpers.
//!
//! Binary frames use MessagePack via `rmp-serde`; text frames use JSON.
//! [`encode_frame`] and [`decode_frame`] pick the format from the frame type
//! so a receiver never has to guess.

use serde::{Deserialize, Serialize};

use crate::channel::ChannelMessage;
use crate::error::NetError;

/// Frame type used when sending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// JSON text frames.
    #[default]
    Text,
    /// MessagePack binary frames.
    Binary,
}

/// Encode a value to MessagePack bytes.
///
/// Structs are encoded as maps so fields with serde defaults may be omitted
/// by other senders.
///
/// # Errors
///
/// Returns [`NetError::Encode`] if serialisation fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, NetError> {
    rmp_serde::to_vec_named(value).map_err(NetError::Encode)
}

/// Decode a value from MessagePack bytes.
///
/// # Errors
///
/// Returns [`NetError::Decode`] if deserialisation fails.
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, NetError> {
    rmp_serde::from_slice(bytes).map_err(NetError::Decode)
}

/// Encode a value into a channel frame of the given type.
///
/// # Errors
///
/// Returns [`NetError`] if serialisation fails.
pub fn encode_frame<T: Serialize>(value: &T, framing: Framing) -> Result<ChannelMessage, NetError> {
    Ok(match framing {
        Framing::Text => ChannelMessage::Text(serde_json::to_string(value)?),
        Framing::Binary => ChannelMessage::Binary(encode(value)?),
    })
}

/// Decode a value from a channel frame.
///
/// # Errors
///
/// Returns [`NetError::Json`] or [`NetError::Decode`] if the frame does not
/// hold a valid `T`.
pub fn decode_frame<T: for<'de> Deserialize<'de>>(message: &ChannelMessage) -> Result<T, NetError> {
    match message {
        ChannelMessage::Text(text) => Ok(serde_json::from_str(text)?),
        ChannelMessage::Binary(bytes) => decode(bytes),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::messages::Envelope;

    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct TestMsg {
        value: u32,
        name: String,
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let msg = TestMsg {
            value: 42,
            name: "hello".to_string(),
        };
        let bytes = encode(&msg).unwrap();
        let restored: TestMsg = decode(&bytes).unwrap();
        assert_eq!(msg, restored);
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let result: Result<TestMsg, _> = decode(&[0xFF, 0xFF]);
        assert!(result.is_err());
    }

    #[test]
    fn test_envelope_in_both_framings() {
        let envelope = Envelope::snapshot(3, "peer", json!({"entities": [{"id": "a"}]}));

        let text = encode_frame(&envelope, Framing::Text).unwrap();
        assert!(matches!(text, ChannelMessage::Text(_)));
        assert_eq!(decode_frame::<Envelope>(&text).unwrap(), envelope);

        let binary = encode_frame(&envelope, Framing::Binary).unwrap();
        assert!(matches!(binary, ChannelMessage::Binary(_)));
        assert_eq!(decode_frame::<Envelope>(&binary).unwrap(), envelope);
    }

    #[test]
    fn test_invalid_text_frame() {
        let frame = ChannelMessage::Text("{\"kind\":".into());
        assert!(matches!(
            decode_frame::<Envelope>(&frame),
            Err(NetError::Json(_))
        ));
    }
}
