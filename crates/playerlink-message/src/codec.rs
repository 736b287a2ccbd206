use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::browser::RemoteError;
use crate::error::{MessageError, Result};
use crate::message::Message;

/// Envelope version written by this build.
pub const PROTOCOL_VERSION: u16 = 1;

/// Turns payload bytes into values and back.
///
/// Runners and handlers are generic over this so tests can use small value
/// types; production code uses [`JsonCodec`].
pub trait MessageCodec: Send + Sync + 'static {
    type Item: Send + 'static;

    fn encode(&self, item: &Self::Item) -> Result<Vec<u8>>;

    /// Must return an error, never panic, on malformed input.
    fn decode(&self, bytes: &[u8]) -> Result<Self::Item>;

    /// Reply used when a request produced no value.
    fn empty(&self) -> Self::Item;

    /// Reply used when a request could not be decoded or its processing failed.
    fn failure(&self, error: RemoteError) -> Self::Item;
}

/// Versioned wire wrapper around one [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub v: u16,
    pub msg: Message,
}

#[derive(Deserialize)]
struct RawEnvelope {
    v: u16,
    msg: serde_json::Value,
}

/// JSON encoding of [`Message`] inside an [`Envelope`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }

    /// Encode straight to a `String` (native-host channel).
    ///
    /// Fails on NaN and infinities, which JSON would silently turn into
    /// `null`.
    pub fn encode_text(&self, message: &Message) -> Result<String> {
        if let Some(value) = message.first_non_finite() {
            return Err(MessageError::NonFiniteNumber(value));
        }
        Ok(serde_json::to_string(&EnvelopeRef {
            v: PROTOCOL_VERSION,
            msg: message,
        })?)
    }

    pub fn decode_text(&self, text: &str) -> Result<Message> {
        let raw: RawEnvelope = serde_json::from_str(text)?;
        Self::open(raw)
    }

    fn open(raw: RawEnvelope) -> Result<Message> {
        if raw.v != PROTOCOL_VERSION {
            return Err(MessageError::UnsupportedVersion {
                found: raw.v,
                supported: PROTOCOL_VERSION,
            });
        }
        let message: Message = serde_json::from_value(raw.msg)?;
        trace!(kind = message.kind(), "decoded message");
        Ok(message)
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    v: u16,
    msg: &'a Message,
}

impl MessageCodec for JsonCodec {
    type Item = Message;

    fn encode(&self, item: &Message) -> Result<Vec<u8>> {
        self.encode_text(item).map(String::into_bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message> {
        let text = std::str::from_utf8(bytes)?;
        self.decode_text(text)
    }

    fn empty(&self) -> Message {
        Message::Null
    }

    fn failure(&self, error: RemoteError) -> Message {
        Message::Error(error)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::browser::{BrowserCommand, BrowserQuery};

    #[test]
    fn envelope_carries_version() {
        let bytes = JsonCodec.encode(&Message::text("Hello, world!")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({"v": 1, "msg": {"type": "text", "value": "Hello, world!"}})
        );
        let envelope: Envelope = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(envelope.v, PROTOCOL_VERSION);
        assert_eq!(envelope.msg.as_text(), Some("Hello, world!"));
    }

    #[test]
    fn decode_inverts_encode() {
        let codec = JsonCodec::new();
        let messages = [
            Message::text("Goodnight, moon!"),
            BrowserCommand::LoadSong {
                url: "file:///music/a.flac".into(),
            }
            .into(),
            BrowserQuery::CurrentTime.into(),
            Message::List(vec![Message::Float(1.25), Message::Bool(false)]),
        ];
        for message in messages {
            let bytes = codec.encode(&message).unwrap();
            assert_eq!(codec.decode(&bytes).unwrap(), message);
            let text = codec.encode_text(&message).unwrap();
            assert_eq!(text.as_bytes(), bytes.as_slice());
            assert_eq!(codec.decode_text(&text).unwrap(), message);
        }
    }

    #[test]
    fn non_finite_numbers_are_refused() {
        let messages = [
            Message::Float(f64::NAN),
            Message::Float(f64::INFINITY),
            Message::List(vec![Message::Int(1), Message::Float(f64::NEG_INFINITY)]),
            Message::Return(crate::browser::CommandReturn::new(Message::Float(f64::NAN))),
            Message::Playback(crate::browser::PlaybackInfo {
                play_time: f64::NAN,
                ..Default::default()
            }),
            BrowserCommand::Seek {
                time: f32::INFINITY,
                relative: false,
            }
            .into(),
        ];
        for message in messages {
            assert!(matches!(
                JsonCodec.encode(&message),
                Err(MessageError::NonFiniteNumber(_))
            ));
            assert!(JsonCodec.encode_text(&message).is_err());
        }

        let finite = Message::Float(-93.25);
        let bytes = JsonCodec.encode(&finite).unwrap();
        assert_eq!(JsonCodec.decode(&bytes).unwrap(), finite);
    }

    #[test]
    fn other_versions_rejected() {
        let err = JsonCodec
            .decode(br#"{"v":2,"msg":{"type":"null"}}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            MessageError::UnsupportedVersion {
                found: 2,
                supported: 1
            }
        ));
    }

    #[test]
    fn garbage_is_an_error_not_a_panic() {
        let codec = JsonCodec;
        for input in [
            &b""[..],
            &b"not json"[..],
            &b"{\"v\":1}"[..],
            &br#"{"v":1,"msg":{"type":"text","value":5}}"#[..],
            &br#"{"v":1,"msg":{"type":"teleport"}}"#[..],
        ] {
            assert!(matches!(codec.decode(input), Err(MessageError::Json(_))));
        }
        assert!(matches!(
            codec.decode(&[0xFF, 0xFE]),
            Err(MessageError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn fallbacks() {
        assert_eq!(JsonCodec.empty(), Message::Null);
        let failure = JsonCodec.failure(RemoteError::new("DecodeError", "bad payload"));
        assert_eq!(failure.kind(), "error");
    }
}
