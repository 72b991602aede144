//! Wire codec: translates between [`Event`]/[`MediaChunk`] and the raw
//! text/binary frames a [`crate::transport::Transport`] carries.

use bytes::Bytes;
use tracing::warn;
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::event::{Event, WireEvent};

/// A decoded or about-to-be-encoded binary frame: a 16-byte stream
/// identifier followed by opaque payload bytes.
///
/// Carries no `event_type` of its own -- whether it is `INPUT_MEDIA` or
/// `OUTPUT_MEDIA` is a function of which side sent it (see
/// [`crate::event::EventType::InputMedia`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    pub stream_id: Uuid,
    pub bytes: Bytes,
}

/// A frame as the transport sees it, before codec interpretation.
#[derive(Debug, Clone)]
pub enum RawFrame {
    Text(String),
    Binary(Bytes),
}

/// A frame after codec interpretation, before session-state validation.
#[derive(Debug, Clone)]
pub enum DecodedFrame {
    Event(Event),
    Media(MediaChunk),
}

/// Serialize a structured event to the JSON text that goes out as a text frame.
pub fn encode_event(event: &Event) -> String {
    let wire = WireEvent::from(event);
    serde_json::to_string(&wire).expect("WireEvent serialization cannot fail")
}

/// Serialize a media chunk to the 16-byte-prefixed bytes that go out as a binary frame.
pub fn encode_media_chunk(chunk: &MediaChunk) -> Bytes {
    let mut out = Vec::with_capacity(16 + chunk.bytes.len());
    out.extend_from_slice(chunk.stream_id.as_bytes());
    out.extend_from_slice(&chunk.bytes);
    Bytes::from(out)
}

/// Decode a raw frame into an [`Event`] or a [`MediaChunk`].
///
/// Unknown JSON fields are ignored by `serde` already; this only rejects
/// frames that fail to parse, carry an unknown `event_type`, are missing a
/// required field, or (for binary frames) are shorter than the 16-byte
/// identifier prefix.
pub fn decode_frame(frame: RawFrame) -> Result<DecodedFrame, ProtocolError> {
    match frame {
        RawFrame::Text(text) => {
            let wire: WireEvent = serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, "rejecting text frame: invalid JSON");
                ProtocolError::MalformedEvent(format!("invalid JSON: {e}"))
            })?;
            Event::try_from(wire).map(DecodedFrame::Event).map_err(|e| {
                warn!(error = %e, "rejecting text frame: invalid event");
                e
            })
        }
        RawFrame::Binary(bytes) => decode_media_chunk(bytes).map(DecodedFrame::Media),
    }
}

/// Decode a binary frame's bytes into a [`MediaChunk`]. Exposed separately
/// from [`decode_frame`] because direction (client vs. server) determines
/// whether the result means `INPUT_MEDIA` or `OUTPUT_MEDIA`, which only the
/// caller (a driver) knows.
pub fn decode_media_chunk(bytes: Bytes) -> Result<MediaChunk, ProtocolError> {
    if bytes.len() < 16 {
        warn!(len = bytes.len(), "rejecting binary frame: shorter than the 16-byte uuid prefix");
        return Err(ProtocolError::MalformedEvent(format!(
            "binary frame of length {} is shorter than the 16-byte uuid prefix",
            bytes.len()
        )));
    }
    let stream_id = Uuid::from_slice(&bytes[..16]).expect("slice is exactly 16 bytes");
    let payload = bytes.slice(16..);
    Ok(MediaChunk {
        stream_id,
        bytes: payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AudioFormat, InputMode};

    #[test]
    fn event_round_trips_through_text_frame() {
        let event = Event::InputText {
            data: "hello".into(),
        };
        let text = encode_event(&event);
        let decoded = decode_frame(RawFrame::Text(text)).unwrap();
        match decoded {
            DecodedFrame::Event(e) => assert_eq!(e, event),
            DecodedFrame::Media(_) => panic!("expected an event"),
        }
    }

    #[test]
    fn media_chunk_round_trips_through_binary_frame() {
        let chunk = MediaChunk {
            stream_id: Uuid::new_v4(),
            bytes: Bytes::from_static(b"pcmpcmpcm"),
        };
        let encoded = encode_media_chunk(&chunk);
        let decoded = decode_frame(RawFrame::Binary(encoded)).unwrap();
        match decoded {
            DecodedFrame::Media(m) => assert_eq!(m, chunk),
            DecodedFrame::Event(_) => panic!("expected media"),
        }
    }

    #[test]
    fn sixteen_byte_binary_frame_decodes_to_empty_payload() {
        let id = Uuid::new_v4();
        let decoded = decode_media_chunk(Bytes::copy_from_slice(id.as_bytes())).unwrap();
        assert_eq!(decoded.stream_id, id);
        assert!(decoded.bytes.is_empty());
    }

    #[test]
    fn fifteen_byte_binary_frame_is_malformed() {
        let bytes = Bytes::from(vec![0u8; 15]);
        assert!(decode_media_chunk(bytes).is_err());
    }

    #[test]
    fn malformed_json_is_rejected() {
        let result = decode_frame(RawFrame::Text("not json".into()));
        assert!(result.is_err());
    }

    #[test]
    fn missing_required_field_is_rejected() {
        // CONFIG without silence_duration.
        let text = r#"{"event_type":0,"input_mode":1}"#.to_string();
        assert!(decode_frame(RawFrame::Text(text)).is_err());
    }

    #[test]
    fn config_defaults_round_trip() {
        let event = Event::Config {
            chat_id: None,
            input_mode: InputMode::Text,
            silence_duration: -1.0,
            audio_format: AudioFormat {
                nchannels: 1,
                sample_rate: 16000,
                sample_width: 2,
            },
            output_text: true,
            output_audio: true,
            output_video: true,
        };
        let text = encode_event(&event);
        let decoded = decode_frame(RawFrame::Text(text)).unwrap();
        match decoded {
            DecodedFrame::Event(e) => assert_eq!(e, event),
            _ => panic!("expected an event"),
        }
    }
}
