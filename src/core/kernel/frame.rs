//! Length-prefixed binary frame carrying text and audio together.
//!
//! ```text
//! ┌───────────┬─────────┬──────────┬─────────┬──────┬──────────┬───────┬──────────┐
//! │ frameType │ sidLen  │ session  │ textLen │ text │ audioLen │ audio │ duration │
//! │ 1 byte    │ i32 LE  │ UTF-8    │ i32 LE  │ UTF-8│ i32 LE   │ bytes │ f32 LE   │
//! └───────────┴─────────┴──────────┴─────────┴──────┴──────────┴───────┴──────────┘
//! ```
//!
//! A zero text or audio length means the section is absent.

use crate::core::types::IntegratedMessage;
use thiserror::Error;

/// Frame type byte of an integrated text+audio frame
pub const FRAME_TYPE_INTEGRATED: u8 = 0x03;

/// Smallest buffer that can hold a frame type and a length prefix
pub const MIN_FRAME_SIZE: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: need {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("unsupported frame type: 0x{0:02x}")]
    UnsupportedFrameType(u8),

    #[error("negative length {length} for {field}")]
    NegativeLength { field: &'static str, length: i32 },

    #[error("{0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("{field} too long to encode: {length} bytes")]
    TooLong { field: &'static str, length: usize },
}

/// Encode an integrated message into its wire form
pub fn encode_integrated(message: &IntegratedMessage) -> Result<Vec<u8>, FrameError> {
    let session = message.session_id.as_bytes();
    let text = message.text.as_deref().unwrap_or_default().as_bytes();
    let audio = message.audio.as_deref().unwrap_or_default();

    let mut buf = Vec::with_capacity(1 + 4 * 4 + session.len() + text.len() + audio.len());
    buf.push(FRAME_TYPE_INTEGRATED);
    put_section(&mut buf, "session id", session)?;
    put_section(&mut buf, "text", text)?;
    put_section(&mut buf, "audio", audio)?;
    buf.extend_from_slice(&message.audio_duration.to_le_bytes());
    Ok(buf)
}

/// Decode an integrated frame. Any declared length that runs past the end of
/// the buffer makes the frame unparseable.
pub fn decode_integrated(buf: &[u8]) -> Result<IntegratedMessage, FrameError> {
    if buf.len() < MIN_FRAME_SIZE {
        return Err(FrameError::Truncated {
            offset: 0,
            needed: MIN_FRAME_SIZE,
            available: buf.len(),
        });
    }

    let mut reader = Reader { buf, offset: 0 };

    let frame_type = reader.take(1)?[0];
    if frame_type != FRAME_TYPE_INTEGRATED {
        return Err(FrameError::UnsupportedFrameType(frame_type));
    }

    let session = reader.section("session id")?;
    let session_id = std::str::from_utf8(session)
        .map_err(|_| FrameError::InvalidUtf8("session id"))?
        .to_string();

    let text = reader.section("text")?;
    let text = if text.is_empty() {
        None
    } else {
        Some(
            std::str::from_utf8(text)
                .map_err(|_| FrameError::InvalidUtf8("text"))?
                .to_string(),
        )
    };

    let audio = reader.section("audio")?;
    let audio = (!audio.is_empty()).then(|| audio.to_vec());

    let duration = reader.take(4)?;
    let audio_duration = f32::from_le_bytes([duration[0], duration[1], duration[2], duration[3]]);

    Ok(IntegratedMessage {
        session_id,
        text,
        audio,
        audio_duration,
    })
}

fn put_section(buf: &mut Vec<u8>, field: &'static str, bytes: &[u8]) -> Result<(), FrameError> {
    let length = i32::try_from(bytes.len()).map_err(|_| FrameError::TooLong {
        field,
        length: bytes.len(),
    })?;
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, needed: usize) -> Result<&'a [u8], FrameError> {
        let available = self.buf.len() - self.offset;
        if needed > available {
            return Err(FrameError::Truncated {
                offset: self.offset,
                needed,
                available,
            });
        }
        let slice = &self.buf[self.offset..self.offset + needed];
        self.offset += needed;
        Ok(slice)
    }

    /// i32 length prefix followed by that many bytes
    fn section(&mut self, field: &'static str) -> Result<&'a [u8], FrameError> {
        let prefix = self.take(4)?;
        let length = i32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        let length = usize::try_from(length).map_err(|_| FrameError::NegativeLength { field, length })?;
        self.take(length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IntegratedMessage {
        IntegratedMessage {
            session_id: "abc".to_string(),
            text: Some("hi".to_string()),
            audio: Some(vec![1, 2, 3]),
            audio_duration: 1.5,
        }
    }

    #[test]
    fn test_round_trip() {
        let encoded = encode_integrated(&sample()).unwrap();
        assert_eq!(decode_integrated(&encoded).unwrap(), sample());
    }

    #[test]
    fn test_wire_layout() {
        let encoded = encode_integrated(&sample()).unwrap();
        let parts: [&[u8]; 8] = [
            &[0x03],
            &3i32.to_le_bytes(),
            b"abc",
            &2i32.to_le_bytes(),
            b"hi",
            &3i32.to_le_bytes(),
            &[1, 2, 3],
            &1.5f32.to_le_bytes(),
        ];
        assert_eq!(encoded, parts.concat());
    }

    #[test]
    fn test_absent_sections() {
        let message = IntegratedMessage {
            session_id: "s".to_string(),
            text: None,
            audio: None,
            audio_duration: 0.0,
        };
        let decoded = decode_integrated(&encode_integrated(&message).unwrap()).unwrap();
        assert_eq!(decoded.text, None);
        assert_eq!(decoded.audio, None);
    }

    #[test]
    fn test_every_truncation_fails_cleanly() {
        let encoded = encode_integrated(&sample()).unwrap();
        for len in 0..encoded.len() {
            assert!(
                decode_integrated(&encoded[..len]).is_err(),
                "truncated to {} bytes should not decode",
                len
            );
        }
    }

    #[test]
    fn test_declared_length_past_end() {
        let mut buf = vec![FRAME_TYPE_INTEGRATED];
        buf.extend_from_slice(&1000i32.to_le_bytes());
        buf.extend_from_slice(b"short");
        assert!(matches!(
            decode_integrated(&buf),
            Err(FrameError::Truncated { needed: 1000, .. })
        ));
    }

    #[test]
    fn test_negative_length() {
        let mut buf = vec![FRAME_TYPE_INTEGRATED];
        buf.extend_from_slice(&(-1i32).to_le_bytes());
        assert_eq!(
            decode_integrated(&buf),
            Err(FrameError::NegativeLength {
                field: "session id",
                length: -1
            })
        );
    }

    #[test]
    fn test_unsupported_frame_type() {
        let mut encoded = encode_integrated(&sample()).unwrap();
        encoded[0] = 0x01;
        assert_eq!(
            decode_integrated(&encoded),
            Err(FrameError::UnsupportedFrameType(0x01))
        );
    }
}
