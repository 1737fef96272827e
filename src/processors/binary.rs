use crate::core::kernel::frame::decode_integrated;
use crate::core::kernel::MessageProcessor;
use crate::core::types::{ChatText, IntegratedMessage, NetworkEvent};
use crate::processors::structured::StructuredProcessor;
use tracing::{debug, warn};

/// Processor for the integrated text+audio binary encoding
///
/// Text frames on a binary-encoded connection carry control messages only,
/// so they go through an embedded structured processor.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryProcessor {
    control: StructuredProcessor,
}

impl BinaryProcessor {
    pub const ENCODING: &'static str = "binary";

    pub fn new() -> Self {
        Self::default()
    }

    fn expand(message: IntegratedMessage) -> Vec<NetworkEvent> {
        let mut events = Vec::with_capacity(3);

        let chat = message.has_text().then(|| ChatText {
            session_id: message.session_id.clone(),
            message: message.text.clone().unwrap_or_default(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            ..ChatText::default()
        });
        let audio = if message.has_audio() {
            message.audio.clone()
        } else {
            None
        };

        events.push(NetworkEvent::Integrated(message));
        if let Some(chat) = chat {
            events.push(NetworkEvent::Chat(chat));
        }
        if let Some(audio) = audio {
            events.push(NetworkEvent::Audio(audio));
        }
        events
    }
}

impl MessageProcessor for BinaryProcessor {
    fn encoding(&self) -> &'static str {
        Self::ENCODING
    }

    fn process_text(&self, frame: &str) -> Vec<NetworkEvent> {
        self.control.process_text(frame)
    }

    fn process_binary(&self, data: &[u8]) -> Vec<NetworkEvent> {
        if data.is_empty() {
            return Vec::new();
        }

        match decode_integrated(data) {
            Ok(message) => {
                debug!(%message, "Decoded integrated frame");
                Self::expand(message)
            }
            Err(e) => {
                // Some sources send bare audio without framing
                warn!(error = %e, length = data.len(), "Not an integrated frame, treating as raw audio");
                vec![NetworkEvent::Audio(data.to_vec())]
            }
        }
    }

    fn extract_session_id(&self, frame: &str) -> Option<String> {
        self.control.extract_session_id(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::frame::encode_integrated;

    fn frame(text: Option<&str>, audio: Option<Vec<u8>>) -> Vec<u8> {
        encode_integrated(&IntegratedMessage {
            session_id: "abc".to_string(),
            text: text.map(str::to_string),
            audio,
            audio_duration: 1.5,
        })
        .unwrap()
    }

    #[test]
    fn test_text_and_audio_fan_out() {
        let events = BinaryProcessor::new().process_binary(&frame(Some("hi"), Some(vec![1, 2, 3])));
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], NetworkEvent::Integrated(m) if m.session_id == "abc"));
        assert!(
            matches!(&events[1], NetworkEvent::Chat(c) if c.message == "hi" && c.session_id == "abc")
        );
        assert_eq!(events[2], NetworkEvent::Audio(vec![1, 2, 3]));
    }

    #[test]
    fn test_audio_only_frame() {
        let events = BinaryProcessor::new().process_binary(&frame(None, Some(vec![9])));
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], NetworkEvent::Integrated(_)));
        assert_eq!(events[1], NetworkEvent::Audio(vec![9]));
    }

    #[test]
    fn test_text_only_frame() {
        let events = BinaryProcessor::new().process_binary(&frame(Some("only text"), None));
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], NetworkEvent::Chat(c) if c.message == "only text"));
    }

    #[test]
    fn test_unparseable_falls_back_to_raw_audio() {
        let raw = vec![0xff, 0xfe, 0x00, 0x01, 0x02, 0x03];
        let events = BinaryProcessor::new().process_binary(&raw);
        assert_eq!(events, vec![NetworkEvent::Audio(raw)]);

        let short = vec![0x03, 0x01];
        assert_eq!(
            BinaryProcessor::new().process_binary(&short),
            vec![NetworkEvent::Audio(short)]
        );
    }

    #[test]
    fn test_text_frames_use_control_processor() {
        let processor = BinaryProcessor::new();
        assert_eq!(
            processor.process_text(r#"{"type":"session_id","session_id":"S9"}"#),
            vec![NetworkEvent::SessionAssigned("S9".to_string())]
        );
    }
}
