use crate::core::errors::NetworkError;
use crate::core::kernel::MessageProcessor;
use crate::core::types::{
    ChatText, ConnectionStatus, NetworkEvent, StructuredMessage, SystemStatus,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

/// Processor for the textual `{"type": ..., ...}` encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredProcessor;

impl StructuredProcessor {
    pub const ENCODING: &'static str = "json";

    pub fn new() -> Self {
        Self
    }

    /// Decode one frame into a structured message
    ///
    /// Returns `None` for malformed frames and unknown types; both are logged.
    pub fn decode(&self, frame: &str) -> Option<StructuredMessage> {
        match self.parse(frame) {
            Ok(message) => Some(message),
            Err(e) => {
                warn!(error = %e, "Dropping structured frame");
                None
            }
        }
    }

    pub fn parse(&self, frame: &str) -> Result<StructuredMessage, NetworkError> {
        // Session assignment gates everything downstream: take the cheap path first
        if let Some(session_id) = self.scan_session_id(frame) {
            return Ok(StructuredMessage::SessionAssigned(session_id));
        }

        let value: Value = serde_json::from_str(frame)
            .map_err(|e| NetworkError::ProtocolDecode(format!("invalid JSON: {}", e)))?;

        let message_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| NetworkError::ProtocolDecode("missing type field".to_string()))?;

        match message_type.to_lowercase().as_str() {
            "session_id" | "session" => session_id_from_value(&value)
                .map(StructuredMessage::SessionAssigned)
                .ok_or_else(|| {
                    NetworkError::ProtocolDecode("session message carries no session id".to_string())
                }),
            "chat" => Ok(StructuredMessage::ChatText(payload(&value))),
            "system" => Ok(StructuredMessage::SystemStatus(payload::<SystemStatus>(&value))),
            "connection" => Ok(StructuredMessage::ConnectionStatus(
                payload::<ConnectionStatus>(&value),
            )),
            other => Err(NetworkError::ProtocolDecode(format!(
                "unknown message type '{}'",
                other
            ))),
        }
    }

    /// String scan for `"type":"session_id"` / `"type":"session"` frames that
    /// tolerates whitespace and key order. Only top-level keys count.
    fn scan_session_id(&self, frame: &str) -> Option<String> {
        let message_type = string_field(frame, "type")?;
        if !matches!(message_type.as_str(), "session_id" | "session") {
            return None;
        }
        string_field(frame, "session_id")
            .or_else(|| string_field(frame, "sessionId"))
            .filter(|id| !id.is_empty())
    }
}

impl MessageProcessor for StructuredProcessor {
    fn encoding(&self) -> &'static str {
        Self::ENCODING
    }

    fn process_text(&self, frame: &str) -> Vec<NetworkEvent> {
        debug!(length = frame.len(), "Processing structured frame");
        self.decode(frame)
            .map(NetworkEvent::from)
            .into_iter()
            .collect()
    }

    fn process_binary(&self, data: &[u8]) -> Vec<NetworkEvent> {
        warn!(
            length = data.len(),
            "Structured processor does not handle binary data, dropping"
        );
        Vec::new()
    }

    fn extract_session_id(&self, frame: &str) -> Option<String> {
        match self.parse(frame) {
            Ok(StructuredMessage::SessionAssigned(session_id)) => Some(session_id),
            _ => None,
        }
    }
}

/// Typed payload read from the top level, or from a nested `data` object
/// when one is present
fn payload<T: DeserializeOwned + Default>(value: &Value) -> T {
    let source = match value.get("data") {
        Some(data @ Value::Object(_)) => data,
        _ => value,
    };
    serde_json::from_value(source.clone()).unwrap_or_else(|e| {
        warn!(error = %e, "Malformed payload fields, using defaults");
        T::default()
    })
}

fn session_id_from_value(value: &Value) -> Option<String> {
    let lookup = |v: &Value| {
        v.get("session_id")
            .or_else(|| v.get("sessionId"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    lookup(value)
        .or_else(|| value.get("data").and_then(lookup))
        .filter(|id| !id.is_empty())
}

/// Find the top-level `"key"` whose value is a string literal, returning the
/// unescaped literal. Keys of nested objects are skipped. Only simple escapes
/// are honoured, which is enough for identifiers.
fn string_field(frame: &str, key: &str) -> Option<String> {
    let mut chars = frame.chars().peekable();
    let mut depth = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '{' | '[' => depth += 1,
            '}' | ']' => depth = depth.saturating_sub(1),
            '"' => {
                let literal = string_literal(&mut chars)?;
                if depth != 1 || literal != key {
                    continue;
                }
                while chars.next_if(|c| c.is_whitespace()).is_some() {}
                if chars.next_if_eq(&':').is_none() {
                    continue;
                }
                while chars.next_if(|c| c.is_whitespace()).is_some() {}
                if chars.next_if_eq(&'"').is_some() {
                    return string_literal(&mut chars);
                }
            }
            _ => {}
        }
    }
    None
}

/// Rest of a string literal whose opening quote was consumed
fn string_literal(chars: &mut impl Iterator<Item = char>) -> Option<String> {
    let mut value = String::new();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Some(value),
            '\\' => value.push(chars.next()?),
            c => value.push(c),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_fast_path() {
        let processor = StructuredProcessor::new();
        let events = processor.process_text(r#"{"session_id": "S1", "type" : "session_id"}"#);
        assert_eq!(events, vec![NetworkEvent::SessionAssigned("S1".to_string())]);
    }

    #[test]
    fn test_session_type_alias_nested() {
        let processor = StructuredProcessor::new();
        let frame = r#"{"type":"session","data":{"sessionId":"abc"}}"#;
        assert_eq!(
            processor.decode(frame),
            Some(StructuredMessage::SessionAssigned("abc".to_string()))
        );
        assert_eq!(processor.extract_session_id(frame), Some("abc".to_string()));
    }

    #[test]
    fn test_extract_session_id_ignores_other_types() {
        let processor = StructuredProcessor::new();
        assert_eq!(
            processor.extract_session_id(r#"{"type":"chat","session_id":"x"}"#),
            None
        );
    }

    #[test]
    fn test_chat_message() {
        let processor = StructuredProcessor::new();
        let frame = r#"{"type":"chat","sessionId":"S1","characterId":"c","userId":"u","message":"hello","actor":"bot","timestamp":42}"#;
        let events = processor.process_text(frame);
        assert_eq!(
            events,
            vec![NetworkEvent::Chat(ChatText {
                session_id: "S1".to_string(),
                character_id: "c".to_string(),
                user_id: "u".to_string(),
                message: "hello".to_string(),
                actor: "bot".to_string(),
                timestamp: 42,
            })]
        );
    }

    #[test]
    fn test_chat_nested_under_data() {
        let processor = StructuredProcessor::new();
        let events = processor.process_text(r#"{"type":"chat","data":{"message":"hi"}}"#);
        match events.as_slice() {
            [NetworkEvent::Chat(chat)] => assert_eq!(chat.message, "hi"),
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_system_and_connection() {
        let processor = StructuredProcessor::new();
        assert_eq!(
            processor.process_text(r#"{"type":"system","status":"ok","description":"ready"}"#),
            vec![NetworkEvent::System(SystemStatus {
                status: "ok".to_string(),
                description: "ready".to_string(),
            })]
        );
        assert_eq!(
            processor.process_text(r#"{"type":"CONNECTION","status":"error","reason":"x"}"#),
            vec![NetworkEvent::ConnectionStatus(ConnectionStatus {
                status: "error".to_string(),
                reason: "x".to_string(),
            })]
        );
    }

    #[test]
    fn test_unknown_and_malformed_are_dropped() {
        let processor = StructuredProcessor::new();
        assert!(processor.process_text(r#"{"type":"mystery"}"#).is_empty());
        assert!(processor.process_text(r#"{"no_type":true}"#).is_empty());
        assert!(processor.process_text("{not json").is_empty());
        assert!(processor.process_binary(&[1, 2, 3]).is_empty());
    }

    #[test]
    fn test_string_field_escapes() {
        assert_eq!(
            string_field(r#"{"a":"x\"y"}"#, "a"),
            Some("x\"y".to_string())
        );
        assert_eq!(string_field(r#"{"a":1,"b":"c"}"#, "a"), None);
        assert_eq!(string_field(r#"{"b":"a","a" : "x"}"#, "a"), Some("x".to_string()));
    }

    #[test]
    fn test_nested_session_fields_do_not_hijack_type() {
        let processor = StructuredProcessor::new();
        let frame = r#"{"data":{"type":"session","session_id":"X"},"type":"chat"}"#;
        assert!(matches!(
            processor.decode(frame),
            Some(StructuredMessage::ChatText(_))
        ));
        assert_eq!(processor.extract_session_id(frame), None);
    }

    #[test]
    fn test_parse_reports_decode_errors() {
        let processor = StructuredProcessor::new();
        for frame in ["{not json", r#"{"no_type":true}"#, r#"{"type":"mystery"}"#, r#"{"type":"session"}"#] {
            assert!(
                matches!(processor.parse(frame), Err(NetworkError::ProtocolDecode(_))),
                "{}",
                frame
            );
        }
    }
}
