use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Lifecycle of the single logical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Reconnecting => write!(f, "Reconnecting"),
        }
    }
}

/// Chat line, either decoded from the text encoding or synthesised from an
/// integrated binary frame
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatText {
    pub session_id: String,
    pub character_id: String,
    pub user_id: String,
    pub message: String,
    pub actor: String,
    /// Unix milliseconds
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemStatus {
    pub status: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionStatus {
    /// "connected", "disconnected" or "error"
    pub status: String,
    pub reason: String,
}

/// Decoded textual frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuredMessage {
    SessionAssigned(String),
    ChatText(ChatText),
    SystemStatus(SystemStatus),
    ConnectionStatus(ConnectionStatus),
}

/// Decoded binary frame carrying text and/or audio
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IntegratedMessage {
    pub session_id: String,
    pub text: Option<String>,
    pub audio: Option<Vec<u8>>,
    /// Seconds
    pub audio_duration: f32,
}

impl IntegratedMessage {
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.is_empty())
    }

    pub fn has_audio(&self) -> bool {
        self.audio.as_deref().is_some_and(|a| !a.is_empty())
    }
}

impl fmt::Display for IntegratedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IntegratedMessage[session: {}, text: {} chars, audio: {} bytes, duration: {:.2}s]",
            self.session_id,
            self.text.as_deref().map_or(0, str::len),
            self.audio.as_deref().map_or(0, <[u8]>::len),
            self.audio_duration
        )
    }
}

/// Typed event delivered to registered handlers
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    Connected,
    Disconnected,
    /// Non-fatal error surfaced from the transport or connect path
    Error(String),
    SessionAssigned(String),
    SessionEnded(String),
    Chat(ChatText),
    System(SystemStatus),
    ConnectionStatus(ConnectionStatus),
    Integrated(IntegratedMessage),
    Audio(Vec<u8>),
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
    },
    /// Reconnect attempts are used up; a manual connect is still possible
    ReconnectExhausted {
        attempts: u32,
    },
}

impl From<StructuredMessage> for NetworkEvent {
    fn from(message: StructuredMessage) -> Self {
        match message {
            StructuredMessage::SessionAssigned(id) => Self::SessionAssigned(id),
            StructuredMessage::ChatText(chat) => Self::Chat(chat),
            StructuredMessage::SystemStatus(status) => Self::System(status),
            StructuredMessage::ConnectionStatus(status) => Self::ConnectionStatus(status),
        }
    }
}

/// Outbound `{"type": ..., "data": ...}` envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundChat {
    pub message: String,
    pub session_id: Option<String>,
    pub timestamp: i64,
}

/// Body of the `chat` request endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(rename = "sessionId", default)]
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub message: String,
    pub action: String,
    pub character_id: String,
    pub user_id: String,
}

impl ChatRequest {
    pub fn new(message: String, character_id: String, user_id: String) -> Self {
        Self {
            session_id: String::new(),
            actor: None,
            message,
            action: "chat".to_string(),
            character_id,
            user_id,
        }
    }

    #[must_use]
    pub fn with_session(mut self, session_id: String) -> Self {
        self.session_id = session_id;
        self
    }

    #[must_use]
    pub fn with_actor(mut self, actor: String) -> Self {
        self.actor = Some(actor);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// Character record as returned by the `character` endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CharacterInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub role: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCharacterRequest {
    pub name: String,
    pub description: String,
    pub role: String,
    pub is_active: bool,
}

impl CreateCharacterRequest {
    /// New characters start active
    pub fn new(name: String, description: String, role: String) -> Self {
        Self {
            name,
            description,
            role,
            is_active: true,
        }
    }
}

/// Partial update, unset fields are left out of the body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCharacterRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// Server capabilities advertised by the `config` endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerProfile {
    /// "json" or "binary"
    pub message_type: String,
    pub version: String,
    pub supports_audio: bool,
    pub supports_binary: bool,
    pub audio_format: String,
    pub max_message_size: u32,
}

impl ServerProfile {
    pub fn is_json(&self) -> bool {
        self.message_type.eq_ignore_ascii_case("json")
    }

    pub fn is_binary(&self) -> bool {
        self.message_type.eq_ignore_ascii_case("binary")
    }
}
