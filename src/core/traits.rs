use crate::core::{errors::NetworkError, types::NetworkEvent};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Raw notification pushed by a transport into its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Error(String),
    Text(String),
    Binary(Vec<u8>),
}

/// Channel half a transport uses to report inbound units and link changes
pub type TransportEventSink = mpsc::UnboundedSender<TransportEvent>;

/// Byte-stream provider supplied from outside the core.
///
/// Inbound data and unsolicited link changes are reported through the sink
/// handed over on `connect`. The transport must keep using that sink until the
/// next `connect` call.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the link. Returns once the link is usable or has failed.
    async fn connect(&self, url: &str, events: TransportEventSink) -> Result<(), NetworkError>;

    /// Close the link. Closing an already closed link is not an error.
    async fn disconnect(&self) -> Result<(), NetworkError>;

    async fn send_text(&self, text: String) -> Result<(), NetworkError>;

    async fn send_binary(&self, data: Vec<u8>) -> Result<(), NetworkError>;

    fn is_connected(&self) -> bool;
}

/// Read-only view of the current session identifier
pub trait SessionSource: Send + Sync {
    fn current_session(&self) -> Option<String>;
}

/// Consumer of typed network events
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &NetworkEvent);

    /// A closed handler is removed from the dispatcher on the next dispatch
    fn is_closed(&self) -> bool {
        false
    }
}

impl<F> EventHandler for F
where
    F: Fn(&NetworkEvent) + Send + Sync,
{
    fn handle(&self, event: &NetworkEvent) {
        self(event);
    }
}
