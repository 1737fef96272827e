use crate::core::types::NetworkEvent;

/// Processor trait for decoding one wire encoding into typed events
///
/// This is the abstraction side of the processor bridge: the connection only
/// knows this trait and looks the active implementation up by encoding key,
/// so the encoding can be switched at runtime without the connection
/// depending on concrete parsers.
///
/// Text handed to `process_text` is always one complete frame (the connection
/// accumulates text before calling in). Binary input is handed over as
/// received; binary framing is self-delimiting.
pub trait MessageProcessor: Send + Sync + 'static {
    /// Registry key of this encoding, e.g. `"json"`
    fn encoding(&self) -> &'static str;

    /// Decode one complete text frame
    ///
    /// # Returns
    /// Events in the order they should be dispatched. Malformed or unknown
    /// frames yield an empty list, never an error.
    fn process_text(&self, frame: &str) -> Vec<NetworkEvent>;

    /// Decode one binary unit
    fn process_binary(&self, data: &[u8]) -> Vec<NetworkEvent>;

    /// Pull a session identifier out of a text frame without full decoding
    fn extract_session_id(&self, frame: &str) -> Option<String>;
}
