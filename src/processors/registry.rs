use crate::core::kernel::MessageProcessor;
use crate::processors::binary::BinaryProcessor;
use crate::processors::structured::StructuredProcessor;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Encoding key used whenever a lookup cannot be satisfied
pub const DEFAULT_ENCODING: &str = StructuredProcessor::ENCODING;

/// Case-insensitive map from encoding key to processor
pub struct ProcessorRegistry {
    processors: RwLock<HashMap<String, Arc<dyn MessageProcessor>>>,
    fallback: Arc<dyn MessageProcessor>,
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("encodings", &self.available())
            .finish_non_exhaustive()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProcessorRegistry {
    /// Registry holding only the structured fallback
    pub fn new() -> Self {
        let fallback: Arc<dyn MessageProcessor> = Arc::new(StructuredProcessor::new());
        let mut processors = HashMap::new();
        processors.insert(DEFAULT_ENCODING.to_string(), Arc::clone(&fallback));
        Self {
            processors: RwLock::new(processors),
            fallback,
        }
    }

    /// Registry with the `json` and `binary` processors
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(BinaryProcessor::new());
        registry
    }

    /// Register under the processor's own encoding key. Last write wins.
    pub fn register<P: MessageProcessor>(&self, processor: P) {
        let key = processor.encoding().to_string();
        self.register_as(&key, Arc::new(processor));
    }

    pub fn register_as(&self, key: &str, processor: Arc<dyn MessageProcessor>) {
        let key = key.trim().to_lowercase();
        let replaced = self
            .processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), processor)
            .is_some();
        if replaced {
            info!(encoding = %key, "Replaced message processor");
        } else {
            debug!(encoding = %key, "Registered message processor");
        }
    }

    /// Look up a processor, falling back to the structured processor for
    /// unknown or empty keys
    pub fn resolve(&self, key: &str) -> Arc<dyn MessageProcessor> {
        let normalized = key.trim().to_lowercase();
        if normalized.is_empty() {
            warn!("Empty encoding key, using {}", DEFAULT_ENCODING);
            return Arc::clone(&self.fallback);
        }

        let processors = self
            .processors
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(processor) = processors.get(&normalized) {
            Arc::clone(processor)
        } else {
            warn!(encoding = %key, "Unknown encoding, using {}", DEFAULT_ENCODING);
            Arc::clone(&self.fallback)
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key.trim().to_lowercase())
    }

    /// Registered keys, sorted
    pub fn available(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::NetworkEvent;

    struct EchoProcessor(&'static str);

    impl MessageProcessor for EchoProcessor {
        fn encoding(&self) -> &'static str {
            self.0
        }

        fn process_text(&self, frame: &str) -> Vec<NetworkEvent> {
            vec![NetworkEvent::Error(format!("{}:{}", self.0, frame))]
        }

        fn process_binary(&self, _data: &[u8]) -> Vec<NetworkEvent> {
            Vec::new()
        }

        fn extract_session_id(&self, _frame: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_defaults_and_case_insensitive_lookup() {
        let registry = ProcessorRegistry::with_defaults();
        assert_eq!(registry.available(), vec!["binary", "json"]);
        assert_eq!(registry.resolve("BINARY").encoding(), "binary");
        assert_eq!(registry.resolve(" Json ").encoding(), "json");
        assert!(registry.contains("Binary"));
    }

    #[test]
    fn test_unknown_and_empty_fall_back_to_json() {
        let registry = ProcessorRegistry::with_defaults();
        assert_eq!(registry.resolve("protobuf").encoding(), "json");
        assert_eq!(registry.resolve("").encoding(), "json");
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = ProcessorRegistry::with_defaults();
        registry.register_as("custom", Arc::new(EchoProcessor("first")));
        registry.register_as("CUSTOM", Arc::new(EchoProcessor("second")));
        let events = registry.resolve("custom").process_text("x");
        assert_eq!(events, vec![NetworkEvent::Error("second:x".to_string())]);
    }
}
