pub mod binary;
pub mod registry;
pub mod structured;

pub use binary::BinaryProcessor;
pub use registry::{ProcessorRegistry, DEFAULT_ENCODING};
pub use structured::StructuredProcessor;
