pub mod config;
pub mod dispatch;
pub mod errors;
pub mod kernel;
pub mod traits;
pub mod types;
