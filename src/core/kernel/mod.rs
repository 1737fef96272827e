//! ChatWire kernel - transport-level building blocks
//!
//! Everything in here is independent of the connection state machine and of
//! any particular wire message set:
//!
//! ## Framing
//! - `TextFrameAccumulator`: reassembles chunked JSON text into whole frames
//! - `frame`: the integrated text+audio binary frame
//!
//! ## Message Handling
//! - `MessageProcessor`: decodes one encoding into `NetworkEvent`s
//!
//! ## Transport Layer
//! - `TungsteniteTransport`: `Transport` over tokio-tungstenite
//! - `RestClient` / `RetryingClient`: request/response with linear retry,
//!   session injection, multipart uploads and cancellation
//!
//! # Example
//! ```rust,no_run
//! use chatwire::core::config::NetworkConfig;
//! use chatwire::core::kernel::*;
//! use chatwire::core::types::ServerProfile;
//!
//! # async fn example() -> Result<(), chatwire::NetworkError> {
//! let config = NetworkConfig::default();
//! let rest = RestClientBuilder::new(RestClientConfig::from_network(&config)).build()?;
//! let profile: ServerProfile = rest.get_json("config").await?;
//! # Ok(())
//! # }
//! ```
pub mod accumulator;
pub mod codec;
pub mod frame;
pub mod rest;
pub mod ws;

pub use accumulator::TextFrameAccumulator;
pub use codec::MessageProcessor;
pub use frame::FrameError;
pub use rest::{
    ApiRequest, FileUpload, RestClient, RestClientBuilder, RestClientConfig, RetryAttempt,
    RetryingClient,
};
pub use ws::{TungsteniteTransport, WsConfig};
