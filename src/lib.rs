pub mod connection;
pub mod core;
pub mod processors;
pub mod services;

pub use connection::ChatConnection;
pub use crate::core::{
    config::NetworkConfig, dispatch::HandlerDispatcher, errors::NetworkError, traits::*, types::*,
};
pub use processors::ProcessorRegistry;
