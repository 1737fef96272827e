pub mod character;
pub mod chat;
pub mod server_config;

pub use character::CharacterApi;
pub use chat::ChatApi;
pub use server_config::ServerConfigLoader;
