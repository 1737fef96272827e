use crate::connection::ChatConnection;
use crate::core::config::ConfigError;
use crate::core::errors::NetworkError;
use crate::core::kernel::RestClient;
use crate::core::traits::Transport;
use crate::core::types::ServerProfile;
use tracing::{info, instrument, warn};

/// Endpoint advertising the server's capabilities
pub const CONFIG_ENDPOINT: &str = "config";

/// Loads the server profile and applies its message encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerConfigLoader;

impl ServerConfigLoader {
    #[instrument(skip(rest))]
    pub async fn load<R: RestClient>(rest: &R) -> Result<ServerProfile, NetworkError> {
        let profile: ServerProfile = rest.get_json(CONFIG_ENDPOINT).await?;
        info!(
            message_type = %profile.message_type,
            version = %profile.version,
            "Loaded server profile"
        );
        Ok(profile)
    }

    /// Only `json` and `binary` encodings are understood
    pub fn validate(profile: &ServerProfile) -> Result<(), ConfigError> {
        if profile.message_type.trim().is_empty() {
            return Err(ConfigError::InvalidConfiguration(
                "server profile has no message type".to_string(),
            ));
        }
        if !(profile.is_json() || profile.is_binary()) {
            return Err(ConfigError::InvalidConfiguration(format!(
                "unsupported message type: {}",
                profile.message_type
            )));
        }
        Ok(())
    }

    /// Switch the connection to the server's encoding
    ///
    /// Any failure keeps the encoding already configured. Returns the
    /// encoding in effect afterwards.
    pub async fn negotiate<R: RestClient, T: Transport>(
        connection: &ChatConnection<T>,
        rest: &R,
    ) -> &'static str {
        let profile = match Self::load(rest).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, encoding = connection.encoding(), "Server profile unavailable, keeping configured encoding");
                return connection.encoding();
            }
        };

        if let Err(e) = Self::validate(&profile) {
            warn!(error = %e, encoding = connection.encoding(), "Rejected server profile, keeping configured encoding");
            return connection.encoding();
        }

        let requested = profile.message_type.to_lowercase();
        if requested != connection.encoding() {
            warn!(
                configured = connection.encoding(),
                server = %requested,
                "Configured encoding differs from server, switching"
            );
        }
        connection.set_encoding(&requested)
    }
}
