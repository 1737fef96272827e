use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::time::Duration;

/// Deployment environment selecting which server address is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::InvalidConfiguration(format!(
                "Unknown environment: {}",
                other
            ))),
        }
    }
}

/// HTTP request/response channel settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub api_path: String,
    pub api_version: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Additional attempts after the first one
    pub max_retry_count: u32,
    /// Linear retry base delay in milliseconds
    pub retry_delay_ms: u64,
    pub user_agent: String,
    pub content_type: String,
    /// Body field that carries the session identifier
    pub session_field: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            api_path: "api".to_string(),
            api_version: "v1".to_string(),
            timeout_ms: 30_000,
            max_retry_count: 3,
            retry_delay_ms: 1_000,
            user_agent: "ChatWire-Client/1.0".to_string(),
            content_type: "application/json".to_string(),
            session_field: "sessionId".to_string(),
        }
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Reconnection policy for the persistent socket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub auto_reconnect: bool,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            max_attempts: 3,
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
            exponential: true,
        }
    }
}

/// Persistent socket settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketSettings {
    pub ws_path: String,
    pub connect_timeout_ms: u64,
    pub reconnect: ReconnectPolicy,
    /// Interval of the connection monitor that revives a dropped link
    pub monitor_interval_ms: u64,
    /// Reserved, heartbeats are not sent yet
    pub heartbeat_interval_ms: u64,
    pub enable_heartbeat: bool,
    /// Upper bound for a single buffered text frame
    pub max_message_size: usize,
    /// Initially active processor key
    pub encoding: String,
}

impl Default for SocketSettings {
    fn default() -> Self {
        Self {
            ws_path: "ws".to_string(),
            connect_timeout_ms: 10_000,
            reconnect: ReconnectPolicy::default(),
            monitor_interval_ms: 30_000,
            heartbeat_interval_ms: 30_000,
            enable_heartbeat: true,
            max_message_size: 65_536,
            encoding: "json".to_string(),
        }
    }
}

impl SocketSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub environment: Environment,
    pub development_server: String,
    pub test_server: String,
    pub production_server: String,
    pub use_tls: bool,
    pub api: ApiSettings,
    pub socket: SocketSettings,
    pub auth_token: Option<Secret<String>>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            development_server: "localhost:7900".to_string(),
            test_server: "localhost:7900".to_string(),
            production_server: "localhost:7900".to_string(),
            use_tls: false,
            api: ApiSettings::default(),
            socket: SocketSettings::default(),
            auth_token: None,
        }
    }
}

// Custom Serialize implementation - never expose the auth token
impl Serialize for NetworkConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("NetworkConfig", 8)?;
        state.serialize_field("environment", &self.environment)?;
        state.serialize_field("development_server", &self.development_server)?;
        state.serialize_field("test_server", &self.test_server)?;
        state.serialize_field("production_server", &self.production_server)?;
        state.serialize_field("use_tls", &self.use_tls)?;
        state.serialize_field("api", &self.api)?;
        state.serialize_field("socket", &self.socket)?;
        state.serialize_field(
            "auth_token",
            &self.auth_token.as_ref().map(|_| "[REDACTED]"),
        )?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for NetworkConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(default)]
        struct NetworkConfigHelper {
            environment: Environment,
            development_server: String,
            test_server: String,
            production_server: String,
            use_tls: bool,
            api: ApiSettings,
            socket: SocketSettings,
            auth_token: Option<String>,
        }

        impl Default for NetworkConfigHelper {
            fn default() -> Self {
                let defaults = NetworkConfig::default();
                Self {
                    environment: defaults.environment,
                    development_server: defaults.development_server,
                    test_server: defaults.test_server,
                    production_server: defaults.production_server,
                    use_tls: defaults.use_tls,
                    api: defaults.api,
                    socket: defaults.socket,
                    auth_token: None,
                }
            }
        }

        let helper = NetworkConfigHelper::deserialize(deserializer)?;
        Ok(Self {
            environment: helper.environment,
            development_server: helper.development_server,
            test_server: helper.test_server,
            production_server: helper.production_server,
            use_tls: helper.use_tls,
            api: helper.api,
            socket: helper.socket,
            auth_token: helper.auth_token.filter(|t| !t.is_empty()).map(Secret::new),
        })
    }
}

impl NetworkConfig {
    /// Parse a configuration document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ConfigError::InvalidConfiguration(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall or busy-loop the connection
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero = [
            ("socket.monitor_interval_ms", self.socket.monitor_interval_ms == 0),
            ("socket.connect_timeout_ms", self.socket.connect_timeout_ms == 0),
            ("socket.max_message_size", self.socket.max_message_size == 0),
            ("socket.reconnect.base_delay_ms", self.socket.reconnect.base_delay_ms == 0),
            ("api.timeout_ms", self.api.timeout_ms == 0),
        ];
        if let Some((field, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::InvalidConfiguration(format!(
                "{} must be greater than zero",
                field
            )));
        }
        if self.socket.reconnect.base_delay_ms > self.socket.reconnect.max_delay_ms {
            return Err(ConfigError::InvalidConfiguration(format!(
                "socket.reconnect.base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.socket.reconnect.base_delay_ms, self.socket.reconnect.max_delay_ms
            )));
        }
        Ok(())
    }

    /// Create configuration from environment variables
    ///
    /// Recognised variables (all optional):
    /// - `{PREFIX}_ENVIRONMENT` (`development`, `test`, `production`)
    /// - `{PREFIX}_SERVER` (host:port, overrides the address of the selected environment)
    /// - `{PREFIX}_TLS` (`true` selects https/wss)
    /// - `{PREFIX}_AUTH_TOKEN`
    /// - `{PREFIX}_ENCODING` (`json` or `binary`)
    /// - `{PREFIX}_MAX_RETRIES`
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let var = |name: &str| env::var(format!("{}_{}", prefix, name)).ok();
        let mut config = Self::default();

        if let Some(environment) = var("ENVIRONMENT") {
            config.environment = environment.parse()?;
        }

        if let Some(server) = var("SERVER") {
            match config.environment {
                Environment::Development => config.development_server = server,
                Environment::Test => config.test_server = server,
                Environment::Production => config.production_server = server,
            }
        }

        config.use_tls = var("TLS")
            .map(|v| v.parse::<bool>().unwrap_or(false))
            .unwrap_or(false);

        config.auth_token = var("AUTH_TOKEN")
            .filter(|t| !t.is_empty())
            .map(Secret::new);

        if let Some(encoding) = var("ENCODING") {
            config.socket.encoding = encoding;
        }

        if let Some(retries) = var("MAX_RETRIES") {
            config.api.max_retry_count = retries.parse().map_err(|_| {
                ConfigError::InvalidConfiguration(format!(
                    "{}_MAX_RETRIES must be a non-negative integer, got '{}'",
                    prefix, retries
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from a .env file and environment variables
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    /// Create configuration from a specific .env file path
    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(_) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                // .env file doesn't exist, continue with system env vars
            }
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }

    /// Set the deployment environment
    #[must_use]
    pub const fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Set the bearer token used by the request client
    #[must_use]
    pub fn auth_token(mut self, token: String) -> Self {
        self.auth_token = Some(Secret::new(token));
        self
    }

    /// Get the auth token (use carefully - exposes secret)
    pub fn auth_token_str(&self) -> Option<&str> {
        self.auth_token.as_ref().map(|t| t.expose_secret().as_str())
    }

    /// host:port of the server for the current environment
    pub fn server_address(&self) -> &str {
        match self.environment {
            Environment::Development => &self.development_server,
            Environment::Test => &self.test_server,
            Environment::Production => &self.production_server,
        }
    }

    pub fn http_base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}", scheme, self.server_address())
    }

    pub fn websocket_base_url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        format!("{}://{}", scheme, self.server_address())
    }

    /// Full websocket endpoint, e.g. `ws://localhost:7900/ws`
    pub fn websocket_url(&self) -> String {
        join_url(&self.websocket_base_url(), &[&self.socket.ws_path])
    }

    pub fn websocket_url_with_session(&self, session_id: &str) -> String {
        format!("{}?sessionId={}", self.websocket_url(), session_id)
    }

    /// Prefix under which every API endpoint lives, e.g. `http://host/api/v1`
    pub fn api_base_url(&self) -> String {
        join_url(
            &self.http_base_url(),
            &[&self.api.api_path, &self.api.api_version],
        )
    }

    pub fn api_url(&self, endpoint: &str) -> String {
        join_url(&self.api_base_url(), &[endpoint])
    }
}

fn join_url(base: &str, segments: &[&str]) -> String {
    let mut url = base.trim_end_matches('/').to_string();
    for segment in segments {
        let segment = segment.trim_matches('/');
        if !segment.is_empty() {
            url.push('/');
            url.push_str(segment);
        }
    }
    url
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}
