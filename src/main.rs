use anyhow::Context;
use chatwire::core::kernel::{RestClientBuilder, RestClientConfig, TungsteniteTransport, WsConfig};
use chatwire::services::ServerConfigLoader;
use chatwire::{ChatConnection, NetworkConfig, NetworkEvent};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = NetworkConfig::from_env("CHATWIRE").unwrap_or_else(|e| {
        warn!(error = %e, "Falling back to default configuration");
        NetworkConfig::default()
    });
    info!(
        environment = ?config.environment,
        websocket = %config.websocket_url(),
        api = %config.api_base_url(),
        "Starting chatwire"
    );

    let transport = TungsteniteTransport::new(WsConfig {
        connect_timeout: config.socket.connect_timeout(),
    });
    let connection = ChatConnection::new(transport, config.clone());

    let mut rest_builder = RestClientBuilder::new(RestClientConfig::from_network(&config))
        .with_session_source(connection.session_source());
    if let Some(token) = config.auth_token_str() {
        rest_builder = rest_builder.with_auth_token(token);
    }
    let rest = rest_builder.build().context("building request client")?;

    connection.on_event(|event: &NetworkEvent| match event {
        NetworkEvent::Chat(chat) => info!(actor = %chat.actor, "chat: {}", chat.message),
        NetworkEvent::Audio(audio) => info!(bytes = audio.len(), "audio received"),
        NetworkEvent::SessionAssigned(id) => info!(session_id = %id, "session assigned"),
        NetworkEvent::ReconnectExhausted { attempts } => {
            warn!(attempts, "giving up until the monitor retries");
        }
        other => info!(event = ?other, "network event"),
    });

    ServerConfigLoader::negotiate(&connection, &rest).await;
    connection.start_monitor();

    let cancel = CancellationToken::new();
    let opened = match std::env::var("CHATWIRE_SESSION") {
        Ok(session_id) if !session_id.is_empty() => {
            info!(%session_id, "Resuming session");
            connection.connect_with_session(&session_id, &cancel).await
        }
        _ => connection.connect(&cancel).await,
    };
    if let Err(e) = opened {
        warn!(error = %e, "Initial connect failed, reconnect policy takes over");
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    info!("Shutting down");
    rest.shutdown();
    connection.shutdown().await;
    Ok(())
}
