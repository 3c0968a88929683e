use anyhow::{bail, Result};
use chatrelay::config::{load_config, validate_config, RuntimeConfig};
use chatrelay::connector::ConnectorRegistry;
use chatrelay::event::StreamingEvent;
use chatrelay::runtime::Runtime;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatrelay=info".into()),
        )
        .init();

    info!("chatrelay starting...");

    // Config path: first argument, then CHATRELAY_CONFIG
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CHATRELAY_CONFIG").ok());

    let config = match &config_path {
        Some(path) => {
            info!(path = %path, "Loading configuration");
            load_config(path)?
        }
        None => {
            info!("No config file given, using defaults");
            RuntimeConfig::default()
        }
    }
    .with_env_overrides();

    let registry = ConnectorRegistry::with_builtins(Vec::new())?;
    let validation = validate_config(&config.to_value(), &registry);
    if !validation.ok {
        for problem in &validation.errors {
            error!("Invalid configuration: {}", problem);
        }
        bail!("configuration has {} error(s)", validation.errors.len());
    }

    let runtime = Runtime::new(registry);

    let status_log = runtime.on_status(|status| {
        info!(
            state = ?status.connector_state,
            room_id = ?status.room_id,
            chats = status.total_chat_count,
            gifts = status.total_gift_count,
            ws_running = status.ws_running,
            ws_clients = status.ws_client_count,
            last_error = %status.last_error,
            "Status"
        );
    });
    let event_log = runtime.on_event(|event| match event {
        StreamingEvent::Chat(chat) => {
            info!(platform = %chat.platform, author = %chat.author.resolve_name(), "{}", chat.message)
        }
        StreamingEvent::Gift(gift) => {
            info!(platform = %gift.platform, author = %gift.author.resolve_name(), "{}", gift.rendered_text)
        }
        StreamingEvent::Lifecycle(lifecycle) => {
            info!(state = ?lifecycle.state, reason = ?lifecycle.reason, "Lifecycle")
        }
        StreamingEvent::Error(e) => warn!(fatal = e.fatal, "Connector error: {}", e.message),
    });

    if let Err(e) = runtime.start(validation.config.to_value()).await {
        // Keep running: the runtime retries on its own when allowed
        warn!(error = %e, "Initial connect failed");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    let final_status = runtime.stop().await;
    status_log.unsubscribe();
    event_log.unsubscribe();
    info!(
        chats = final_status.total_chat_count,
        gifts = final_status.total_gift_count,
        "chatrelay stopped"
    );

    Ok(())
}
