use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use warelay::automation::whatsapp_web::WhatsAppWebClient;
use warelay::automation::{self, AutomationClient};
use warelay::session::SessionController;
use warelay::state::AppState;
use warelay::{config, routes};

#[derive(Parser)]
#[command(
    name = "warelay",
    about = "HTTP send relay over an automated WhatsApp Web session",
    version
)]
struct Cli {
    /// Path to TOML config file
    #[arg(short, long, default_value = "warelay.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging from RUST_LOG (default: info)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warelay=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    let session = Arc::new(SessionController::new());
    let automation: Arc<dyn AutomationClient> = Arc::new(WhatsAppWebClient::new(
        cfg.session_path.clone(),
        Duration::from_secs(cfg.send_timeout_secs),
    ));

    // Event pump is the single writer of session state; it must be draining
    // before the client starts emitting.
    let (events_tx, events_rx) = tokio::sync::mpsc::channel(16);
    automation::spawn_event_pump(session.clone(), events_rx);

    // Bootstrap failure is fatal: no retry here, the supervisor restarts us.
    automation
        .bootstrap(events_tx)
        .await
        .context("automation client failed to initialize")?;

    let state = AppState::new(cfg.clone(), session, automation);
    let app = routes::app(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid bind address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind TCP listener")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped.");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
    info!("Shutdown signal received, stopping server...");
}
