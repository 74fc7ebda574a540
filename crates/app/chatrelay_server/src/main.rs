//! Chatrelay HTTP server binary.
//!
//! Loads configuration once from the environment (and `.env`), then serves
//! `/api/chat` until interrupted. The first Ctrl-C stops accepting requests
//! and drains in-flight ones; a second Ctrl-C abandons pending model calls.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chatrelay_core::config::Settings;
use chatrelay_core::pipeline::ChatPipeline;
use chatrelay_core::provider::build_provider;

/// CLI arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "chatrelay_server", about = "Chatrelay chat proxy server", version)]
struct Args {
    /// Address to listen on. Overrides `BIND_ADDR`.
    #[arg(long)]
    bind: Option<String>,

    /// Validate configuration and exit without serving.
    #[arg(long, default_value_t = false)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Credential rejections stay visible whatever RUST_LOG says.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,chatrelay_api=debug,chatrelay_core=debug"))
        .add_directive("security=warn".parse()?);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let args = Args::parse();

    let mut settings = Settings::from_env()?;
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }

    if settings.provider.api_key.is_none() {
        warn!(
            provider = ?settings.provider.kind,
            "provider credential not configured, chat requests will fail"
        );
    }
    if settings.api_keys.require_auth() && settings.api_keys.key_count() == 0 {
        warn!("authentication required but API_KEYS is empty, every chat request will be rejected");
    }

    if args.check_config {
        info!(?settings, "configuration valid");
        return Ok(());
    }

    let provider = build_provider(&settings.provider);
    let settings = Arc::new(settings);

    let shutdown = CancellationToken::new();
    let abandon = CancellationToken::new();
    tokio::spawn(watch_interrupts(shutdown.clone(), abandon.clone()));

    let state = chatrelay_api::AppState {
        pipeline: ChatPipeline::with_shutdown(settings.clone(), provider, abandon),
    };
    let app = chatrelay_api::router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    let local_addr = listener.local_addr()?;

    info!(
        addr = %local_addr,
        env = ?settings.env,
        provider = ?settings.provider.kind,
        model = %settings.model.model,
        auth_required = settings.api_keys.require_auth(),
        version = chatrelay_core::version(),
        "chatrelay listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("chatrelay stopped");
    Ok(())
}

async fn watch_interrupts(shutdown: CancellationToken, abandon: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        return;
    }
    info!("shutdown requested, draining in-flight requests");
    shutdown.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("second interrupt, abandoning in-flight model calls");
        abandon.cancel();
    }
}
