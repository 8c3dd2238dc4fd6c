mod args;
mod doctor;
mod login;

use std::sync::Arc;

use args::{Args, Command};
use clap::Parser;
use gateway_auth::CredentialStore;
use gateway_llm::{GatewayState, Registry, gateway_router};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args = Args::parse();
    match args.command {
        Command::Serve { port } => serve(port).await,
        Command::Login { provider } => login::run(&provider).await,
        Command::Doctor {
            port,
            provider,
            endpoint,
            verbose,
        } => {
            let code = doctor::run(port, provider.as_deref(), endpoint, verbose).await;
            std::process::exit(code);
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn serve(port: u16) -> anyhow::Result<()> {
    let store = Arc::new(CredentialStore::load_default());
    let registry = Arc::new(Registry::new(store));
    let app = gateway_router(GatewayState::new(registry));

    // The gateway trusts its listener; loopback only
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!(port, "gateway listening on 127.0.0.1");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await?;

    tracing::info!("gateway stopped");
    Ok(())
}

/// Wait for `SIGINT` or `SIGTERM`
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
