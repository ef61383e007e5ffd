use hearth_api::wiring::{Collaborators, Platform, PlatformSettings};
use hearth_api::{app, AppState};
use hearth_order::spawn_expiry_sweeper;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hearth_api=debug,hearth_dispatch=debug,hearth_order=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = hearth_store::Config::load()?;
    tracing::info!("Starting Hearth API on port {}", config.server.port);

    let collaborators = Collaborators::from_config(&config).await?;
    let platform = Platform::assemble(collaborators, PlatformSettings::from(&config));

    // Offer timers live in memory; pick up orders a previous run left waiting.
    if let Err(e) = platform.engine.recover().await {
        tracing::error!(error = %e, "Dispatch recovery failed");
    }

    let (orders, _worker) = platform.start_dispatch();
    let _sweeper = spawn_expiry_sweeper(orders.clone(), config.orders.sweep_interval());

    let app = app(AppState::new(orders));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
