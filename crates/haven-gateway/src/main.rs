use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;

mod app;
mod http;
mod rate_limit;
mod twiml;
mod ws;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "haven_gateway=info,tower_http=debug".into()),
        )
        .init();

    // config: explicit path via HAVEN_CONFIG, else ./haven.toml + env overrides.
    // A configured provider with a bad credential refuses to start here.
    let config_path = std::env::var("HAVEN_CONFIG").ok();
    let config = haven_core::config::HavenConfig::load(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("config: {e}"))?;

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config));
    state.spawn_background_tasks();
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("haven gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
