//! Mediarr server entry point

use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediarr::{AppState, Config, build_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediarr=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        movie_roots = config.movie_folders.len(),
        tv_roots = config.tv_folders.len(),
        data_path = %config.data_path.display(),
        tmdb = config.tmdb_api_key.is_some(),
        slack = config.slack_webhook_url.is_some(),
        "Configuration loaded"
    );

    let port = config.port;
    let state = AppState::from_config(config);
    let app = build_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
