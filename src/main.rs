use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tma_stats_gateway::config::{Config, BROWSER_USER_AGENT, OUTBOUND_TIMEOUT};
use tma_stats_gateway::download::DownloadClient;
use tma_stats_gateway::handlers::{router, AppState};
use tma_stats_gateway::lastfm::LastfmClient;
use tma_stats_gateway::spotify::SpotifyClient;
use tma_stats_gateway::store::MemoryUserStore;
use tma_stats_gateway::telegram::TelegramAuth;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let client = reqwest::Client::builder()
        .timeout(OUTBOUND_TIMEOUT)
        .user_agent(BROWSER_USER_AGENT)
        .build()?;

    let auth = TelegramAuth::new(
        &config.bot_token,
        &config.bot_id,
        &config.telegram_public_key,
    )?;
    let spotify = SpotifyClient::new(
        client.clone(),
        config.spotify_client_id,
        config.spotify_client_secret,
        config.token_pool_url,
    );
    let lastfm = LastfmClient::new(client.clone(), config.lastfm_api_key);
    let download = DownloadClient::new(client, config.download_api_base);

    let state = Arc::new(AppState {
        auth,
        spotify,
        lastfm,
        download,
        store: Arc::new(MemoryUserStore::new()),
    });

    let app = router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .await?;

    Ok(())
}
