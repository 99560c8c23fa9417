use std::env;
use std::time::Duration;

/// Telegram's production Ed25519 public key for Mini App signatures.
pub const DEFAULT_TELEGRAM_PUBLIC_KEY: &str =
    "e7bf03a2fa4602af4580703d88dda5bb59f32ed8b02a56c187fe7d34caed242d";

const DEFAULT_TOKEN_POOL_URL: &str =
    "https://raw.githubusercontent.com/itzzzme/spotify-key/refs/heads/main/token.json";

const DEFAULT_DOWNLOAD_API_BASE: &str =
    "https://universaldownloaderapi.vercel.app/api/spotify/download";

/// Timeout applied to every outbound HTTP call. The upstream APIs have no
/// contractual latency bound, so the gateway enforces its own.
pub const OUTBOUND_TIMEOUT: Duration = Duration::from_secs(10);

/// The token pool host rejects non-browser user agents.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.5993.90 Safari/537.36";

/// Application configuration from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bot_token: String,
    pub bot_id: String,
    pub telegram_public_key: String,
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    pub lastfm_api_key: String,
    pub token_pool_url: String,
    pub download_api_base: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8081);

        let bot_token =
            env::var("BOT_TOKEN").map_err(|_| anyhow::anyhow!("BOT_TOKEN is required"))?;

        let bot_id = env::var("BOT_ID").map_err(|_| anyhow::anyhow!("BOT_ID is required"))?;

        let telegram_public_key = env::var("TELEGRAM_PUBLIC_KEY")
            .unwrap_or_else(|_| DEFAULT_TELEGRAM_PUBLIC_KEY.into());

        let spotify_client_id = env::var("SPOTIFY_CLIENT_ID")
            .map_err(|_| anyhow::anyhow!("SPOTIFY_CLIENT_ID is required"))?;

        let spotify_client_secret = env::var("SPOTIFY_CLIENT_SECRET")
            .map_err(|_| anyhow::anyhow!("SPOTIFY_CLIENT_SECRET is required"))?;

        let lastfm_api_key = env::var("LASTFM_API_KEY")
            .map_err(|_| anyhow::anyhow!("LASTFM_API_KEY is required"))?;

        let token_pool_url =
            env::var("TOKEN_POOL_URL").unwrap_or_else(|_| DEFAULT_TOKEN_POOL_URL.into());

        let download_api_base =
            env::var("DOWNLOAD_API_BASE").unwrap_or_else(|_| DEFAULT_DOWNLOAD_API_BASE.into());

        Ok(Self {
            port,
            bot_token,
            bot_id,
            telegram_public_key,
            spotify_client_id,
            spotify_client_secret,
            lastfm_api_key,
            token_pool_url,
            download_api_base,
        })
    }
}
