//! Spotify bearer-token acquisition with pool rotation and fallback.
//!
//! Tokens come from three tiers, tried strictly in order: a cached
//! self-issued token, a shared pool fetched from a remote JSON list and
//! validated by probing, and finally a fresh client-credentials exchange.
//! Pool tokens carry no TTL; they are trusted until a probe or a real call
//! rejects them.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;

const ACCOUNTS_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const PROBE_URL: &str = "https://api.spotify.com/v1/me";

/// Safety margin subtracted from the issuer-reported TTL.
const EXPIRY_MARGIN_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token pool fetch failed: {0}")]
    Pool(String),

    #[error("token issuance failed: {0}")]
    Issuer(String),

    #[error("token request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// A token minted by the issuer, with its advertised lifetime in seconds.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: u64,
}

/// Where tokens come from. Swapped for a fake in tests so rotation and
/// fallback logic run without the network.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetches the shared pool of externally-sourced tokens.
    async fn fetch_pool(&self) -> Result<Vec<String>, TokenError>;

    /// Cheap authenticated probe; `true` means the token currently works.
    async fn probe(&self, token: &str) -> bool;

    /// Client-credentials exchange for a fresh token.
    async fn issue(&self) -> Result<IssuedToken, TokenError>;
}

#[derive(Default)]
struct TokenState {
    cached: Option<CachedToken>,
    pool: Vec<String>,
    cursor: usize,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Hands out a currently-valid bearer token, hiding acquisition, rotation
/// and expiry from callers.
///
/// The whole state sits behind one async mutex, held across the fallback
/// tiers. That serializes acquisition, which is exactly what keeps two
/// callers from issuing redundant client-credential exchanges, and the
/// cache entry is only ever replaced whole.
pub struct TokenManager {
    source: Box<dyn TokenSource>,
    state: Mutex<TokenState>,
}

impl TokenManager {
    pub fn new(source: impl TokenSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            state: Mutex::new(TokenState::default()),
        }
    }

    /// Returns a bearer token believed to be valid right now.
    ///
    /// Tier order: cached self-issued token, pool scan from the rotation
    /// cursor, fresh issuance. Pool fetch failure degrades to an empty pool
    /// for this attempt; issuance failure is terminal and surfaces to the
    /// caller.
    pub async fn get_valid_token(&self) -> Result<String, TokenError> {
        let mut state = self.state.lock().await;

        if let Some(cached) = &state.cached {
            if cached.expires_at > Instant::now() {
                return Ok(cached.token.clone());
            }
        }

        if state.pool.is_empty() {
            match self.source.fetch_pool().await {
                Ok(pool) => {
                    state.pool = pool;
                    state.cursor = 0;
                }
                Err(err) => tracing::warn!(error = %err, "token pool unavailable"),
            }
        }

        // The cursor advances on every attempt, hit or miss, so load spreads
        // evenly across the pool over time.
        for _ in 0..state.pool.len() {
            let candidate = state.pool[state.cursor].clone();
            state.cursor = (state.cursor + 1) % state.pool.len();
            if self.source.probe(&candidate).await {
                return Ok(candidate);
            }
        }

        let issued = self.source.issue().await?;
        let ttl = issued.expires_in.saturating_sub(EXPIRY_MARGIN_SECS);
        state.cached = Some(CachedToken {
            token: issued.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });
        Ok(issued.access_token)
    }

    /// Drops the cached token if it is the one a downstream call just saw
    /// rejected. Pool tokens have nothing to drop; the cursor has already
    /// moved past them.
    pub async fn invalidate(&self, token: &str) {
        let mut state = self.state.lock().await;
        if state.cached.as_ref().is_some_and(|c| c.token == token) {
            state.cached = None;
        }
    }
}

/// Production [`TokenSource`] backed by the Spotify accounts service and a
/// remote pool list.
pub struct HttpTokenSource {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    pool_url: String,
}

impl HttpTokenSource {
    pub fn new(
        client: reqwest::Client,
        client_id: String,
        client_secret: String,
        pool_url: String,
    ) -> Self {
        Self {
            client,
            client_id,
            client_secret,
            pool_url,
        }
    }
}

#[derive(Deserialize)]
struct PoolFile {
    tokens: Vec<PoolEntry>,
}

#[derive(Deserialize)]
struct PoolEntry {
    access_token: String,
}

#[derive(Deserialize)]
struct IssuerResponse {
    access_token: String,
    expires_in: u64,
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch_pool(&self) -> Result<Vec<String>, TokenError> {
        let res = self.client.get(&self.pool_url).send().await?;
        if !res.status().is_success() {
            return Err(TokenError::Pool(format!("status {}", res.status())));
        }
        let file: PoolFile = res
            .json()
            .await
            .map_err(|e| TokenError::Pool(e.to_string()))?;
        Ok(file.tokens.into_iter().map(|t| t.access_token).collect())
    }

    async fn probe(&self, token: &str) -> bool {
        match self.client.get(PROBE_URL).bearer_auth(token).send().await {
            Ok(res) => res.status().is_success(),
            Err(err) => {
                tracing::warn!(error = %err, "token probe request failed");
                false
            }
        }
    }

    async fn issue(&self) -> Result<IssuedToken, TokenError> {
        let auth = STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));
        let res = self
            .client
            .post(ACCOUNTS_TOKEN_URL)
            .header("Authorization", format!("Basic {auth}"))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(TokenError::Issuer(format!("status {}", res.status())));
        }

        let body: IssuerResponse = res
            .json()
            .await
            .map_err(|e| TokenError::Issuer(e.to_string()))?;
        Ok(IssuedToken {
            access_token: body.access_token,
            expires_in: body.expires_in,
        })
    }
}
