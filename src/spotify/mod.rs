//! Spotify Web API client.
//!
//! Listening-stats endpoints are proxied as-is; response bodies are carried
//! as `serde_json::Value` since the gateway does not reshape them. Token
//! acquisition lives in [`token`]; this module adds the bounded retry-on-401
//! contract on top.

pub mod token;

use serde_json::Value;
use thiserror::Error;

use self::token::{HttpTokenSource, TokenError, TokenManager};

const API_BASE: &str = "https://api.spotify.com/v1";

#[derive(Debug, Error)]
pub enum SpotifyError {
    #[error("Spotify API error: {status}")]
    Api { status: u16 },

    #[error("Spotify request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// How many times a single logical call may hit the API. Two attempts
/// models "token expired mid-flight": one retry with a fresh token, never
/// a loop.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 2 }
    }
}

/// Spotify API client with managed bearer tokens.
pub struct SpotifyClient {
    client: reqwest::Client,
    tokens: TokenManager,
    retry: RetryPolicy,
}

impl SpotifyClient {
    pub fn new(
        client: reqwest::Client,
        client_id: String,
        client_secret: String,
        pool_url: String,
    ) -> Self {
        let source = HttpTokenSource::new(client.clone(), client_id, client_secret, pool_url);
        Self {
            client,
            tokens: TokenManager::new(source),
            retry: RetryPolicy::default(),
        }
    }

    /// A bearer token usable right now, for handlers that hand the token
    /// back to the caller rather than spending it themselves.
    pub async fn valid_token(&self) -> Result<String, TokenError> {
        self.tokens.get_valid_token().await
    }

    /// GET against the API with a caller-supplied token or a managed one.
    ///
    /// A 401 invalidates the managed token and retries once per
    /// [`RetryPolicy`]; a rejected caller-supplied token falls back to a
    /// managed token for the retry.
    async fn fetch(&self, path: &str, caller_token: Option<&str>) -> Result<Value, SpotifyError> {
        let mut caller_token = caller_token.map(str::to_owned);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let token = match &caller_token {
                Some(t) => t.clone(),
                None => self.tokens.get_valid_token().await?,
            };

            let res = self
                .client
                .get(format!("{API_BASE}{path}"))
                .bearer_auth(&token)
                .send()
                .await?;

            if res.status() == reqwest::StatusCode::UNAUTHORIZED
                && attempt < self.retry.max_attempts
            {
                tracing::debug!(path, "bearer token rejected, retrying with a fresh one");
                self.tokens.invalidate(&token).await;
                caller_token = None;
                continue;
            }

            if !res.status().is_success() {
                return Err(SpotifyError::Api {
                    status: res.status().as_u16(),
                });
            }

            return Ok(res.json().await?);
        }
    }

    /// GET /me - the profile behind the token.
    pub async fn user_profile(&self, token: Option<&str>) -> Result<Value, SpotifyError> {
        self.fetch("/me", token).await
    }

    /// GET /me/player/currently-playing - the item now playing, if any.
    ///
    /// Nothing playing (a 204, which has no JSON body) or an upstream
    /// hiccup degrades to `None` rather than failing the whole response.
    pub async fn currently_playing(
        &self,
        token: Option<&str>,
    ) -> Result<Option<Value>, SpotifyError> {
        match self.fetch("/me/player/currently-playing", token).await {
            Ok(body) => Ok(body.get("item").cloned().filter(|item| !item.is_null())),
            Err(err) => {
                tracing::debug!(error = %err, "currently-playing unavailable");
                Ok(None)
            }
        }
    }

    /// GET /me/player/recently-played.
    pub async fn recently_played(
        &self,
        token: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Value>, SpotifyError> {
        let body = self
            .fetch(&format!("/me/player/recently-played?limit={limit}"), token)
            .await?;
        Ok(items(body))
    }

    /// GET /me/top/tracks for a Spotify time range.
    pub async fn top_tracks(
        &self,
        token: Option<&str>,
        time_range: &str,
    ) -> Result<Vec<Value>, SpotifyError> {
        let body = self
            .fetch(
                &format!("/me/top/tracks?time_range={time_range}&limit=10"),
                token,
            )
            .await?;
        Ok(items(body))
    }

    /// GET /me/top/artists for a Spotify time range.
    pub async fn top_artists(
        &self,
        token: Option<&str>,
        time_range: &str,
    ) -> Result<Vec<Value>, SpotifyError> {
        let body = self
            .fetch(
                &format!("/me/top/artists?time_range={time_range}&limit=10"),
                token,
            )
            .await?;
        Ok(items(body))
    }

    /// GET /me/playlists.
    pub async fn playlists(&self, token: Option<&str>) -> Result<Vec<Value>, SpotifyError> {
        let body = self.fetch("/me/playlists?limit=20", token).await?;
        Ok(items(body))
    }

    /// GET /me/albums - the user's saved albums.
    pub async fn saved_albums(&self, token: Option<&str>) -> Result<Vec<Value>, SpotifyError> {
        let body = self.fetch("/me/albums?limit=20", token).await?;
        Ok(items(body))
    }

    /// GET /playlists/{id} plus its first 50 tracks, merged into one object.
    pub async fn playlist_details(
        &self,
        token: Option<&str>,
        playlist_id: &str,
    ) -> Result<Value, SpotifyError> {
        let mut playlist = self
            .fetch(&format!("/playlists/{playlist_id}"), token)
            .await?;
        let tracks = self
            .fetch(&format!("/playlists/{playlist_id}/tracks?limit=50"), token)
            .await?;
        if let Some(obj) = playlist.as_object_mut() {
            obj.insert("tracks".into(), Value::Array(items(tracks)));
        }
        Ok(playlist)
    }

    /// GET /albums/{id}.
    pub async fn album_details(
        &self,
        token: Option<&str>,
        album_id: &str,
    ) -> Result<Value, SpotifyError> {
        self.fetch(&format!("/albums/{album_id}"), token).await
    }
}

/// Pulls the `items` array out of a paging envelope, tolerating absence.
fn items(body: Value) -> Vec<Value> {
    match body.get("items") {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}
