//! Track download-link resolver.
//!
//! Thin proxy over a third-party resolver API with a short in-process
//! response cache, keyed by the Spotify track URL.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum DownloadError {
    /// The resolver answered but reported no usable link.
    #[error("Failed to fetch download link")]
    NoLink,

    #[error("download API error: {status}")]
    Api { status: u16 },

    #[error("download request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub struct DownloadClient {
    client: reqwest::Client,
    api_base: String,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
    body: Value,
    expires_at: Instant,
}

impl DownloadClient {
    pub fn new(client: reqwest::Client, api_base: String) -> Self {
        Self {
            client,
            api_base,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves a download link for a Spotify track URL, serving repeat
    /// lookups from cache for five minutes.
    pub async fn resolve(&self, spotify_url: &str) -> Result<Value, DownloadError> {
        if let Some(hit) = self.cache_get(spotify_url).await {
            return Ok(hit);
        }

        let url = format!("{}?url={}", self.api_base, urlencoding::encode(spotify_url));
        let res = self.client.get(&url).send().await?;

        if !res.status().is_success() {
            return Err(DownloadError::Api {
                status: res.status().as_u16(),
            });
        }

        let body: Value = res.json().await?;
        if body.get("success").and_then(Value::as_bool) != Some(true) {
            return Err(DownloadError::NoLink);
        }

        self.cache_put(spotify_url, body.clone()).await;
        Ok(body)
    }

    async fn cache_get(&self, key: &str) -> Option<Value> {
        let mut cache = self.cache.lock().await;
        match cache.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.body.clone()),
            Some(_) => {
                cache.remove(key);
                None
            }
            None => None,
        }
    }

    async fn cache_put(&self, key: &str, body: Value) {
        self.cache.lock().await.insert(
            key.to_string(),
            CacheEntry {
                body,
                expires_at: Instant::now() + CACHE_TTL,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> DownloadClient {
        DownloadClient::new(reqwest::Client::new(), "http://localhost/api".into())
    }

    #[tokio::test]
    async fn cache_round_trip() {
        let dl = client();
        let body = json!({ "success": true, "link": "https://cdn.example/track.mp3" });

        assert!(dl.cache_get("https://open.spotify.com/track/x").await.is_none());
        dl.cache_put("https://open.spotify.com/track/x", body.clone()).await;
        assert_eq!(
            dl.cache_get("https://open.spotify.com/track/x").await,
            Some(body),
        );
    }

    #[tokio::test]
    async fn expired_entries_are_evicted_on_lookup() {
        let dl = client();
        dl.cache.lock().await.insert(
            "stale".into(),
            CacheEntry {
                body: json!({ "success": true }),
                expires_at: Instant::now() - Duration::from_secs(1),
            },
        );

        assert!(dl.cache_get("stale").await.is_none());
        assert!(dl.cache.lock().await.is_empty());
    }
}
