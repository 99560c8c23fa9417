//! Last.fm web-service client.
//!
//! All calls go through the `2.0/` endpoint with `format=json`. Last.fm
//! collapses single-element lists into bare objects, so everything that is
//! logically a list passes through [`ensure_array`]. Error code 6 means the
//! username does not exist and is surfaced as its own variant so the API
//! can answer 404 instead of a generic failure.

use serde_json::Value;
use thiserror::Error;

const WS_BASE: &str = "https://ws.audioscrobbler.com/2.0/";

/// Last.fm error code for "user not found".
const ERROR_INVALID_USER: i64 = 6;

#[derive(Debug, Error)]
pub enum LastfmError {
    #[error("Invalid Last.fm username")]
    UnknownUser,

    #[error("Last.fm API error: {status}")]
    Api { status: u16 },

    #[error("Last.fm request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub struct LastfmClient {
    client: reqwest::Client,
    api_key: String,
}

impl LastfmClient {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self { client, api_key }
    }

    async fn call(
        &self,
        method: &str,
        user: &str,
        extra: &[(&str, &str)],
    ) -> Result<Value, LastfmError> {
        let res = self
            .client
            .get(WS_BASE)
            .query(&[
                ("method", method),
                ("user", user),
                ("api_key", &self.api_key),
                ("format", "json"),
                ("limit", "10"),
            ])
            .query(extra)
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(LastfmError::Api {
                status: res.status().as_u16(),
            });
        }

        let body: Value = res.json().await?;
        if body.get("error").and_then(Value::as_i64) == Some(ERROR_INVALID_USER) {
            return Err(LastfmError::UnknownUser);
        }
        Ok(body)
    }

    /// user.getrecenttracks - `(now playing, the rest)`.
    ///
    /// The first entry of the recent list is whatever is scrobbling right
    /// now (or the latest finished track); the app treats it as the
    /// "current" track and the remainder as history.
    pub async fn recent_tracks(
        &self,
        user: &str,
    ) -> Result<(Option<Value>, Vec<Value>), LastfmError> {
        let body = self.call("user.getrecenttracks", user, &[]).await?;
        let mut tracks = ensure_array(body.pointer("/recenttracks/track"));
        if tracks.is_empty() {
            return Ok((None, Vec::new()));
        }
        let rest = tracks.split_off(1);
        Ok((tracks.pop(), rest))
    }

    /// user.getinfo.
    pub async fn user_info(&self, user: &str) -> Result<Value, LastfmError> {
        let body = self.call("user.getinfo", user, &[]).await?;
        Ok(body.get("user").cloned().unwrap_or(Value::Null))
    }

    /// user.gettoptracks for a period.
    pub async fn top_tracks(&self, user: &str, period: &str) -> Result<Vec<Value>, LastfmError> {
        let body = self
            .call("user.gettoptracks", user, &[("period", period)])
            .await?;
        Ok(ensure_array(body.pointer("/toptracks/track")))
    }

    /// user.gettopartists for a period.
    pub async fn top_artists(&self, user: &str, period: &str) -> Result<Vec<Value>, LastfmError> {
        let body = self
            .call("user.gettopartists", user, &[("period", period)])
            .await?;
        Ok(ensure_array(body.pointer("/topartists/artist")))
    }

    /// user.gettopalbums for a period.
    pub async fn top_albums(&self, user: &str, period: &str) -> Result<Vec<Value>, LastfmError> {
        let body = self
            .call("user.gettopalbums", user, &[("period", period)])
            .await?;
        Ok(ensure_array(body.pointer("/topalbums/album")))
    }
}

/// Normalizes Last.fm's object-or-array responses to an array.
fn ensure_array(value: Option<&Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(single) => vec![single.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ensure_array_passes_arrays_through() {
        let body = json!({ "toptracks": { "track": [{"name": "a"}, {"name": "b"}] } });
        assert_eq!(ensure_array(body.pointer("/toptracks/track")).len(), 2);
    }

    #[test]
    fn ensure_array_wraps_single_objects() {
        let body = json!({ "toptracks": { "track": {"name": "only"} } });
        let tracks = ensure_array(body.pointer("/toptracks/track"));
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0]["name"], "only");
    }

    #[test]
    fn ensure_array_handles_missing_and_null() {
        let body = json!({ "toptracks": {} });
        assert!(ensure_array(body.pointer("/toptracks/track")).is_empty());
        assert!(ensure_array(Some(&Value::Null)).is_empty());
        assert!(ensure_array(None).is_empty());
    }
}
