//! HTTP handlers for the stats gateway.
//!
//! Every endpoint verifies Telegram authenticity first; only then does it
//! touch an upstream API or the user store. Request and response shapes
//! mirror what the Mini App client already speaks, camelCase keys included.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::download::DownloadClient;
use crate::error::AppError;
use crate::lastfm::LastfmClient;
use crate::spotify::SpotifyClient;
use crate::store::UserStore;
use crate::telegram::TelegramAuth;

/// Shared application state.
pub struct AppState {
    pub auth: TelegramAuth,
    pub spotify: SpotifyClient,
    pub lastfm: LastfmClient,
    pub download: DownloadClient,
    pub store: Arc<dyn UserStore>,
}

const ALLOWED_PERIODS: [&str; 6] = ["overall", "7day", "1month", "3month", "6month", "12month"];

/// Maps a Last.fm-style period onto Spotify's three time ranges.
fn spotify_time_range(period: &str) -> &'static str {
    match period {
        "7day" | "1month" => "short_term",
        "3month" | "6month" => "medium_term",
        // overall, 12month
        _ => "long_term",
    }
}

fn invalid_period() -> AppError {
    AppError::BadRequest(format!(
        "Period must be one of {}",
        ALLOWED_PERIODS.join(", "),
    ))
}

/// Body of the `initData`-authenticated endpoints.
#[derive(Debug, Deserialize)]
pub struct InitDataRequest {
    #[serde(rename = "initData")]
    init_data: Option<String>,
}

/// Body of the signed-query endpoints. Last.fm and Spotify share the
/// shape; each handler validates the fields it needs.
#[derive(Debug, Deserialize)]
pub struct SignedStatsRequest {
    query_string: Option<BTreeMap<String, String>>,
    signature: Option<String>,
    username: Option<String>,
    access_token: Option<String>,
    period: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "playlistId")]
    playlist_id: Option<String>,
    #[serde(rename = "albumId")]
    album_id: Option<String>,
}

fn verify_signed(state: &AppState, req: &SignedStatsRequest) -> Result<(), AppError> {
    let (query, signature) = match (&req.query_string, &req.signature) {
        (Some(query), Some(signature)) => (query, signature),
        _ => return Err(AppError::BadRequest("Missing required fields".into())),
    };
    state.auth.verify_signed_query(query, signature)?;
    Ok(())
}

/// GET /health - Health check.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// POST /api/validlastfm - Verify `initData` and return the saved Last.fm
/// profile for the embedded Telegram user.
pub async fn valid_lastfm(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitDataRequest>,
) -> Result<Json<Value>, AppError> {
    let init_data = req
        .init_data
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("Missing initData".into()))?;
    let data = state.auth.verify_init_data(init_data)?;

    let username = state
        .store
        .lastfm_username(data.user.id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound("User not found or Last.fm username not set".into())
        })?;

    Ok(Json(json!({
        "message": "Data is valid and originated from Telegram.",
        "user": { "user_id": data.user.id, "lastfm_username": username },
        "allData": data.fields,
    })))
}

/// POST /api/validspotify - Verify `initData` and hand back a currently
/// valid Spotify bearer token.
pub async fn valid_spotify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InitDataRequest>,
) -> Result<Json<Value>, AppError> {
    let init_data = req
        .init_data
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("Missing initData".into()))?;
    let data = state.auth.verify_init_data(init_data)?;

    let spotify_token = state.spotify.valid_token().await?;

    Ok(Json(json!({
        "message": "Data is valid and originated from Telegram.",
        "allData": data.fields,
        "spotifyToken": spotify_token,
    })))
}

/// POST /api/lastfm - Verified proxy to the Last.fm stats endpoints.
pub async fn lastfm_stats(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignedStatsRequest>,
) -> Result<Json<Value>, AppError> {
    verify_signed(&state, &req)?;

    let username = req
        .username
        .as_deref()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| AppError::BadRequest("Username is required".into()))?;

    // No selector: the default dashboard view.
    if req.kind.is_none() && req.period.is_none() {
        let (user_info, (current, recent)) = tokio::try_join!(
            state.lastfm.user_info(username),
            state.lastfm.recent_tracks(username),
        )?;
        return Ok(Json(json!({
            "currentTrack": current,
            "recentTracks": recent,
            "userInfo": user_info,
        })));
    }

    let kind = req.kind.as_deref().unwrap_or_default();
    if !["topTracks", "topArtists", "topAlbums"].contains(&kind) {
        return Err(AppError::BadRequest(
            "Type must be one of \"topTracks\", \"topArtists\", or \"topAlbums\"".into(),
        ));
    }

    let period = req.period.as_deref().unwrap_or_default();
    if !ALLOWED_PERIODS.contains(&period) {
        return Err(invalid_period());
    }

    let body = match kind {
        "topTracks" => json!({ "topTracks": state.lastfm.top_tracks(username, period).await? }),
        "topArtists" => json!({ "topArtists": state.lastfm.top_artists(username, period).await? }),
        _ => json!({ "topAlbums": state.lastfm.top_albums(username, period).await? }),
    };
    Ok(Json(body))
}

/// POST /api/spotify - Verified proxy to the Spotify stats endpoints.
pub async fn spotify_stats(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignedStatsRequest>,
) -> Result<Json<Value>, AppError> {
    verify_signed(&state, &req)?;

    let token = req.access_token.as_deref();

    if req.kind.is_none() && req.playlist_id.is_none() && req.album_id.is_none() {
        let (profile, current, recent) = tokio::try_join!(
            state.spotify.user_profile(token),
            state.spotify.currently_playing(token),
            state.spotify.recently_played(token, 10),
        )?;
        return Ok(Json(json!({
            "currentTrack": current,
            "recentTracks": recent,
            "userProfile": profile,
        })));
    }

    if let Some(playlist_id) = &req.playlist_id {
        let playlist = state.spotify.playlist_details(token, playlist_id).await?;
        return Ok(Json(json!({ "playlist": playlist })));
    }

    if let Some(album_id) = &req.album_id {
        let album = state.spotify.album_details(token, album_id).await?;
        return Ok(Json(json!({ "album": album })));
    }

    match req.kind.as_deref().unwrap_or_default() {
        "playlists" => Ok(Json(json!({
            "playlists": state.spotify.playlists(token).await?,
        }))),
        "albums" => Ok(Json(json!({
            "albums": state.spotify.saved_albums(token).await?,
        }))),
        kind @ ("topTracks" | "topArtists") => {
            let period = req.period.as_deref().unwrap_or("3month");
            if !ALLOWED_PERIODS.contains(&period) {
                return Err(invalid_period());
            }
            let range = spotify_time_range(period);
            if kind == "topTracks" {
                Ok(Json(json!({
                    "topTracks": state.spotify.top_tracks(token, range).await?,
                })))
            } else {
                Ok(Json(json!({
                    "topArtists": state.spotify.top_artists(token, range).await?,
                })))
            }
        }
        _ => Err(AppError::BadRequest(
            "Type must be one of \"topTracks\", \"topArtists\", \"playlists\", or \"albums\""
                .into(),
        )),
    }
}

/// Query parameters for the download endpoint.
#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    url: Option<String>,
    #[serde(rename = "trackId")]
    track_id: Option<String>,
}

/// GET /api/download - Resolve a track download link.
pub async fn download(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DownloadQuery>,
) -> Result<Json<Value>, AppError> {
    let spotify_url = params
        .url
        .or_else(|| {
            params
                .track_id
                .map(|id| format!("https://open.spotify.com/track/{id}"))
        })
        .ok_or_else(|| AppError::BadRequest("Missing url or trackId parameter".into()))?;

    Ok(Json(state.download.resolve(&spotify_url).await?))
}

/// Build the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .route("/api/lastfm", post(lastfm_stats))
        .route("/api/spotify", post(spotify_stats))
        .route("/api/validlastfm", post(valid_lastfm))
        .route("/api/validspotify", post(valid_spotify))
        .route("/api/download", get(download))
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::StatusCode;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use ed25519_dalek::{Signer, SigningKey};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    use crate::store::MemoryUserStore;
    use crate::telegram::unix_now;

    const BOT_TOKEN: &str = "12345:test-token";
    const BOT_ID: &str = "12345";

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[11u8; 32])
    }

    /// State wired to an in-memory store and a local keypair. The upstream
    /// clients point at localhost and are never reached by these tests.
    fn test_state(store: Arc<MemoryUserStore>) -> Arc<AppState> {
        let public_hex = hex::encode(signing_key().verifying_key().to_bytes());
        let client = reqwest::Client::new();
        Arc::new(AppState {
            auth: TelegramAuth::new(BOT_TOKEN, BOT_ID, &public_hex).unwrap(),
            spotify: SpotifyClient::new(
                client.clone(),
                "client-id".into(),
                "client-secret".into(),
                "http://localhost/tokens".into(),
            ),
            lastfm: LastfmClient::new(client.clone(), "api-key".into()),
            download: DownloadClient::new(client, "http://localhost/api".into()),
            store,
        })
    }

    /// Builds a correctly-hashed `initData` string for the test bot token.
    fn make_init_data(auth_date: i64, user: &str) -> String {
        let dcs = format!("auth_date={auth_date}\nuser={user}");
        let mut secret = Hmac::<Sha256>::new_from_slice(b"WebAppData").unwrap();
        secret.update(BOT_TOKEN.as_bytes());
        let secret = secret.finalize().into_bytes();
        let mut mac = Hmac::<Sha256>::new_from_slice(&secret).unwrap();
        mac.update(dcs.as_bytes());
        let hash = hex::encode(mac.finalize().into_bytes());
        format!(
            "auth_date={auth_date}&user={}&hash={hash}",
            urlencoding::encode(user),
        )
    }

    /// Builds a signed-query request whose mapping carries a valid
    /// signature; the unsigned fields start out empty.
    fn signed_request(pairs: &[(&str, &str)]) -> SignedStatsRequest {
        let query: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let message = std::iter::once(format!("{BOT_ID}:WebAppData"))
            .chain(query.iter().map(|(k, v)| format!("{k}={v}")))
            .collect::<Vec<_>>()
            .join("\n");
        let signature =
            URL_SAFE_NO_PAD.encode(signing_key().sign(message.as_bytes()).to_bytes());
        SignedStatsRequest {
            query_string: Some(query),
            signature: Some(signature),
            username: None,
            access_token: None,
            period: None,
            kind: None,
            playlist_id: None,
            album_id: None,
        }
    }

    fn empty_request() -> SignedStatsRequest {
        SignedStatsRequest {
            query_string: None,
            signature: None,
            username: None,
            access_token: None,
            period: None,
            kind: None,
            playlist_id: None,
            album_id: None,
        }
    }

    #[tokio::test]
    async fn valid_init_data_with_saved_username_succeeds() {
        let store = Arc::new(MemoryUserStore::new());
        store.insert(42, "ada_lovelace").await;
        let state = test_state(store);

        let init = make_init_data(unix_now(), r#"{"id":42,"first_name":"Ada"}"#);
        let req = InitDataRequest {
            init_data: Some(init),
        };
        let Json(body) = valid_lastfm(State(state), Json(req)).await.unwrap();

        assert_eq!(body["user"]["user_id"], 42);
        assert_eq!(body["user"]["lastfm_username"], "ada_lovelace");
    }

    #[tokio::test]
    async fn missing_saved_username_is_404_not_401() {
        let state = test_state(Arc::new(MemoryUserStore::new()));

        let init = make_init_data(unix_now(), r#"{"id":42}"#);
        let req = InitDataRequest {
            init_data: Some(init),
        };
        let err = valid_lastfm(State(state), Json(req)).await.unwrap_err();

        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tampered_init_data_is_401() {
        let store = Arc::new(MemoryUserStore::new());
        store.insert(42, "ada_lovelace").await;
        let state = test_state(store);

        // An extra field changes the signed message without touching the
        // hash, so verification must fail before the store is consulted.
        let init = make_init_data(unix_now(), r#"{"id":42}"#);
        let req = InitDataRequest {
            init_data: Some(format!("{init}&query_id=evil")),
        };
        let err = valid_lastfm(State(state), Json(req)).await.unwrap_err();

        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn missing_init_data_is_400() {
        let state = test_state(Arc::new(MemoryUserStore::new()));
        let err = valid_lastfm(State(state), Json(InitDataRequest { init_data: None }))
            .await
            .unwrap_err();

        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_signed_fields_is_400() {
        let state = test_state(Arc::new(MemoryUserStore::new()));

        let err = lastfm_stats(State(state.clone()), Json(empty_request()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required fields");
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let err = spotify_stats(State(state), Json(empty_request()))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn tampered_signed_query_is_401() {
        let state = test_state(Arc::new(MemoryUserStore::new()));

        let now = unix_now().to_string();
        let mut req = signed_request(&[("auth_date", now.as_str())]);
        req.username = Some("ada_lovelace".into());
        req.query_string
            .as_mut()
            .unwrap()
            .insert("user".into(), r#"{"id":1}"#.into());

        let err = lastfm_stats(State(state), Json(req)).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn lastfm_requires_a_username_after_verification() {
        let state = test_state(Arc::new(MemoryUserStore::new()));

        let now = unix_now().to_string();
        let req = signed_request(&[("auth_date", now.as_str())]);
        let err = lastfm_stats(State(state), Json(req)).await.unwrap_err();

        assert_eq!(err.to_string(), "Username is required");
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn lastfm_rejects_unknown_type_and_period() {
        let state = test_state(Arc::new(MemoryUserStore::new()));
        let now = unix_now().to_string();

        let mut req = signed_request(&[("auth_date", now.as_str())]);
        req.username = Some("ada_lovelace".into());
        req.kind = Some("bogus".into());
        let err = lastfm_stats(State(state.clone()), Json(req))
            .await
            .unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);

        let mut req = signed_request(&[("auth_date", now.as_str())]);
        req.username = Some("ada_lovelace".into());
        req.kind = Some("topTracks".into());
        req.period = Some("2week".into());
        let err = lastfm_stats(State(state), Json(req)).await.unwrap_err();
        assert!(err.to_string().starts_with("Period must be one of"));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn spotify_rejects_unknown_type() {
        let state = test_state(Arc::new(MemoryUserStore::new()));
        let now = unix_now().to_string();

        let mut req = signed_request(&[("auth_date", now.as_str())]);
        req.kind = Some("bogus".into());
        let err = spotify_stats(State(state), Json(req)).await.unwrap_err();

        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn period_maps_onto_spotify_time_ranges() {
        assert_eq!(spotify_time_range("7day"), "short_term");
        assert_eq!(spotify_time_range("1month"), "short_term");
        assert_eq!(spotify_time_range("3month"), "medium_term");
        assert_eq!(spotify_time_range("6month"), "medium_term");
        assert_eq!(spotify_time_range("12month"), "long_term");
        assert_eq!(spotify_time_range("overall"), "long_term");
    }

    #[test]
    fn allowed_periods_match_the_client_vocabulary() {
        for period in ["overall", "7day", "1month", "3month", "6month", "12month"] {
            assert!(ALLOWED_PERIODS.contains(&period));
        }
        assert!(!ALLOWED_PERIODS.contains(&"2week"));
    }
}
