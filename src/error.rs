//! Application error type and HTTP status mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::download::DownloadError;
use crate::lastfm::LastfmError;
use crate::spotify::token::TokenError;
use crate::spotify::SpotifyError;
use crate::store::StoreError;
use crate::telegram::VerifyError;

/// Everything a handler can fail with, collapsed to a short message and a
/// status code at the edge. Internal causes are logged; hash values,
/// secrets and upstream bodies never reach the client.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Spotify(#[from] SpotifyError),

    #[error(transparent)]
    Lastfm(#[from] LastfmError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Verify(VerifyError::MalformedInput(_)) => StatusCode::BAD_REQUEST,
            AppError::Verify(_) => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) | AppError::Download(DownloadError::NoLink) => {
                StatusCode::BAD_REQUEST
            }
            AppError::NotFound(_) | AppError::Lastfm(LastfmError::UnknownUser) => {
                StatusCode::NOT_FOUND
            }
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Token(_)
            | AppError::Spotify(_)
            | AppError::Lastfm(_)
            | AppError::Download(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() || status == StatusCode::BAD_GATEWAY {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
