use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::{error, warn};

/// Errors surfaced by the relay pipeline.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("missing required `url` query parameter")]
    MissingUrl,

    #[error("invalid `{name}` parameter: {reason}")]
    InvalidParam { name: &'static str, reason: String },

    #[error("invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("target not allowed: {0}")]
    TargetNotAllowed(String),

    #[error("origin not allowed: {}", .0.as_deref().unwrap_or("<none>"))]
    OriginDenied(Option<String>),

    #[error("no previous relay target to resolve a relative request against")]
    NoFallbackTarget,

    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(#[from] reqwest::Error),

    #[error("failed to rewrite playlist: {0}")]
    PlaylistRewrite(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MissingUrl
            | RelayError::InvalidParam { .. }
            | RelayError::InvalidTarget(_)
            | RelayError::NoFallbackTarget => StatusCode::BAD_REQUEST,
            RelayError::OriginDenied(_) | RelayError::TargetNotAllowed(_) => StatusCode::FORBIDDEN,
            RelayError::UpstreamFetch(_) | RelayError::PlaylistRewrite(_) => StatusCode::BAD_GATEWAY,
            RelayError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!("{}", self);
        } else {
            warn!("{}", self);
        }

        match self {
            // Denied callers learn nothing beyond the status code
            RelayError::OriginDenied(_) => status.into_response(),
            other => (status, format!("{}\n", other)).into_response(),
        }
    }
}
