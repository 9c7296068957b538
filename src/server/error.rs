use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use tracing::error;

pub type AppResult<T> = Result<T, Error>;

/// stages of the embed chain, used to say where a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStage {
    Initial,
    RedirectResolved,
    ProviderResolved,
    ManifestResolved,
}

impl std::fmt::Display for ChainStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Initial => "initial",
            Self::RedirectResolved => "redirect_resolved",
            Self::ProviderResolved => "provider_resolved",
            Self::ManifestResolved => "manifest_resolved",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("blocked by {url} (HTTP {status})")]
    TransientBlocked { url: String, status: u16 },

    #[error("validation failed for {url}: {reason}")]
    ValidationFailed { url: String, reason: String },

    #[error("no search result validated for {0}")]
    DiscoveryExhausted(String),

    // `stage` is the transition that was being attempted
    #[error("extraction failed while leaving {stage}: {reason}")]
    ExtractionFailed { stage: ChainStage, reason: String },

    #[error("script evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error("transport failed: {0}")]
    TransportFailed(String),

    #[error("stage {attempted} requires {missing} to be resolved first")]
    StageOutOfOrder {
        attempted: ChainStage,
        missing: &'static str,
    },

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InternalServerErrorWithContext(String),
}

impl Error {
    /// the chain stage the session was in when this error stopped it
    pub fn failed_stage(&self) -> Option<ChainStage> {
        match self {
            Self::ExtractionFailed { stage, .. } => Some(*stage),
            Self::StageOutOfOrder { attempted, .. } => Some(*attempted),
            Self::EvaluationFailed(_) => Some(ChainStage::ProviderResolved),
            _ => None,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::TransientBlocked { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ValidationFailed { .. } | Self::DiscoveryExhausted(_) => StatusCode::BAD_GATEWAY,
            Self::ExtractionFailed { .. } | Self::EvaluationFailed(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::TransportFailed(_) => StatusCode::BAD_GATEWAY,
            Self::StageOutOfOrder { .. } | Self::InternalServerErrorWithContext(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("request failed with {}: {}", status, self);
        }

        let body = Json(json!({
            "error": self.to_string(),
            "failed_stage": self.failed_stage(),
        }));

        (status, body).into_response()
    }
}
