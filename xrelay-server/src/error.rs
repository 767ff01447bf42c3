//! Error responses for the relay HTTP surface.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use xrelay::RelayError;

/// Request processing stage, reported as the envelope `origin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Query parameters or header resolution.
    Header,
    /// Origin-side builder.
    Origin,
    /// Destination-side builder.
    Destination,
    /// Signed artifact validation.
    Validation,
    /// Relay payout.
    Payout,
}

impl Stage {
    /// Stable name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Header => "header",
            Self::Origin => "origin",
            Self::Destination => "destination",
            Self::Validation => "validation",
            Self::Payout => "payout",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A [`RelayError`] tagged with the stage that produced it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage}: {error}")]
pub struct ApiError {
    /// Failing stage.
    pub stage: Stage,
    /// Underlying error.
    pub error: RelayError,
}

impl ApiError {
    /// Tags `error` with `stage`.
    #[must_use]
    pub const fn new(stage: Stage, error: RelayError) -> Self {
        Self { stage, error }
    }

    /// HTTP status for the wrapped error.
    ///
    /// Client errors map to `400`, ledger transport failures to `502` and
    /// everything else to `500`.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match &self.error {
            RelayError::Rpc(_) => StatusCode::BAD_GATEWAY,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Extension for tagging results with a [`Stage`].
pub trait StageExt<T> {
    /// Maps the error into an [`ApiError`] for `stage`.
    ///
    /// # Errors
    ///
    /// Returns the tagged error if `self` is an error.
    fn at(self, stage: Stage) -> Result<T, ApiError>;
}

impl<T, E: Into<RelayError>> StageExt<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::new(stage, e.into()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(stage = %self.stage, error = %self.error, "request failed");
        } else {
            tracing::debug!(stage = %self.stage, error = %self.error, "request rejected");
        }
        let body = self.error.envelope(Some(self.stage.as_str()));
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (RelayError::malformed("x"), StatusCode::BAD_REQUEST),
            (RelayError::UnsupportedChain("x".into()), StatusCode::BAD_REQUEST),
            (RelayError::PaymasterMismatch("x".into()), StatusCode::BAD_REQUEST),
            (RelayError::EscrowNotFound("x".into()), StatusCode::BAD_REQUEST),
            (
                RelayError::InsufficientEscrowBalance("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (RelayError::decode("x"), StatusCode::INTERNAL_SERVER_ERROR),
            (RelayError::internal("x"), StatusCode::INTERNAL_SERVER_ERROR),
            (RelayError::rpc("x"), StatusCode::BAD_GATEWAY),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::new(Stage::Origin, error).status(), status);
        }
    }

    #[tokio::test]
    async fn test_response_body_carries_stage() {
        let response = ApiError::new(Stage::Destination, RelayError::rpc("timeout")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], 501);
        assert_eq!(json["origin"], "destination");
        assert_eq!(json["details"], "timeout");
    }

    #[test]
    fn test_stage_ext() {
        let r: Result<(), RelayError> = Err(RelayError::malformed("bad"));
        let err = r.at(Stage::Header).unwrap_err();
        assert_eq!(err.stage, Stage::Header);
        assert_eq!(err.to_string(), "header: Malformed request: bad");
    }
}
