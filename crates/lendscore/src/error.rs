use crate::config::ConfigError;
use crate::telemetry::TelemetryError;
use crate::workflows::loan::{
    AuthError, HistoryError, ScoringError, SubmissionError, ValidationError,
};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Validation(ValidationError),
    Scoring(ScoringError),
    Session(AuthError),
    Submission(SubmissionError),
    History(HistoryError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Server(err) => write!(f, "server error: {}", err),
            AppError::Validation(err) => write!(f, "invalid loan form: {}", err),
            AppError::Scoring(err) => write!(f, "{}", err),
            AppError::Session(err) => write!(f, "{}", err),
            AppError::Submission(err) => write!(f, "{}", err),
            AppError::History(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Server(err) => Some(err),
            AppError::Validation(err) => Some(err),
            AppError::Scoring(err) => Some(err),
            AppError::Session(err) => Some(err),
            AppError::Submission(err) => Some(err),
            AppError::History(err) => Some(err),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Submission(SubmissionError::Validation(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Scoring(_) | AppError::Submission(SubmissionError::ScoringUnavailable(_)) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Submission(SubmissionError::NotAuthenticated) => StatusCode::UNAUTHORIZED,
            AppError::Session(AuthError::InvalidCredential) => StatusCode::UNAUTHORIZED,
            AppError::Session(AuthError::DuplicateIdentity) => StatusCode::CONFLICT,
            AppError::Session(AuthError::WeakCredential) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Session(AuthError::Unavailable(_)) | AppError::History(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for AppError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<ValidationError> for AppError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<ScoringError> for AppError {
    fn from(value: ScoringError) -> Self {
        Self::Scoring(value)
    }
}

impl From<AuthError> for AppError {
    fn from(value: AuthError) -> Self {
        Self::Session(value)
    }
}

impl From<SubmissionError> for AppError {
    fn from(value: SubmissionError) -> Self {
        Self::Submission(value)
    }
}

impl From<HistoryError> for AppError {
    fn from(value: HistoryError) -> Self {
        Self::History(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submission_errors_map_to_their_status() {
        let scoring = AppError::from(SubmissionError::ScoringUnavailable(
            ScoringError::Transport("connection refused".to_string()),
        ));
        assert_eq!(scoring.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            scoring.to_string(),
            "Failed to process loan application. Please try again."
        );

        let validation = AppError::from(ValidationError::MissingField("gender"));
        assert_eq!(validation.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let signed_out = AppError::from(SubmissionError::NotAuthenticated);
        assert_eq!(signed_out.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn auth_rejections_are_client_errors() {
        assert_eq!(
            AppError::from(AuthError::DuplicateIdentity).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(AuthError::Unavailable("offline".to_string())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
