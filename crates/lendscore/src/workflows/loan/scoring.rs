use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ScoringConfig;

use super::domain::{LoanApplicationInput, PredictionResult};

/// Opaque scoring service that turns a normalized application into a prediction.
#[async_trait]
pub trait PredictionService: Send + Sync {
    async fn predict(&self, input: &LoanApplicationInput)
        -> Result<PredictionResult, ScoringError>;
}

/// Failures talking to the scoring service. All of them mean the score is unavailable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScoringError {
    #[error("scoring service unreachable: {0}")]
    Transport(String),
    #[error("scoring service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("scoring service response could not be decoded: {0}")]
    Decode(String),
    #[error("scoring service returned an invalid prediction: {0}")]
    InvalidResponse(String),
}

/// Body of the scorer's `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScorerHealth {
    pub status: String,
    pub model_loaded: bool,
}

impl ScorerHealth {
    pub fn is_healthy(&self) -> bool {
        self.model_loaded && self.status == "healthy"
    }
}

/// JSON-over-HTTP client for the scoring service's `POST /predict`.
#[derive(Debug, Clone)]
pub struct HttpPredictionClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpPredictionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &ScoringConfig) -> Result<Self, ScoringError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder
            .build()
            .map_err(|err| ScoringError::Transport(err.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<ScorerHealth, ScoringError> {
        let response = self
            .http_client
            .get(self.endpoint("health"))
            .send()
            .await
            .map_err(|err| ScoringError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScoringError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|err| ScoringError::Decode(err.to_string()))
    }
}

#[async_trait]
impl PredictionService for HttpPredictionClient {
    async fn predict(
        &self,
        input: &LoanApplicationInput,
    ) -> Result<PredictionResult, ScoringError> {
        debug!(
            loan_category = %input.loan_category,
            loan_term_days = input.loan_term_days.days(),
            "requesting prediction"
        );

        let response = self
            .http_client
            .post(self.endpoint("predict"))
            .json(input)
            .send()
            .await
            .map_err(|err| ScoringError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "scoring service rejected request");
            return Err(ScoringError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let prediction: PredictionResult = response
            .json()
            .await
            .map_err(|err| ScoringError::Decode(err.to_string()))?;
        prediction.check().map_err(ScoringError::InvalidResponse)?;

        Ok(prediction)
    }
}
