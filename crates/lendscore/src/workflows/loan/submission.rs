use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use super::domain::{
    LoanApplicationDraft, LoanApplicationInput, LoanApplicationRecord, PredictionResult,
};
use super::intake::{RawLoanForm, ValidationError};
use super::scoring::{PredictionService, ScoringError};
use super::session::Session;
use super::store::{LoanApplicationStore, StoreError};

/// Result of a submission that reached the scoring service successfully.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// Scored and durably recorded.
    Recorded(LoanApplicationRecord),
    /// Scored, but the record could not be written. The prediction is still the user's.
    PersistenceDegraded {
        prediction: PredictionResult,
        reason: StoreError,
    },
}

impl SubmissionOutcome {
    pub fn prediction(&self) -> &PredictionResult {
        match self {
            SubmissionOutcome::Recorded(record) => &record.prediction,
            SubmissionOutcome::PersistenceDegraded { prediction, .. } => prediction,
        }
    }

    pub fn record(&self) -> Option<&LoanApplicationRecord> {
        match self {
            SubmissionOutcome::Recorded(record) => Some(record),
            SubmissionOutcome::PersistenceDegraded { .. } => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, SubmissionOutcome::PersistenceDegraded { .. })
    }
}

/// Error raised when a submission produced no prediction.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("sign in before submitting a loan application")]
    NotAuthenticated,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Failed to process loan application. Please try again.")]
    ScoringUnavailable(#[from] ScoringError),
}

/// Turns form input into a scored, persisted loan application.
pub struct ApplicationSubmissionPipeline<S, C> {
    store: Arc<S>,
    scorer: Arc<C>,
    clock: fn() -> DateTime<Utc>,
}

impl<S, C> ApplicationSubmissionPipeline<S, C>
where
    S: LoanApplicationStore + 'static,
    C: PredictionService + 'static,
{
    pub fn new(store: Arc<S>, scorer: Arc<C>) -> Self {
        Self {
            store,
            scorer,
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate, score, then persist. Scoring failures stop the pipeline before
    /// anything is written; persistence failures downgrade to a warning.
    pub async fn submit(
        &self,
        session: &Session,
        form: &RawLoanForm,
    ) -> Result<SubmissionOutcome, SubmissionError> {
        let user_id = session
            .authenticated_identity()
            .cloned()
            .ok_or(SubmissionError::NotAuthenticated)?;
        let input = LoanApplicationInput::parse(form)?;

        let prediction = match self.scorer.predict(&input).await {
            Ok(prediction) => prediction,
            Err(err) => {
                error!(user_id = %user_id, error = %err, "scoring failed; nothing persisted");
                return Err(SubmissionError::ScoringUnavailable(err));
            }
        };

        let draft = LoanApplicationDraft::new(user_id.clone(), input, prediction, (self.clock)());
        let prediction = draft.prediction.clone();

        match self.store.append(draft).await {
            Ok(record) => {
                info!(
                    user_id = %user_id,
                    application_id = %record.id,
                    status = record.status.label(),
                    "loan application saved"
                );
                Ok(SubmissionOutcome::Recorded(record))
            }
            Err(reason) => {
                warn!(
                    user_id = %user_id,
                    error = %reason,
                    "loan application scored but not saved"
                );
                Ok(SubmissionOutcome::PersistenceDegraded { prediction, reason })
            }
        }
    }
}
