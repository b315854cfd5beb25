//! Loan application lifecycle: the signed-in session, scored submissions, and the
//! durable history of past applications.
//!
//! The identity provider, document store, and scoring service are consumed through the
//! traits in [`identity`], [`store`], and [`scoring`]; everything else in this module is
//! the orchestration between them.

pub mod domain;
pub mod history;
pub mod identity;
pub mod intake;
pub mod router;
pub mod scoring;
pub mod session;
pub mod store;
pub mod submission;

#[cfg(test)]
mod tests;

pub use domain::{
    ApplicationId, ApplicationStatus, CreditHistory, Dependents, Education, EmploymentType,
    Gender, LoanApplicationDraft, LoanApplicationInput, LoanApplicationRecord, LoanCategory,
    LoanTermDays, MaritalStatus, PredictionResult, Profile, PropertyArea, RiskLevel, UserId,
};
pub use history::{
    HistoryError, HistoryPlan, HistoryRetriever, HistoryStage, HistorySummary, LoanHistory,
};
pub use identity::{AuthError, IdentityProvider, SessionChange};
pub use intake::{RawLoanForm, ValidationError};
pub use router::{loan_router, LoanDesk};
pub use scoring::{HttpPredictionClient, PredictionService, ScorerHealth, ScoringError};
pub use session::{Registration, Session, SessionManager, SessionObserver, SessionPhase};
pub use store::{ApplicationQuery, LoanApplicationStore, ProfileStore, QueryOrder, StoreError};
pub use submission::{ApplicationSubmissionPipeline, SubmissionError, SubmissionOutcome};
