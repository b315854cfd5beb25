use std::cmp::Ordering;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, warn};

use super::domain::{LoanApplicationRecord, UserId};
use super::store::{ApplicationQuery, LoanApplicationStore, StoreError};

/// Which stage of a [`HistoryPlan`] produced a history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStage {
    Primary,
    Fallback,
}

/// Two-stage history query. `primary` asks the store to order by `createdAt`;
/// `fallback` filters only and the ordering is applied client-side. Both stages
/// yield the same sequence for the same stored records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPlan {
    pub primary: ApplicationQuery,
    pub fallback: ApplicationQuery,
}

impl HistoryPlan {
    pub fn for_user(user_id: &UserId) -> Self {
        Self {
            primary: ApplicationQuery::newest_first(user_id.clone()),
            fallback: ApplicationQuery::unordered(user_id.clone()),
        }
    }
}

/// Newest first; equal timestamps fall back to the record id, also descending.
pub fn newest_first(a: &LoanApplicationRecord, b: &LoanApplicationRecord) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

/// A user's loan applications, most recent first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoanHistory {
    pub records: Vec<LoanApplicationRecord>,
    pub served_by: HistoryStage,
}

impl LoanHistory {
    fn from_stage(mut records: Vec<LoanApplicationRecord>, served_by: HistoryStage) -> Self {
        records.sort_by(newest_first);
        Self { records, served_by }
    }

    pub fn summary(&self) -> HistorySummary {
        let total = self.records.len();
        let approved = self
            .records
            .iter()
            .filter(|record| record.prediction.loan_approved)
            .count();
        let success_rate = if total == 0 {
            0.0
        } else {
            approved as f64 / total as f64
        };

        HistorySummary {
            total,
            approved,
            denied: total - approved,
            success_rate,
        }
    }
}

/// Headline numbers shown above the history list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistorySummary {
    pub total: usize,
    pub approved: usize,
    pub denied: usize,
    pub success_rate: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Failed to load loan history. Please check your internet connection and try again.")]
    Unavailable {
        primary: StoreError,
        fallback: StoreError,
    },
}

/// Reads a user's history, degrading to an unordered query when the ordered one fails.
pub struct HistoryRetriever<S> {
    store: Arc<S>,
}

impl<S> HistoryRetriever<S>
where
    S: LoanApplicationStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Runs the primary stage, then at most one fallback attempt. Read-only.
    pub async fn fetch_history(&self, user_id: &UserId) -> Result<LoanHistory, HistoryError> {
        let plan = HistoryPlan::for_user(user_id);

        let primary = match self.store.query(&plan.primary).await {
            Ok(records) => {
                debug!(
                    user_id = %user_id,
                    count = records.len(),
                    "history served by ordered query"
                );
                return Ok(LoanHistory::from_stage(records, HistoryStage::Primary));
            }
            Err(err) => err,
        };

        warn!(
            user_id = %user_id,
            error = %primary,
            "ordered history query failed; retrying without server-side ordering"
        );

        match self.store.query(&plan.fallback).await {
            Ok(records) => {
                debug!(
                    user_id = %user_id,
                    count = records.len(),
                    "history served by fallback query"
                );
                Ok(LoanHistory::from_stage(records, HistoryStage::Fallback))
            }
            Err(fallback) => {
                error!(user_id = %user_id, error = %fallback, "history fallback query failed");
                Err(HistoryError::Unavailable { primary, fallback })
            }
        }
    }
}
