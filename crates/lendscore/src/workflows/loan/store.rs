use async_trait::async_trait;

use super::domain::{LoanApplicationDraft, LoanApplicationRecord, Profile, UserId};

/// Ordering requested from the store for a `loanApplications` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOrder {
    /// Server-side `createdAt` descending; usually backed by a composite index.
    NewestFirst,
    /// Equality filter only, in whatever order the store returns.
    Unordered,
}

/// Equality query on `userId`, optionally ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationQuery {
    pub user_id: UserId,
    pub order: QueryOrder,
}

impl ApplicationQuery {
    pub fn newest_first(user_id: UserId) -> Self {
        Self {
            user_id,
            order: QueryOrder::NewestFirst,
        }
    }

    pub fn unordered(user_id: UserId) -> Self {
        Self {
            user_id,
            order: QueryOrder::Unordered,
        }
    }
}

/// The `users` collection, keyed by identity id.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn put_profile(&self, profile: &Profile) -> Result<(), StoreError>;
    async fn get_profile(&self, user_id: &UserId) -> Result<Option<Profile>, StoreError>;
}

/// The append-only `loanApplications` collection.
#[async_trait]
pub trait LoanApplicationStore: Send + Sync {
    /// Appends a record; the store assigns its id.
    async fn append(
        &self,
        draft: LoanApplicationDraft,
    ) -> Result<LoanApplicationRecord, StoreError>;

    async fn query(
        &self,
        query: &ApplicationQuery,
    ) -> Result<Vec<LoanApplicationRecord>, StoreError>;
}

/// Error enumeration for document store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("document already exists")]
    Conflict,
    #[error("query requires a missing index: {0}")]
    MissingIndex(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
