use async_trait::async_trait;
use lendscore::workflows::loan::{
    ApplicationId, ApplicationQuery, AuthError, HttpPredictionClient, IdentityProvider,
    LoanApplicationDraft, LoanApplicationRecord, LoanApplicationStore, Profile, ProfileStore,
    QueryOrder, SessionChange, StoreError, UserId,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) scorer: Option<Arc<HttpPredictionClient>>,
}

#[derive(Debug, Clone)]
struct Account {
    user_id: UserId,
    password: String,
}

/// Process-local identity provider. Broadcasts a notification for every sign-in and sign-out.
#[derive(Clone)]
pub(crate) struct InMemoryIdentityProvider {
    accounts: Arc<Mutex<HashMap<String, Account>>>,
    display_names: Arc<Mutex<HashMap<UserId, String>>>,
    current: Arc<Mutex<Option<UserId>>>,
    changes: broadcast::Sender<SessionChange>,
    sequence: Arc<AtomicU64>,
}

impl Default for InMemoryIdentityProvider {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(32);
        Self {
            accounts: Arc::default(),
            display_names: Arc::default(),
            current: Arc::default(),
            changes,
            sequence: Arc::default(),
        }
    }
}

impl InMemoryIdentityProvider {
    pub(crate) fn display_name(&self, user_id: &UserId) -> Option<String> {
        self.display_names
            .lock()
            .expect("display name mutex poisoned")
            .get(user_id)
            .cloned()
    }

    fn notify(&self, change: SessionChange) {
        *self.current.lock().expect("current session mutex poisoned") = match &change {
            SessionChange::SignedIn(user_id) => Some(user_id.clone()),
            SessionChange::SignedOut => None,
        };
        // No subscriber is not an error; the observer may not be running yet.
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn create_identity(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        let key = email.trim().to_lowercase();
        let user_id = {
            let mut guard = self.accounts.lock().expect("account mutex poisoned");
            if guard.contains_key(&key) {
                return Err(AuthError::DuplicateIdentity);
            }
            let next = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            let user_id = UserId(format!("user-{next:06}"));
            guard.insert(
                key,
                Account {
                    user_id: user_id.clone(),
                    password: password.to_string(),
                },
            );
            user_id
        };
        self.notify(SessionChange::SignedIn(user_id.clone()));
        Ok(user_id)
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        let key = email.trim().to_lowercase();
        let user_id = {
            let guard = self.accounts.lock().expect("account mutex poisoned");
            match guard.get(&key) {
                Some(account) if account.password == password => account.user_id.clone(),
                _ => return Err(AuthError::InvalidCredential),
            }
        };
        self.notify(SessionChange::SignedIn(user_id.clone()));
        Ok(user_id)
    }

    async fn end_session(&self) -> Result<(), AuthError> {
        self.notify(SessionChange::SignedOut);
        Ok(())
    }

    async fn update_display_name(
        &self,
        identity: &UserId,
        display_name: &str,
    ) -> Result<(), AuthError> {
        self.display_names
            .lock()
            .expect("display name mutex poisoned")
            .insert(identity.clone(), display_name.to_string());
        Ok(())
    }

    async fn current_identity(&self) -> Result<Option<UserId>, AuthError> {
        Ok(self
            .current
            .lock()
            .expect("current session mutex poisoned")
            .clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }
}

/// Document store backing both the `users` and `loanApplications` collections.
///
/// Without an ordered index, `NewestFirst` queries fail the way a hosted store does when a
/// composite index is missing; unordered queries return records in insertion order.
#[derive(Clone)]
pub(crate) struct InMemoryDocumentStore {
    profiles: Arc<Mutex<HashMap<UserId, Profile>>>,
    records: Arc<Mutex<Vec<LoanApplicationRecord>>>,
    sequence: Arc<AtomicU64>,
    ordered_index: bool,
}

impl InMemoryDocumentStore {
    pub(crate) fn new(ordered_index: bool) -> Self {
        Self {
            profiles: Arc::default(),
            records: Arc::default(),
            sequence: Arc::default(),
            ordered_index,
        }
    }

    pub(crate) fn record_count(&self) -> usize {
        self.records.lock().expect("record mutex poisoned").len()
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl ProfileStore for InMemoryDocumentStore {
    async fn put_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        let mut guard = self.profiles.lock().expect("profile mutex poisoned");
        if guard.contains_key(&profile.user_id) {
            return Err(StoreError::Conflict);
        }
        guard.insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn get_profile(&self, user_id: &UserId) -> Result<Option<Profile>, StoreError> {
        let guard = self.profiles.lock().expect("profile mutex poisoned");
        Ok(guard.get(user_id).cloned())
    }
}

#[async_trait]
impl LoanApplicationStore for InMemoryDocumentStore {
    async fn append(
        &self,
        draft: LoanApplicationDraft,
    ) -> Result<LoanApplicationRecord, StoreError> {
        let next = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let record = draft.into_record(ApplicationId(format!("loan-{next:06}")));
        self.records
            .lock()
            .expect("record mutex poisoned")
            .push(record.clone());
        Ok(record)
    }

    async fn query(
        &self,
        query: &ApplicationQuery,
    ) -> Result<Vec<LoanApplicationRecord>, StoreError> {
        if query.order == QueryOrder::NewestFirst && !self.ordered_index {
            return Err(StoreError::MissingIndex(
                "loanApplications: userId ASC, createdAt DESC".to_string(),
            ));
        }

        let guard = self.records.lock().expect("record mutex poisoned");
        let mut matching: Vec<LoanApplicationRecord> = guard
            .iter()
            .filter(|record| record.user_id == query.user_id)
            .cloned()
            .collect();
        if query.order == QueryOrder::NewestFirst {
            matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        Ok(matching)
    }
}
