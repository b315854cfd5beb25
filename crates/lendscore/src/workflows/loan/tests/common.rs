use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, watch, Notify};

use crate::workflows::loan::domain::{
    ApplicationId, LoanApplicationDraft, LoanApplicationInput, LoanApplicationRecord,
    PredictionResult, Profile, RiskLevel, UserId,
};
use crate::workflows::loan::identity::{AuthError, IdentityProvider, SessionChange};
use crate::workflows::loan::intake::RawLoanForm;
use crate::workflows::loan::scoring::{PredictionService, ScoringError};
use crate::workflows::loan::session::{Registration, Session, SessionPhase};
use crate::workflows::loan::store::{
    ApplicationQuery, LoanApplicationStore, ProfileStore, QueryOrder, StoreError,
};

pub(super) fn scenario_form() -> RawLoanForm {
    RawLoanForm::new()
        .with("gender", "Lalaki")
        .with("marital_status", "Single")
        .with("dependents", "0")
        .with("education", "College Graduate")
        .with("self_employed", "No")
        .with("applicant_income_php", "50000")
        .with("coapplicant_income_php", "0")
        .with("loan_amount_php", "500000")
        .with("loan_term_days", "360")
        .with("credit_history", "1.0")
        .with("property_area", "Metro Manila")
        .with("loan_category", "House Purchase")
}

pub(super) fn scenario_input() -> LoanApplicationInput {
    LoanApplicationInput::parse(&scenario_form()).expect("scenario form is valid")
}

pub(super) fn approved_prediction() -> PredictionResult {
    PredictionResult {
        loan_approved: true,
        approval_probability: 0.82,
        risk_level: RiskLevel::Low,
        recommendations: Vec::new(),
    }
}

pub(super) fn denied_prediction() -> PredictionResult {
    PredictionResult {
        loan_approved: false,
        approval_probability: 0.35,
        risk_level: RiskLevel::High,
        recommendations: vec![
            "Consider reducing the loan amount or increasing your income".to_string(),
        ],
    }
}

pub(super) fn user(id: &str) -> UserId {
    UserId(id.to_string())
}

pub(super) fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn fixed_clock() -> DateTime<Utc> {
    at(15, 9)
}

pub(super) fn signed_in(user_id: &UserId) -> Session {
    Session {
        identity: Some(user_id.clone()),
        profile: None,
        phase: SessionPhase::Authenticated,
    }
}

pub(super) fn profile_for(user_id: &UserId) -> Profile {
    Profile::new(
        user_id.clone(),
        "Maria",
        "Santos",
        "msantos",
        "maria@example.ph",
        at(1, 8),
    )
}

pub(super) fn record(
    id: &str,
    user_id: &UserId,
    created_at: DateTime<Utc>,
) -> LoanApplicationRecord {
    record_with(id, user_id, created_at, approved_prediction())
}

pub(super) fn record_with(
    id: &str,
    user_id: &UserId,
    created_at: DateTime<Utc>,
    prediction: PredictionResult,
) -> LoanApplicationRecord {
    LoanApplicationDraft::new(user_id.clone(), scenario_input(), prediction, created_at)
        .into_record(ApplicationId(id.to_string()))
}

pub(super) fn registration(email: &str, password: &str) -> Registration {
    Registration {
        email: email.to_string(),
        password: password.to_string(),
        first_name: "Maria".to_string(),
        last_name: "Santos".to_string(),
        username: "msantos".to_string(),
    }
}

/// Waits (bounded) until the watched session satisfies `predicate`.
pub(super) async fn wait_for_session(
    mut receiver: watch::Receiver<Session>,
    predicate: impl FnMut(&Session) -> bool,
) -> Session {
    tokio::time::timeout(Duration::from_secs(2), receiver.wait_for(predicate))
        .await
        .expect("session settles in time")
        .expect("session channel open")
        .clone()
}

pub(super) fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).expect("serialize body")))
        .expect("build request")
}

pub(super) fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

/// Lets a test hold a profile read open until it decides to release it.
#[derive(Default)]
pub(super) struct ProfileGate {
    pub(super) entered: Notify,
    pub(super) release: Notify,
}

/// Document store fake with switches for each failure mode.
#[derive(Default)]
pub(super) struct MemoryStore {
    profiles: Mutex<HashMap<UserId, Profile>>,
    records: Mutex<Vec<LoanApplicationRecord>>,
    sequence: AtomicU64,
    gate: Mutex<Option<Arc<ProfileGate>>>,
    pub(super) fail_appends: AtomicBool,
    pub(super) fail_ordered: AtomicBool,
    pub(super) fail_unordered: AtomicBool,
    pub(super) fail_profile_writes: AtomicBool,
    pub(super) fail_profile_reads: AtomicBool,
    pub(super) queries: Mutex<Vec<QueryOrder>>,
}

impl MemoryStore {
    pub(super) fn with_records(records: Vec<LoanApplicationRecord>) -> Self {
        let store = Self::default();
        *store.records.lock().expect("records mutex poisoned") = records;
        store
    }

    pub(super) fn with_profile(profile: Profile) -> Self {
        let store = Self::default();
        store
            .profiles
            .lock()
            .expect("profiles mutex poisoned")
            .insert(profile.user_id.clone(), profile);
        store
    }

    pub(super) fn records(&self) -> Vec<LoanApplicationRecord> {
        self.records.lock().expect("records mutex poisoned").clone()
    }

    pub(super) fn profile(&self, user_id: &UserId) -> Option<Profile> {
        self.profiles
            .lock()
            .expect("profiles mutex poisoned")
            .get(user_id)
            .cloned()
    }

    pub(super) fn gate_profile_reads(&self) -> Arc<ProfileGate> {
        let gate = Arc::new(ProfileGate::default());
        *self.gate.lock().expect("gate mutex poisoned") = Some(gate.clone());
        gate
    }

    pub(super) fn fail(&self, switch: &AtomicBool) {
        switch.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn put_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        if self.fail_profile_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("users collection offline".to_string()));
        }
        let mut guard = self.profiles.lock().expect("profiles mutex poisoned");
        if guard.contains_key(&profile.user_id) {
            return Err(StoreError::Conflict);
        }
        guard.insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn get_profile(&self, user_id: &UserId) -> Result<Option<Profile>, StoreError> {
        let gate = self.gate.lock().expect("gate mutex poisoned").clone();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if self.fail_profile_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("users collection offline".to_string()));
        }
        Ok(self.profile(user_id))
    }
}

#[async_trait]
impl LoanApplicationStore for MemoryStore {
    async fn append(
        &self,
        draft: LoanApplicationDraft,
    ) -> Result<LoanApplicationRecord, StoreError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write rejected".to_string()));
        }
        let id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let record = draft.into_record(ApplicationId(format!("loan-{id:06}")));
        self.records
            .lock()
            .expect("records mutex poisoned")
            .push(record.clone());
        Ok(record)
    }

    async fn query(
        &self,
        query: &ApplicationQuery,
    ) -> Result<Vec<LoanApplicationRecord>, StoreError> {
        self.queries
            .lock()
            .expect("queries mutex poisoned")
            .push(query.order);

        let mut matching: Vec<LoanApplicationRecord> = self
            .records()
            .into_iter()
            .filter(|record| record.user_id == query.user_id)
            .collect();

        match query.order {
            QueryOrder::NewestFirst => {
                if self.fail_ordered.load(Ordering::SeqCst) {
                    return Err(StoreError::MissingIndex(
                        "loanApplications(userId ASC, createdAt DESC)".to_string(),
                    ));
                }
                matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            }
            QueryOrder::Unordered => {
                if self.fail_unordered.load(Ordering::SeqCst) {
                    return Err(StoreError::Unavailable("network unreachable".to_string()));
                }
            }
        }
        Ok(matching)
    }
}

/// Scorer stub returning a canned response and counting calls.
pub(super) struct StubScorer {
    response: Result<PredictionResult, ScoringError>,
    pub(super) calls: AtomicUsize,
}

impl StubScorer {
    pub(super) fn returning(prediction: PredictionResult) -> Self {
        Self {
            response: Ok(prediction),
            calls: AtomicUsize::new(0),
        }
    }

    pub(super) fn failing(error: ScoringError) -> Self {
        Self {
            response: Err(error),
            calls: AtomicUsize::new(0),
        }
    }

    pub(super) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PredictionService for StubScorer {
    async fn predict(
        &self,
        _input: &LoanApplicationInput,
    ) -> Result<PredictionResult, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }
}

struct Account {
    user_id: UserId,
    password: String,
}

/// Identity provider fake that emits notifications the way a hosted provider does:
/// sign-in on create and authenticate, sign-out on end_session.
pub(super) struct FakeIdentityProvider {
    accounts: Mutex<HashMap<String, Account>>,
    display_names: Mutex<HashMap<UserId, String>>,
    current: Mutex<Option<UserId>>,
    changes: Mutex<Option<broadcast::Sender<SessionChange>>>,
    sequence: AtomicU64,
    pub(super) unavailable: AtomicBool,
}

impl Default for FakeIdentityProvider {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            accounts: Mutex::new(HashMap::new()),
            display_names: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            changes: Mutex::new(Some(changes)),
            sequence: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }
}

impl FakeIdentityProvider {
    pub(super) fn with_account(email: &str, password: &str, user_id: &UserId) -> Self {
        let provider = Self::default();
        provider.accounts.lock().expect("accounts mutex poisoned").insert(
            email.to_string(),
            Account {
                user_id: user_id.clone(),
                password: password.to_string(),
            },
        );
        provider
    }

    pub(super) fn display_name(&self, user_id: &UserId) -> Option<String> {
        self.display_names
            .lock()
            .expect("display names mutex poisoned")
            .get(user_id)
            .cloned()
    }

    /// Simulates a provider-side change such as token expiry.
    pub(super) fn emit(&self, change: SessionChange) {
        self.set_current(match &change {
            SessionChange::SignedIn(user_id) => Some(user_id.clone()),
            SessionChange::SignedOut => None,
        });
        let sender = self.changes.lock().expect("changes mutex poisoned").clone();
        if let Some(sender) = sender {
            let _ = sender.send(change);
        }
    }

    /// Changes the provider's session without notifying anyone.
    pub(super) fn set_current(&self, user_id: Option<UserId>) {
        *self.current.lock().expect("current mutex poisoned") = user_id;
    }

    /// Drops the notification sender so subscribers see the channel close.
    pub(super) fn close_notifications(&self) {
        self.changes.lock().expect("changes mutex poisoned").take();
    }

    fn check_available(&self) -> Result<(), AuthError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AuthError::Unavailable("network request failed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn create_identity(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        self.check_available()?;
        let user_id = {
            let mut accounts = self.accounts.lock().expect("accounts mutex poisoned");
            if accounts.contains_key(email) {
                return Err(AuthError::DuplicateIdentity);
            }
            let id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            let user_id = UserId(format!("uid-{id}"));
            accounts.insert(
                email.to_string(),
                Account {
                    user_id: user_id.clone(),
                    password: password.to_string(),
                },
            );
            user_id
        };
        self.emit(SessionChange::SignedIn(user_id.clone()));
        Ok(user_id)
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        self.check_available()?;
        let user_id = {
            let accounts = self.accounts.lock().expect("accounts mutex poisoned");
            match accounts.get(email) {
                Some(account) if account.password == password => account.user_id.clone(),
                _ => return Err(AuthError::InvalidCredential),
            }
        };
        self.emit(SessionChange::SignedIn(user_id.clone()));
        Ok(user_id)
    }

    async fn end_session(&self) -> Result<(), AuthError> {
        self.check_available()?;
        self.emit(SessionChange::SignedOut);
        Ok(())
    }

    async fn update_display_name(
        &self,
        identity: &UserId,
        display_name: &str,
    ) -> Result<(), AuthError> {
        self.check_available()?;
        self.display_names
            .lock()
            .expect("display names mutex poisoned")
            .insert(identity.clone(), display_name.to_string());
        Ok(())
    }

    async fn current_identity(&self) -> Result<Option<UserId>, AuthError> {
        self.check_available()?;
        Ok(self.current.lock().expect("current mutex poisoned").clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        match self.changes.lock().expect("changes mutex poisoned").as_ref() {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }
}
