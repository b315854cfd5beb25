use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::domain::{Profile, UserId};
use super::identity::{AuthError, IdentityProvider, SessionChange};
use super::store::ProfileStore;

/// Shortest password accepted before the provider is even asked.
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Failed,
}

impl SessionPhase {
    /// Transition table for the session state machine. `Failed` only exits to
    /// `Unauthenticated`; any phase may fail.
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        match (self, next) {
            (Failed, Unauthenticated) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (Unauthenticated, Authenticating | Authenticated) => true,
            (Authenticating, Authenticated | Unauthenticated) => true,
            (Authenticated, Authenticating | Unauthenticated) => true,
            (current, next) => current == next,
        }
    }
}

/// Whether a user is signed in, and which identity and profile are active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub identity: Option<UserId>,
    pub profile: Option<Profile>,
    pub phase: SessionPhase,
}

impl Session {
    pub fn signed_out() -> Self {
        Self {
            identity: None,
            profile: None,
            phase: SessionPhase::Unauthenticated,
        }
    }

    /// Identity of an authenticated session. Profile fields stay optional until resolved.
    pub fn authenticated_identity(&self) -> Option<&UserId> {
        match self.phase {
            SessionPhase::Authenticated => self.identity.as_ref(),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated_identity().is_some()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::signed_out()
    }
}

fn set_phase(session: &mut Session, next: SessionPhase) {
    let current = session.phase;
    if current == next {
        return;
    }
    if current == SessionPhase::Failed && next != SessionPhase::Unauthenticated {
        debug!(from = ?current, to = ?SessionPhase::Unauthenticated, "session phase changed");
        session.phase = SessionPhase::Unauthenticated;
    }
    if !session.phase.can_transition_to(next) {
        warn!(from = ?session.phase, to = ?next, "ignoring illegal session transition");
        return;
    }
    debug!(from = ?session.phase, to = ?next, "session phase changed");
    session.phase = next;
}

/// Details collected by the sign-up form.
#[derive(Clone, Deserialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("username", &self.username)
            .finish()
    }
}

/// Owns the client's single [`Session`] and mediates every change to it.
///
/// The identity is written only by [`SessionManager::apply`], which the observer task
/// drives from provider notifications. `logout` additionally clears the session
/// synchronously. Every write is a short `send_modify` that never spans an `.await`.
pub struct SessionManager<I, P> {
    identity: Arc<I>,
    profiles: Arc<P>,
    state: watch::Sender<Session>,
    /// Bumped on every sign-out; profile fetches started under an older epoch are dropped.
    epoch: AtomicU64,
    /// Ticket of the running observer, or 0 when notifications are not being handled.
    observer: AtomicU64,
    observers_started: AtomicU64,
    /// Sign-outs requested by `logout` whose notification has not arrived yet.
    pending_sign_outs: AtomicU64,
}

impl<I, P> SessionManager<I, P>
where
    I: IdentityProvider + 'static,
    P: ProfileStore + 'static,
{
    pub fn new(identity: Arc<I>, profiles: Arc<P>) -> Self {
        let (state, _) = watch::channel(Session::signed_out());
        Self {
            identity,
            profiles,
            state,
            epoch: AtomicU64::new(0),
            observer: AtomicU64::new(0),
            observers_started: AtomicU64::new(0),
            pending_sign_outs: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    pub fn is_observed(&self) -> bool {
        self.observer.load(Ordering::SeqCst) != 0
    }

    /// Waits until no login or registration is pending and returns the session.
    ///
    /// A pending attempt can only complete through a sign-in notification, so it is
    /// failed with [`AuthError::Unavailable`] once nothing is observing notifications.
    pub async fn settled(&self) -> Result<Session, AuthError> {
        let mut receiver = self.state.subscribe();
        let settled = receiver
            .wait_for(|session| {
                session.phase != SessionPhase::Authenticating || !self.is_observed()
            })
            .await
            .map(|session| session.clone());
        let session = match settled {
            Ok(session) => session,
            Err(_) => self.snapshot(),
        };

        match session.phase {
            SessionPhase::Authenticating => {
                self.abandon_pending("session notifications are not being observed");
                Err(notifications_stopped())
            }
            SessionPhase::Failed => Err(notifications_stopped()),
            _ => Ok(session),
        }
    }

    fn update(&self, mutate: impl FnOnce(&mut Session)) {
        self.state.send_modify(mutate);
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Moves the session to `Authenticating` and returns the phase it left.
    fn begin_attempt(&self) -> SessionPhase {
        self.pending_sign_outs.store(0, Ordering::SeqCst);
        let mut prior = SessionPhase::Unauthenticated;
        self.update(|session| {
            prior = session.phase;
            set_phase(session, SessionPhase::Authenticating);
        });
        prior
    }

    /// A rejected attempt keeps a session that was already authenticated before it
    /// started; anything else reverts to signed out.
    fn record_failure(&self, err: &AuthError, prior: SessionPhase) {
        self.update(|session| {
            if !err.is_rejection() {
                set_phase(session, SessionPhase::Failed);
            } else if prior == SessionPhase::Authenticated && session.identity.is_some() {
                set_phase(session, SessionPhase::Authenticated);
            } else {
                session.identity = None;
                session.profile = None;
                set_phase(session, SessionPhase::Unauthenticated);
            }
        });
    }

    fn abandon_pending(&self, reason: &str) {
        self.update(|session| {
            if session.phase == SessionPhase::Authenticating {
                warn!(reason, "pending sign-in abandoned");
                set_phase(session, SessionPhase::Failed);
            }
        });
    }

    /// Creates the identity and its profile document. The session itself becomes
    /// authenticated through the provider's sign-in notification.
    pub async fn register(&self, registration: Registration) -> Result<Profile, AuthError> {
        if registration.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakCredential);
        }

        let prior = self.begin_attempt();
        let epoch = self.current_epoch();

        let user_id = match self
            .identity
            .create_identity(&registration.email, &registration.password)
            .await
        {
            Ok(user_id) => user_id,
            Err(err) => {
                warn!(error = %err, "identity creation failed");
                self.record_failure(&err, prior);
                return Err(err);
            }
        };

        let profile = Profile::new(
            user_id.clone(),
            registration.first_name,
            registration.last_name,
            registration.username,
            registration.email,
            Utc::now(),
        );

        if let Err(err) = self
            .identity
            .update_display_name(&user_id, &profile.display_name())
            .await
        {
            warn!(user_id = %user_id, error = %err, "display name not updated");
        }

        if let Err(err) = self.profiles.put_profile(&profile).await {
            error!(user_id = %user_id, error = %err, "profile document not written");
            return Err(AuthError::Unavailable(format!(
                "profile could not be saved: {err}"
            )));
        }

        self.update(|session| {
            let same_user = session.identity.as_ref().map_or(true, |id| *id == user_id);
            if self.current_epoch() == epoch && same_user {
                session.profile = Some(profile.clone());
            }
        });
        info!(user_id = %user_id, "account registered");

        Ok(profile)
    }

    /// Authenticates against the provider. On success the identity becomes active once
    /// the provider's sign-in notification has been applied.
    pub async fn login(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        let prior = self.begin_attempt();

        match self.identity.authenticate(email, password).await {
            Ok(user_id) => {
                info!(user_id = %user_id, "identity authenticated");
                Ok(user_id)
            }
            Err(err) => {
                warn!(error = %err, "login failed");
                self.record_failure(&err, prior);
                Err(err)
            }
        }
    }

    /// Clears the cached profile before ending the provider session so nothing stale
    /// stays visible while the sign-out is in flight.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let awaiting_notification = self.is_observed();
        if awaiting_notification {
            self.pending_sign_outs.fetch_add(1, Ordering::SeqCst);
        }
        self.update(|session| session.profile = None);

        match self.identity.end_session().await {
            Ok(()) => {
                self.update(|session| {
                    session.identity = None;
                    session.profile = None;
                    set_phase(session, SessionPhase::Unauthenticated);
                });
                info!("signed out");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "sign-out failed");
                if awaiting_notification {
                    self.settle_sign_out();
                }
                self.update(|session| {
                    session.profile = None;
                    set_phase(session, SessionPhase::Failed);
                });
                Err(err)
            }
        }
    }

    fn settle_sign_out(&self) {
        let _ = self
            .pending_sign_outs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                pending.checked_sub(1)
            });
    }

    /// Re-reads the profile of the current identity.
    pub async fn refresh_profile(&self) -> Option<Profile> {
        let epoch = self.current_epoch();
        let user_id = self.state.borrow().identity.clone()?;
        let profile = self.fetch_profile(&user_id).await?;

        let mut applied = false;
        self.update(|session| {
            if self.current_epoch() == epoch && session.identity.as_ref() == Some(&user_id) {
                session.profile = Some(profile.clone());
                applied = true;
            }
        });
        applied.then_some(profile)
    }

    async fn fetch_profile(&self, user_id: &UserId) -> Option<Profile> {
        match self.profiles.get_profile(user_id).await {
            Ok(Some(profile)) => Some(profile),
            Ok(None) => {
                warn!(user_id = %user_id, "profile document missing; profile unresolved");
                None
            }
            Err(err) => {
                error!(user_id = %user_id, error = %err, "error fetching user profile");
                None
            }
        }
    }

    /// Applies one provider notification to the session.
    pub async fn apply(&self, change: SessionChange) {
        match change {
            SessionChange::SignedOut => {
                self.settle_sign_out();
                self.epoch.fetch_add(1, Ordering::SeqCst);
                self.update(|session| {
                    session.identity = None;
                    session.profile = None;
                    // A pending login or registration settles the phase itself.
                    if session.phase != SessionPhase::Authenticating {
                        set_phase(session, SessionPhase::Unauthenticated);
                    }
                });
                debug!("provider reported sign-out");
            }
            SessionChange::SignedIn(user_id) => {
                if self.pending_sign_outs.load(Ordering::SeqCst) > 0 {
                    debug!(user_id = %user_id, "ignoring sign-in queued before sign-out");
                    return;
                }
                let epoch = self.current_epoch();
                let mut cached = false;
                self.update(|session| {
                    if session
                        .profile
                        .as_ref()
                        .is_some_and(|profile| profile.user_id != user_id)
                    {
                        session.profile = None;
                    }
                    session.identity = Some(user_id.clone());
                    cached = session.profile.is_some();
                });

                let profile = if cached {
                    None
                } else {
                    self.fetch_profile(&user_id).await
                };

                self.update(|session| {
                    if self.current_epoch() != epoch
                        || session.identity.as_ref() != Some(&user_id)
                    {
                        debug!(user_id = %user_id, "discarding stale sign-in");
                        return;
                    }
                    if let Some(profile) = profile {
                        session.profile = Some(profile);
                    }
                    set_phase(session, SessionPhase::Authenticated);
                });
                debug!(user_id = %user_id, "provider reported sign-in");
            }
        }
    }

    /// Rebuilds the session from the provider's current identity after notifications
    /// were missed.
    pub async fn resync(&self) {
        self.pending_sign_outs.store(0, Ordering::SeqCst);
        match self.identity.current_identity().await {
            Ok(Some(user_id)) => self.apply(SessionChange::SignedIn(user_id)).await,
            Ok(None) => self.apply(SessionChange::SignedOut).await,
            Err(err) => {
                error!(error = %err, "could not resynchronize session");
                self.epoch.fetch_add(1, Ordering::SeqCst);
                self.update(|session| {
                    session.identity = None;
                    session.profile = None;
                    set_phase(session, SessionPhase::Failed);
                });
            }
        }
    }

    fn stop_observing(&self, ticket: u64, reason: &str) {
        if self
            .observer
            .compare_exchange(ticket, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        debug!(reason, "session notifications no longer observed");
        self.pending_sign_outs.store(0, Ordering::SeqCst);
        self.abandon_pending(reason);
    }

    /// Subscribes to provider notifications. Events are handled one at a time on a
    /// single task; dropping the returned handle unsubscribes. Returns `None` while
    /// another observer is running.
    pub fn observe(self: &Arc<Self>) -> Option<SessionObserver> {
        let ticket = self.observers_started.fetch_add(1, Ordering::SeqCst) + 1;
        if self
            .observer
            .compare_exchange(0, ticket, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("session notifications are already observed");
            return None;
        }

        let mut changes = self.identity.subscribe();
        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => manager.apply(change).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session notifications dropped; resynchronizing");
                        manager.resync().await;
                    }
                    Err(RecvError::Closed) => {
                        manager.stop_observing(
                            ticket,
                            "identity provider closed the notification channel",
                        );
                        break;
                    }
                }
            }
        });

        let manager = Arc::clone(self);
        Some(SessionObserver {
            task,
            release: Some(Box::new(move || {
                manager.stop_observing(ticket, "session observer dropped")
            })),
        })
    }
}

fn notifications_stopped() -> AuthError {
    AuthError::Unavailable("session notifications stopped before sign-in completed".to_string())
}

/// Live subscription to session notifications.
pub struct SessionObserver {
    task: JoinHandle<()>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl SessionObserver {
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl fmt::Debug for SessionObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionObserver")
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for SessionObserver {
    fn drop(&mut self) {
        self.task.abort();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}
