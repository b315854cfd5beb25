use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use crate::error::AppError;

use super::history::HistoryRetriever;
use super::identity::IdentityProvider;
use super::intake::RawLoanForm;
use super::scoring::PredictionService;
use super::session::{Registration, SessionManager, SessionObserver};
use super::store::{LoanApplicationStore, ProfileStore};
use super::submission::{ApplicationSubmissionPipeline, SubmissionOutcome};

/// The session manager, submission pipeline, and history retriever wired to one
/// identity provider, document store, and scorer. Keeps the session subscription
/// alive for as long as it exists.
pub struct LoanDesk<I, D, C> {
    session: Arc<SessionManager<I, D>>,
    pipeline: Arc<ApplicationSubmissionPipeline<D, C>>,
    history: Arc<HistoryRetriever<D>>,
    _observer: Option<SessionObserver>,
}

impl<I, D, C> LoanDesk<I, D, C>
where
    I: IdentityProvider + 'static,
    D: ProfileStore + LoanApplicationStore + 'static,
    C: PredictionService + 'static,
{
    /// Must be called from within a tokio runtime; starts the session observer.
    pub fn new(identity: Arc<I>, store: Arc<D>, scorer: Arc<C>) -> Self {
        let session = Arc::new(SessionManager::new(identity, store.clone()));
        let observer = session.observe();
        Self {
            session,
            pipeline: Arc::new(ApplicationSubmissionPipeline::new(store.clone(), scorer)),
            history: Arc::new(HistoryRetriever::new(store)),
            _observer: observer,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager<I, D>> {
        &self.session
    }

    pub fn pipeline(&self) -> &Arc<ApplicationSubmissionPipeline<D, C>> {
        &self.pipeline
    }

    pub fn history(&self) -> &Arc<HistoryRetriever<D>> {
        &self.history
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Credentials {
    email: String,
    password: String,
}

/// Router builder exposing session, submission, and history endpoints.
pub fn loan_router<I, D, C>(desk: Arc<LoanDesk<I, D, C>>) -> Router
where
    I: IdentityProvider + 'static,
    D: ProfileStore + LoanApplicationStore + 'static,
    C: PredictionService + 'static,
{
    Router::new()
        .route("/api/v1/session", get(session_handler::<I, D, C>))
        .route("/api/v1/session/register", post(register_handler::<I, D, C>))
        .route("/api/v1/session/login", post(login_handler::<I, D, C>))
        .route("/api/v1/session/logout", post(logout_handler::<I, D, C>))
        .route("/api/v1/loans/applications", post(submit_handler::<I, D, C>))
        .route("/api/v1/loans/history", get(history_handler::<I, D, C>))
        .with_state(desk)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let payload = json!({ "error": message.into() });
    (status, axum::Json(payload)).into_response()
}

pub(crate) async fn session_handler<I, D, C>(
    State(desk): State<Arc<LoanDesk<I, D, C>>>,
) -> Response
where
    I: IdentityProvider + 'static,
    D: ProfileStore + LoanApplicationStore + 'static,
    C: PredictionService + 'static,
{
    (StatusCode::OK, axum::Json(desk.session.snapshot())).into_response()
}

pub(crate) async fn register_handler<I, D, C>(
    State(desk): State<Arc<LoanDesk<I, D, C>>>,
    axum::Json(registration): axum::Json<Registration>,
) -> Response
where
    I: IdentityProvider + 'static,
    D: ProfileStore + LoanApplicationStore + 'static,
    C: PredictionService + 'static,
{
    match desk.session.register(registration).await {
        Ok(_) => match desk.session.settled().await {
            Ok(session) => (StatusCode::CREATED, axum::Json(session)).into_response(),
            Err(err) => AppError::from(err).into_response(),
        },
        Err(err) => AppError::from(err).into_response(),
    }
}

pub(crate) async fn login_handler<I, D, C>(
    State(desk): State<Arc<LoanDesk<I, D, C>>>,
    axum::Json(credentials): axum::Json<Credentials>,
) -> Response
where
    I: IdentityProvider + 'static,
    D: ProfileStore + LoanApplicationStore + 'static,
    C: PredictionService + 'static,
{
    match desk
        .session
        .login(&credentials.email, &credentials.password)
        .await
    {
        Ok(_) => match desk.session.settled().await {
            Ok(session) => (StatusCode::OK, axum::Json(session)).into_response(),
            Err(err) => AppError::from(err).into_response(),
        },
        Err(err) => AppError::from(err).into_response(),
    }
}

pub(crate) async fn logout_handler<I, D, C>(
    State(desk): State<Arc<LoanDesk<I, D, C>>>,
) -> Response
where
    I: IdentityProvider + 'static,
    D: ProfileStore + LoanApplicationStore + 'static,
    C: PredictionService + 'static,
{
    match desk.session.logout().await {
        Ok(()) => (StatusCode::OK, axum::Json(desk.session.snapshot())).into_response(),
        Err(err) => AppError::from(err).into_response(),
    }
}

/// Runs on a spawned task so a dropped request still lets the submission finish.
pub(crate) async fn submit_handler<I, D, C>(
    State(desk): State<Arc<LoanDesk<I, D, C>>>,
    axum::Json(payload): axum::Json<Value>,
) -> Response
where
    I: IdentityProvider + 'static,
    D: ProfileStore + LoanApplicationStore + 'static,
    C: PredictionService + 'static,
{
    let form = match RawLoanForm::from_json(&payload) {
        Ok(form) => form,
        Err(err) => return AppError::from(err).into_response(),
    };
    let session = desk.session.snapshot();
    let pipeline = desk.pipeline.clone();

    let task = tokio::spawn(async move { pipeline.submit(&session, &form).await });
    let result = match task.await {
        Ok(result) => result,
        Err(err) => {
            error!(error = %err, "submission task failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "submission interrupted");
        }
    };

    match result {
        Ok(SubmissionOutcome::Recorded(record)) => {
            (StatusCode::CREATED, axum::Json(json!({ "record": record }))).into_response()
        }
        Ok(SubmissionOutcome::PersistenceDegraded { prediction, reason }) => {
            let payload = json!({
                "prediction": prediction,
                "warning": {
                    "kind": "persistence_degraded",
                    "message": format!("Your result was not saved to your history: {reason}"),
                },
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(err) => AppError::from(err).into_response(),
    }
}

/// Runs on a spawned task for the same reason as [`submit_handler`].
pub(crate) async fn history_handler<I, D, C>(
    State(desk): State<Arc<LoanDesk<I, D, C>>>,
) -> Response
where
    I: IdentityProvider + 'static,
    D: ProfileStore + LoanApplicationStore + 'static,
    C: PredictionService + 'static,
{
    let Some(user_id) = desk.session.snapshot().authenticated_identity().cloned() else {
        return error_response(StatusCode::UNAUTHORIZED, "sign in to view loan history");
    };
    let history = desk.history.clone();

    let task = tokio::spawn(async move { history.fetch_history(&user_id).await });
    match task.await {
        Ok(Ok(history)) => {
            let payload = json!({
                "served_by": history.served_by,
                "summary": history.summary(),
                "records": history.records,
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Ok(Err(err)) => AppError::from(err).into_response(),
        Err(err) => {
            error!(error = %err, "history task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "history request interrupted")
        }
    }
}
