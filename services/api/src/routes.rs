use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use lendscore::workflows::loan::{
    loan_router, IdentityProvider, LoanApplicationStore, LoanDesk, PredictionService,
    ProfileStore,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::warn;

pub(crate) fn with_loan_routes<I, D, C>(desk: Arc<LoanDesk<I, D, C>>) -> axum::Router
where
    I: IdentityProvider + 'static,
    D: ProfileStore + LoanApplicationStore + 'static,
    C: PredictionService + 'static,
{
    loan_router(desk)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Ready once the listener is bound and the scoring service reports a loaded model.
pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    if !state.readiness.load(Ordering::Relaxed) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "initializing" })),
        );
    }

    let Some(scorer) = state.scorer.as_ref() else {
        return (StatusCode::OK, Json(json!({ "status": "ready" })));
    };

    match scorer.health().await {
        Ok(health) if health.is_healthy() => (
            StatusCode::OK,
            Json(json!({ "status": "ready", "scorer": "healthy" })),
        ),
        Ok(health) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "degraded",
                "scorer": health.status,
                "model_loaded": health.model_loaded,
            })),
        ),
        Err(err) => {
            warn!(error = %err, scorer = scorer.base_url(), "scoring service health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "scorer": err.to_string() })),
            )
        }
    }
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use lendscore::workflows::loan::HttpPredictionClient;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;

    fn state(ready: bool, scorer: Option<HttpPredictionClient>) -> AppState {
        let recorder = PrometheusBuilder::new().build_recorder();
        AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(recorder.handle()),
            scorer: scorer.map(Arc::new),
        }
    }

    async fn ready_status(state: AppState) -> (StatusCode, serde_json::Value) {
        let app = axum::Router::new()
            .route("/ready", get(readiness_endpoint))
            .layer(Extension(state));
        let response = app
            .oneshot(Request::get("/ready").body(Body::empty()).expect("request"))
            .await
            .expect("route executes");
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 4096)
            .await
            .expect("read body");
        (status, serde_json::from_slice(&body).expect("json payload"))
    }

    async fn scorer_stub(status: &'static str, model_loaded: bool) -> String {
        let app = axum::Router::new().route(
            "/health",
            get(move || async move {
                Json(json!({ "status": status, "model_loaded": model_loaded }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub scorer");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn not_ready_before_listener_binds() {
        let (status, body) = ready_status(state(false, None)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "initializing");
    }

    #[tokio::test]
    async fn ready_when_scorer_model_is_loaded() {
        let url = scorer_stub("healthy", true).await;
        let (status, body) = ready_status(state(true, Some(HttpPredictionClient::new(url)))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scorer"], "healthy");
    }

    #[tokio::test]
    async fn degraded_when_scorer_has_no_model() {
        let url = scorer_stub("unhealthy", false).await;
        let (status, body) = ready_status(state(true, Some(HttpPredictionClient::new(url)))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["model_loaded"], false);
    }

    #[tokio::test]
    async fn degraded_when_scorer_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let client = HttpPredictionClient::new(format!("http://{addr}"));
        let (status, body) = ready_status(state(true, Some(client))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn healthcheck_reports_ok() {
        let Json(body) = healthcheck().await;
        assert_eq!(body["status"], "ok");
    }
}
