use crate::cli::ServeArgs;
use crate::infra::{AppState, InMemoryDocumentStore, InMemoryIdentityProvider};
use crate::routes::with_loan_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use lendscore::config::AppConfig;
use lendscore::error::AppError;
use lendscore::telemetry;
use lendscore::workflows::loan::{HttpPredictionClient, LoanDesk};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let scorer = Arc::new(HttpPredictionClient::from_config(&config.scoring)?);
    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
        scorer: Some(scorer.clone()),
    };

    let identity = Arc::new(InMemoryIdentityProvider::default());
    let store = Arc::new(InMemoryDocumentStore::new(config.store.ordered_index));
    let desk = Arc::new(LoanDesk::new(identity, store, scorer.clone()));

    let app = with_loan_routes(desk)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        scorer = scorer.base_url(),
        ordered_index = config.store.ordered_index,
        "lendscore api ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
