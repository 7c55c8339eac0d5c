use crate::cli::ServeArgs;
use crate::infra::{seed_demo_data, AppState, InMemoryCreditStore, InMemorySurplusLedger};
use crate::routes::with_surplus_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use surplus_engine::config::AppConfig;
use surplus_engine::engine::SurplusAllocationService;
use surplus_engine::error::AppError;
use surplus_engine::telemetry;
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

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let ledger = Arc::new(InMemorySurplusLedger::default());
    let credits = Arc::new(InMemoryCreditStore::default());
    if args.seed_demo {
        seed_demo_data(&ledger, &credits);
    }
    let service = Arc::new(SurplusAllocationService::with_page_size(
        ledger,
        credits,
        config.engine.default_page_size,
    ));

    let app = with_surplus_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "surplus reallocation service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
