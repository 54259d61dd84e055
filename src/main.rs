use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};

use pambo_payments::api;
use pambo_payments::config::AppConfig;
use pambo_payments::database;
use pambo_payments::database::nonce_repository::NonceRepository;
use pambo_payments::database::pending_payment_repository::PendingPaymentRepository;
use pambo_payments::database::profile_repository::ProfileRepository;
use pambo_payments::database::store::PgReconcilerStore;
use pambo_payments::gateway::daraja::DarajaClient;
use pambo_payments::gateway::replay::{ReplayGuard, ReplayPolicy};
use pambo_payments::gateway::signature::SignaturePolicy;
use pambo_payments::health::HealthChecker;
use pambo_payments::logging::init_tracing;
use pambo_payments::middleware::cors::origin_guard;
use pambo_payments::middleware::logging::{request_logging_middleware, UuidRequestId};
use pambo_payments::services::checkout::CheckoutService;
use pambo_payments::services::reconciler::PaymentReconciler;
use pambo_payments::services::subscription::SubscriptionService;
use pambo_payments::workers;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "pambo-payments",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health(State(checker): State<HealthChecker>) -> impl IntoResponse {
    let status = checker.check_health().await;
    let code = if status.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

async fn readiness(State(checker): State<HealthChecker>) -> impl IntoResponse {
    let status = checker.check_health().await;
    if status.is_healthy() {
        (StatusCode::OK, Json(serde_json::json!({ "ready": true })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "ready": false })),
        )
    }
}

async fn liveness() -> impl IntoResponse {
    Json(serde_json::json!({ "alive": true }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting Pambo payments service"
    );

    let app_config = AppConfig::from_env()?;
    app_config.validate()?;
    info!(
        host = %app_config.server.host,
        port = app_config.server.port,
        signature_enforcement = ?app_config.callback.enforcement,
        replay_window_secs = app_config.callback.max_age_secs,
        "Configuration loaded"
    );

    info!("📊 Initializing database connection pool...");
    let db_pool = database::init_pool_from_config(&app_config.database)
        .await
        .map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            anyhow::anyhow!(e.to_string())
        })?;
    info!("✅ Database connection pool initialized");

    let store = Arc::new(PgReconcilerStore::new(db_pool.clone()));
    let reconciler = Arc::new(PaymentReconciler::new(store.clone()));
    let replay_guard = Arc::new(ReplayGuard::new(
        store,
        ReplayPolicy::new(
            app_config.callback.max_age_secs,
            app_config.callback.require_nonce,
        ),
    ));
    let signature = SignaturePolicy::new(
        app_config.callback.shared_secret.clone(),
        app_config.callback.enforcement,
    );

    let callback_state = api::callbacks::CallbackState {
        reconciler,
        replay_guard,
        signature,
    };
    let callback_routes = Router::new()
        .route(
            "/callbacks/{gateway}",
            post(api::callbacks::handle_callback),
        )
        .with_state(callback_state);

    // Payment initiation needs gateway credentials; the callback side runs
    // without them so reconciliation keeps working while credentials rotate.
    let payment_routes = match DarajaClient::from_env() {
        Ok(daraja) => {
            let checkout = Arc::new(CheckoutService::new(
                daraja,
                PendingPaymentRepository::new(db_pool.clone()),
            ));
            let subscriptions = Arc::new(SubscriptionService::new(
                ProfileRepository::new(db_pool.clone()),
                PendingPaymentRepository::new(db_pool.clone()),
            ));
            let payments_state = api::payments::PaymentsState {
                checkout,
                subscriptions,
            };
            Router::new()
                .route(
                    "/api/payments/initiate",
                    post(api::payments::initiate_payment),
                )
                .route(
                    "/api/subscriptions/{user_id}/rederive",
                    post(api::payments::rederive_subscription),
                )
                .with_state(payments_state)
        }
        Err(e) => {
            warn!(error = %e, "⏭️  Skipping payment initiation routes (gateway not configured)");
            Router::new()
        }
    };

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .with_state(HealthChecker::new(db_pool.clone()));

    let allowed_origins = Arc::new(app_config.server.cors_allowed_origins.clone());
    let app = Router::new()
        .route("/", get(root))
        .merge(health_routes)
        .merge(callback_routes)
        .merge(payment_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(axum::middleware::from_fn_with_state(
                    allowed_origins,
                    origin_guard,
                )),
        );

    info!("✅ Routes configured");

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let pruner = workers::nonce_pruner::NoncePrunerWorker::new(
        NonceRepository::new(db_pool.clone()),
        app_config.callback.nonce_prune_interval_secs,
    );
    let pruner_handle = tokio::spawn(pruner.run(worker_shutdown_rx));

    let addr: SocketAddr =
        format!("{}:{}", app_config.server.host, app_config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);
    info!("✅ Server is ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(5), pruner_handle).await {
        error!(error = %e, "Timed out waiting for nonce pruner shutdown");
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
