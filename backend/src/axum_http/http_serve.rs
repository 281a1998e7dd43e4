use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use crates::{
    domain::{
        repositories::entitlements::EntitlementRepository, value_objects::trials::TrialPolicy,
    },
    infra::db::{
        postgres::postgres_connection::PgPoolSquad, repositories::entitlements::EntitlementPostgres,
    },
    purchases::verifier::PurchaseVerifier,
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::{
    auth::JwtAuthenticator,
    axum_http::{default_routers, routers},
    config::config_model::{BackendServer, DotEnvyConfig},
    usecases::entitlements::EntitlementUseCase,
};

/// Full router with middleware. Shared by `start` and the HTTP contract tests.
pub fn app<R, V>(
    server: &BackendServer,
    entitlement_usecase: Arc<EntitlementUseCase<R, V>>,
    authenticator: JwtAuthenticator,
) -> Result<Router>
where
    R: EntitlementRepository + Send + Sync + 'static,
    V: PurchaseVerifier + Send + Sync + 'static,
{
    let app = Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/api/v1/subscription",
            routers::entitlements::routes(entitlement_usecase, authenticator),
        )
        .route("/api/v1/health-check", get(default_routers::health_check))
        .layer(TimeoutLayer::new(Duration::from_secs(server.timeout)))
        .layer(RequestBodyLimitLayer::new(
            (server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http());

    Ok(app)
}

pub async fn start<V>(
    config: Arc<DotEnvyConfig>,
    db_pool: Arc<PgPoolSquad>,
    purchase_verifier: Arc<V>,
) -> Result<()>
where
    V: PurchaseVerifier + Send + Sync + 'static,
{
    let entitlement_repository = EntitlementPostgres::new(Arc::clone(&db_pool));
    let entitlement_usecase = EntitlementUseCase::new(
        Arc::new(entitlement_repository),
        purchase_verifier,
        TrialPolicy::from_days(config.trial.duration_days),
        config.ops.enable_reset_endpoint,
    );
    let authenticator = JwtAuthenticator::new(&config.auth);

    let app = app(
        &config.backend_server,
        Arc::new(entitlement_usecase),
        authenticator,
    )?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.backend_server.port));
    let listener = TcpListener::bind(addr).await?;

    info!(
        port = config.backend_server.port,
        reset_endpoint = config.ops.enable_reset_endpoint,
        "Server is running"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
