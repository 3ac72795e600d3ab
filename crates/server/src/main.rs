use std::sync::Arc;

use anyhow::Context;
use axum::{http::StatusCode, routing::get, Router};
use tokio::net::TcpListener;
use tracing::{info, warn};

use waypoint_server::auth::jwt::JwtAccessTokenService;
use waypoint_server::config::ServerConfig;
use waypoint_server::cors;
use waypoint_server::store::Stores;
use waypoint_server::ws;
use waypoint_server::ws::gateway::SessionGateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();

    if config.is_dev_jwt_secret() {
        warn!("WAYPOINT_JWT_SECRET is unset, using the development-only secret");
    }

    let jwt_service = Arc::new(
        JwtAccessTokenService::new(&config.jwt_secret).context("invalid session JWT secret")?,
    );
    let stores = Stores::from_env(config.database_url.as_deref())
        .await
        .context("failed to initialize session stores")?;
    let gateway = Arc::new(SessionGateway::new(stores));

    let app = build_router(gateway, jwt_service, config.cors_origins.clone());

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind session listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting session server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("session server exited unexpectedly")
}

fn build_router(
    gateway: Arc<SessionGateway>,
    jwt_service: Arc<JwtAccessTokenService>,
    cors_origins: Option<String>,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .merge(ws::router(gateway, jwt_service))
        .layer(cors::cors_layer_from(cors_origins))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use super::build_router;
    use waypoint_server::auth::jwt::JwtAccessTokenService;
    use waypoint_server::store::Stores;
    use waypoint_server::ws::gateway::SessionGateway;

    #[tokio::test]
    async fn health_check_responds_ok() {
        let jwt_service = Arc::new(
            JwtAccessTokenService::new("waypoint_test_secret_that_is_definitely_long_enough")
                .expect("test jwt service should initialize"),
        );
        let gateway = Arc::new(SessionGateway::new(Stores::in_memory()));
        let app = build_router(gateway, jwt_service, None);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
    }
}
