//! CourierDesk API Server
//!
//! Serves the credit ledger over HTTP: tenant balance, history and
//! deduction routes plus the platform admin routes.

use std::net::SocketAddr;

use axum::http::{header, HeaderName, HeaderValue, Method};
use courierdesk_api::{
    auth::{CLIENT_ID_HEADER, CLIENT_NAME_HEADER, ROLE_HEADER, USER_ID_HEADER},
    routes::create_router,
    AppState, Config,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,courierdesk_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting CourierDesk API Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(store = ?config.ledger_store, "Configuration loaded");

    let addr: SocketAddr = config.bind_address.parse()?;

    // Connect the ledger store (runs migrations when enabled)
    let state = AppState::connect(config).await?;

    // Default to localhost for development; production should set ALLOWED_ORIGINS
    let allowed_origins: Vec<HeaderValue> = std::env::var("ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    tracing::info!(
        allowed_origins = ?allowed_origins,
        "CORS configured with {} allowed origins",
        allowed_origins.len()
    );

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::ORIGIN,
            HeaderName::from_static(USER_ID_HEADER),
            HeaderName::from_static(CLIENT_ID_HEADER),
            HeaderName::from_static(ROLE_HEADER),
            HeaderName::from_static(CLIENT_NAME_HEADER),
        ])
        .expose_headers([header::CONTENT_TYPE]);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
