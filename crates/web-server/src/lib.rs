//! # Web Server Crate
//!
//! The HTTP surface of the DCA engine: plan CRUD, manual execution, the
//! transaction ledger, portfolio valuation, credential management, and the
//! watchlist. Routing and state live here; all domain behavior is delegated
//! to the service crates.

use axum::{
    Router,
    routing::{get, post, put},
};
use configuration::Settings;
use database::DbRepository;
use exchange::{ClientFactory, ExchangeApi};
use executor::TradeExecutor;
use scheduler::Scheduler;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, Any, CorsLayer, ExposeHeaders},
    trace::TraceLayer,
};
use valuation::PortfolioValuator;
use vault::CredentialVault;

pub mod error;
pub mod handlers;

/// The shared application state that all handlers can access.
pub struct AppState {
    pub settings: Arc<Settings>,
    pub repo: DbRepository,
    pub vault: Arc<CredentialVault>,
    pub scheduler: Arc<Scheduler>,
    pub executor: Arc<TradeExecutor>,
    pub valuator: Arc<PortfolioValuator>,
    pub factory: Arc<dyn ClientFactory>,
    pub public_client: Arc<dyn ExchangeApi>,
}

/// Builds the application router with CORS and request tracing.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(Any)
        .allow_headers(AllowHeaders::any())
        .expose_headers(ExposeHeaders::any());

    Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route(
            "/api/plans",
            get(handlers::list_plans).post(handlers::create_plan),
        )
        .route(
            "/api/plans/:id",
            put(handlers::update_plan).delete(handlers::delete_plan),
        )
        .route("/api/plans/:id/status", put(handlers::set_plan_status))
        .route("/api/plans/:id/execute", post(handlers::execute_plan))
        .route("/api/transactions", get(handlers::list_transactions))
        .route("/api/assets/overview", get(handlers::asset_overview))
        .route("/api/assets/history", get(handlers::asset_history))
        .route(
            "/api/credentials",
            get(handlers::get_credentials).put(handlers::put_credentials),
        )
        .route("/api/credentials/test", post(handlers::test_credentials))
        .route(
            "/api/watchlist",
            get(handlers::get_watchlist).put(handlers::put_watchlist),
        )
        .route("/api/symbols/popular", get(handlers::popular_symbols))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Binds the listener and serves until the process exits.
pub async fn run_server(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("web server listening on {addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
