use crate::{
    AppState,
    handlers::auth::{health, login},
};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints that need no bearer token.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /api/health
        // Liveness probe for load balancers and the test harness.
        .route("/health", get(health))
        // POST /api/auth/login
        // Exchanges credentials for a JWT. The only way to obtain a token.
        .route("/auth/login", post(login))
}
