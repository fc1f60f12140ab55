//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and query parsing helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use splitledger_infra::{LedgerService, LedgerStore};

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Service type shared by every handler.
pub type AppService = LedgerService<Arc<dyn LedgerStore>>;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(service: AppService) -> Router {
    // Protected routes: require a member context.
    let protected = routes::router()
        .layer(ServiceBuilder::new().layer(Extension(service)))
        .layer(axum::middleware::from_fn(middleware::member_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}
