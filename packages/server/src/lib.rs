#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web query service for the crowd monitor.
//!
//! Serves read-only endpoints over the aggregate store:
//!
//! * `GET /health`
//! * `GET /stats?district_id=&limit=`
//! * `GET /stats/latest?district_id=`
//!
//! Handlers only ever report persisted data; ingestion problems surface in
//! the logs, not through this API.

pub mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, middleware, web};
use switchy_database::Database;

/// Shared application state.
pub struct AppState {
    /// Aggregate store handle used for reads.
    pub db: Arc<dyn Database>,
}

/// Registers the query routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health))
        .route("/stats", web::get().to(handlers::stats))
        .route("/stats/latest", web::get().to(handlers::latest));
}

/// Binds and runs the HTTP server until it is stopped (Ctrl-C or
/// `SIGTERM`, handled by actix).
///
/// # Errors
///
/// Returns an `std::io::Result` error if the HTTP server fails to bind or
/// encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server(state: web::Data<AppState>, bind_addr: &str, port: u16) -> std::io::Result<()> {
    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
