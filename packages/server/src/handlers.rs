//! HTTP handler functions for the crowd monitor query API.

use actix_web::{HttpResponse, web};
use crowd_monitor_database::{self as store, DbError};
use crowd_monitor_server_models::{
    ApiAggregate, ApiDetail, ApiHealth, LatestQueryParams, NOT_FOUND_DETAIL, StatsQueryParams,
};

use crate::AppState;

/// `GET /health`
///
/// Reports only that the process is serving requests, regardless of the
/// state of the processing loop.
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth::ok())
}

/// `GET /stats`
///
/// Lists aggregates newest first, optionally for one district.
pub async fn stats(
    state: web::Data<AppState>,
    params: web::Query<StatsQueryParams>,
) -> HttpResponse {
    let query = params.to_query();

    match store::query(state.db.as_ref(), &query).await {
        Ok(records) => {
            let aggregates: Vec<ApiAggregate> =
                records.into_iter().map(ApiAggregate::from).collect();
            HttpResponse::Ok().json(aggregates)
        }
        Err(e) => {
            log::error!("Failed to query aggregates: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to query aggregates"
            }))
        }
    }
}

/// `GET /stats/latest`
///
/// Returns the most recent aggregate for `district_id`, or `404` when the
/// district has none.
pub async fn latest(
    state: web::Data<AppState>,
    params: web::Query<LatestQueryParams>,
) -> HttpResponse {
    let Some(district_id) = params.district_id.as_deref().filter(|d| !d.is_empty()) else {
        return HttpResponse::BadRequest().json(ApiDetail::new("district_id is required"));
    };

    match store::latest(state.db.as_ref(), district_id).await {
        Ok(record) => HttpResponse::Ok().json(ApiAggregate::from(record)),
        Err(DbError::NotFound) => {
            log::debug!("No aggregates for district {district_id}");
            HttpResponse::NotFound().json(ApiDetail::new(NOT_FOUND_DETAIL))
        }
        Err(e) => {
            log::error!("Failed to load latest aggregate for {district_id}: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Failed to load latest aggregate"
            }))
        }
    }
}
