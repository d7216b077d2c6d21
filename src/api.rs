// src/api.rs
//! Query surface for the dashboard: city selection, a metric series and the raw rows.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::reading::Reading;
use crate::store::{Point, TimeSeriesStore};

#[derive(Clone)]
pub struct AppState {
    store: TimeSeriesStore,
}

pub fn router(store: TimeSeriesStore) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/cities", get(cities))
        .route("/series", get(series))
        .route("/rows", get(rows))
        .layer(CorsLayer::very_permissive())
        .with_state(AppState { store })
}

async fn cities(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.store.cities())
}

#[derive(serde::Deserialize)]
struct SeriesQuery {
    city: Option<String>,
    #[serde(default = "default_metric")]
    metric: String,
}

fn default_metric() -> String {
    "temperature".to_string()
}

async fn series(
    State(state): State<AppState>,
    Query(q): Query<SeriesQuery>,
) -> Result<Json<Vec<Point>>, (StatusCode, String)> {
    let city = required_city(q.city.as_deref())?;
    Ok(Json(state.store.series(city, &q.metric)))
}

#[derive(serde::Deserialize)]
struct RowsQuery {
    city: Option<String>,
    limit: Option<usize>,
}

async fn rows(
    State(state): State<AppState>,
    Query(q): Query<RowsQuery>,
) -> Result<Json<Vec<Reading>>, (StatusCode, String)> {
    let city = required_city(q.city.as_deref())?;
    Ok(Json(state.store.rows(city, q.limit)))
}

fn required_city(city: Option<&str>) -> Result<&str, (StatusCode, String)> {
    city.map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or((StatusCode::BAD_REQUEST, "missing 'city'".to_string()))
}
