use std::sync::Arc;

use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::event::{parse_date, HistoricalEvent};
use crate::ingest::{IngestReport, Ingestor};

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/events", get(list_events))
        .route("/events/{id}", get(get_event))
        .route("/ingest", post(trigger_ingest))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(serde::Deserialize)]
struct RangeQuery {
    from: Option<String>,
    to: Option<String>,
}

fn internal(e: anyhow::Error) -> Response {
    tracing::warn!(error = ?e, "store read failed");
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response()
}

async fn list_events(
    State(state): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Vec<HistoricalEvent>>, Response> {
    for bound in [&q.from, &q.to].into_iter().flatten() {
        if parse_date(bound).is_none() {
            return Err((StatusCode::BAD_REQUEST, format!("bad date: {bound}")).into_response());
        }
    }

    let store = state.ingestor.store();
    let mut events = match (q.from.as_deref(), q.to.as_deref()) {
        (None, None) => store.get_all().await,
        (from, to) => {
            store
                .get_range(from.unwrap_or("0000-01-01"), to.unwrap_or("9999-12-31"))
                .await
        }
    }
    .map_err(internal)?;

    events.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
    Ok(Json(events))
}

async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HistoricalEvent>, Response> {
    match state.ingestor.store().get(&id).await.map_err(internal)? {
        Some(ev) => Ok(Json(ev)),
        None => Err((StatusCode::NOT_FOUND, "no such event").into_response()),
    }
}

async fn trigger_ingest(State(state): State<AppState>) -> Json<IngestReport> {
    Json(state.ingestor.run_ingest().await)
}
