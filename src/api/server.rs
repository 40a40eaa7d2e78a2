use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

use crate::api::{ws, AppState, Coordinates};
use crate::error::ApiError;
use crate::gtfs::{RouteInfo, Stop};
use crate::matcher::{
    catalog_matches, detect_ride, nearby_routes, CatalogMatch, ClientTrace, LocationPoint,
    MatchError, MatchResult,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/trips/nearest_routes", get(nearest_routes))
        .route("/api/v1/trips/closest_stops", get(closest_stops))
        .route("/api/v1/trips/detection", post(trip_detection))
        .route("/api/v1/trips/location-match", post(location_match))
        .route("/ws/bus-positions", get(ws::bus_positions))
        .route("/ws/simulated", get(ws::simulated))
        .with_state(state)
}

pub async fn run_server(state: AppState, port: u16) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "starting HTTP server");
    axum::serve(listener, router(state)).await
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[derive(Serialize)]
struct RoutesResponse {
    routes: Vec<RouteInfo>,
}

#[derive(Serialize)]
struct StopsResponse<'a> {
    stops: &'a [Stop],
}

fn coordinates(query: Result<Query<Coordinates>, QueryRejection>) -> Result<Coordinates, ApiError> {
    query
        .map(|Query(at)| at)
        .map_err(|e| ApiError::Malformed(e.body_text()))
}

fn trace(body: Result<Json<Vec<LocationPoint>>, JsonRejection>) -> Result<ClientTrace, ApiError> {
    let Json(points) = body.map_err(|e| ApiError::Malformed(e.body_text()))?;
    Ok(ClientTrace::from_points(&points).map_err(MatchError::from)?)
}

async fn nearest_routes(
    State(state): State<AppState>,
    query: Result<Query<Coordinates>, QueryRejection>,
) -> Result<Json<RoutesResponse>, ApiError> {
    let at = coordinates(query)?;
    let routes = nearby_routes(
        state.store.as_ref(),
        &state.reference,
        at.latitude,
        at.longitude,
    )
    .await?;
    info!(routes = routes.len(), "nearest routes");
    Ok(Json(RoutesResponse { routes }))
}

async fn closest_stops(
    State(state): State<AppState>,
    query: Result<Query<Coordinates>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let at = coordinates(query)?;
    let stops = state
        .reference
        .stops_in_cell_of(at.latitude, at.longitude)
        .map_err(MatchError::from)?;
    info!(stops = stops.len(), "closest stops");
    Ok(Json(StopsResponse { stops }).into_response())
}

async fn trip_detection(
    State(state): State<AppState>,
    body: Result<Json<Vec<LocationPoint>>, JsonRejection>,
) -> Result<Json<MatchResult>, ApiError> {
    let trace = trace(body)?;
    let result = detect_ride(&trace, state.history.as_ref(), &state.detection);
    info!(
        points = result.total_count,
        matched = result.matched_count,
        on_bus = result.is_on_bus,
        "trip detection"
    );
    Ok(Json(result))
}

async fn location_match(
    State(state): State<AppState>,
    body: Result<Json<Vec<LocationPoint>>, JsonRejection>,
) -> Result<Json<CatalogMatch>, ApiError> {
    let trace = trace(body)?;
    let result = catalog_matches(&trace, state.history.as_ref(), &state.detection);
    info!(matches = result.total_matches, "location match");
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{cell_of, CellResolution};
    use crate::gtfs::{RawPosition, ReferenceData, Snapshot};
    use crate::matcher::{DetectionConfig, HistoricalSample, ProximityConfig, SampleLog};
    use crate::store::{HistoryStore, MemoryStore, LATEST_POSITIONS_KEY};
    use axum::body::Body;
    use axum::http::{header, Request};
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    const CLIENT: (f64, f64) = (49.2827, -123.1207);

    fn state(store: Arc<MemoryStore>, reference: ReferenceData, history: Vec<HistoricalSample>) -> AppState {
        AppState {
            store,
            reference: Arc::new(reference),
            history: Arc::new(SampleLog::new(history)),
            proximity: ProximityConfig::default(),
            detection: DetectionConfig::default(),
        }
    }

    fn empty_state() -> AppState {
        state(Arc::new(MemoryStore::default()), ReferenceData::default(), Vec::new())
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let response = router(empty_state()).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn nearest_routes_with_empty_store_is_empty() {
        let (status, body) = send(
            router(empty_state()),
            get("/api/v1/trips/nearest_routes?latitude=49.2827&longitude=-123.1207"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["routes"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn nearest_routes_reads_latest_snapshot() {
        let store = Arc::new(MemoryStore::default());
        let position = RawPosition {
            vehicle_id: "v1".into(),
            vehicle_label: None,
            trip_id: None,
            route_id: Some("099".into()),
            direction_id: None,
            latitude: Some(CLIENT.0),
            longitude: Some(CLIENT.1),
            current_stop_sequence: None,
            stop_id: None,
            current_status: None,
            timestamp: None,
            coarse_cell: cell_of(CLIENT.0, CLIENT.1, CellResolution::Coarse).ok(),
        };
        let snapshot = Snapshot::new(Utc::now(), 0, vec![position]);
        store
            .push_latest(LATEST_POSITIONS_KEY, serde_json::to_string(&snapshot).unwrap())
            .await
            .unwrap();

        let (status, body) = send(
            router(state(store, ReferenceData::default(), Vec::new())),
            get("/api/v1/trips/nearest_routes?latitude=49.2827&longitude=-123.1207"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["routes"][0]["route_id"], "099");
    }

    #[tokio::test]
    async fn out_of_range_coordinate_is_unprocessable() {
        let (status, body) = send(
            router(empty_state()),
            get("/api/v1/trips/closest_stops?latitude=95.0&longitude=0.0"),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status"], 422);
    }

    #[tokio::test]
    async fn missing_query_parameter_is_unprocessable() {
        let (status, _) = send(
            router(empty_state()),
            get("/api/v1/trips/closest_stops?latitude=49.0"),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn closest_stops_without_stops_is_empty() {
        let (status, body) = send(
            router(empty_state()),
            get("/api/v1/trips/closest_stops?latitude=49.2827&longitude=-123.1207"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stops"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn detection_matches_a_ride_along_recorded_history() {
        let history = vec![
            HistoricalSample {
                elapsed_seconds: 0.0,
                latitude: 49.2827,
                longitude: -123.1207,
                vehicle_id: None,
                route_id: None,
                timestamp: None,
            },
            HistoricalSample {
                elapsed_seconds: 5.0,
                latitude: 49.2854,
                longitude: -123.1207,
                vehicle_id: None,
                route_id: None,
                timestamp: None,
            },
        ];
        let app = router(state(
            Arc::new(MemoryStore::default()),
            ReferenceData::default(),
            history,
        ));

        let body = serde_json::json!([
            {"first_timestamp": "2025-03-01 08:00:00", "timestamp": "2025-03-01 08:00:00", "lat": 49.2827, "lon": -123.1207},
            {"first_timestamp": "2025-03-01 08:00:00", "timestamp": "2025-03-01 08:00:05", "lat": 49.2854, "lon": -123.1207}
        ]);
        let (status, result) = send(app, post_json("/api/v1/trips/detection", body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["is_on_bus"], true);
        assert_eq!(result["message"], "Matched 2/2 points (100.0%)");
    }

    #[tokio::test]
    async fn empty_trace_is_unprocessable() {
        let (status, _) = send(
            router(empty_state()),
            post_json("/api/v1/trips/detection", serde_json::json!([])),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn location_match_reports_stationary_trace() {
        let body = serde_json::json!([
            {"first_timestamp": "2025-03-01 08:00:00", "timestamp": "2025-03-01 08:00:00", "lat": 49.2827, "lon": -123.1207},
            {"first_timestamp": "2025-03-01 08:00:00", "timestamp": "2025-03-01 08:01:00", "lat": 49.2827, "lon": -123.1207}
        ]);
        let (status, result) = send(
            router(empty_state()),
            post_json("/api/v1/trips/location-match", body),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(result["total_matches"], 0);
        assert!(result["message"]
            .as_str()
            .unwrap()
            .starts_with("insufficient movement"));
    }
}
