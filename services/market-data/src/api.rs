//! HTTP query surface
//!
//! - `GET  /api/marketdata[?assetPairId=X]` one slice, or every indexed one
//! - `GET  /api/isalive`
//! - `GET  /api/metrics`
//! - `POST /api/intake/limit-orders`, `POST /api/intake/quotes` hand raw
//!   bodies to the matching subscriber and answer `202 Accepted`

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::error;
use types::ids::InstrumentId;

use crate::error::MarketDataError;
use crate::metrics::ServiceMetrics;
use crate::slice::MarketSlice;
use crate::snapshot::SnapshotReader;

pub const SERVICE_NAME: &str = "market-data";

#[derive(Clone)]
pub struct AppState {
    pub reader: SnapshotReader,
    pub metrics: Arc<ServiceMetrics>,
    pub limit_orders: mpsc::Sender<Vec<u8>>,
    pub quotes: mpsc::Sender<Vec<u8>>,
}

/// HTTP-facing error
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<MarketDataError> for ApiError {
    fn from(err: MarketDataError) -> Self {
        match err {
            MarketDataError::StoreUnavailable(_) | MarketDataError::Timeout(_) => {
                ApiError::ServiceUnavailable(err.to_string())
            }
            MarketDataError::MalformedEvent(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, msg, "SERVICE_UNAVAILABLE")
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "BAD_REQUEST"),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    "INTERNAL_ERROR",
                )
            }
        };

        let body = Json(json!({
            "error": code,
            "message": message
        }));

        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct MarketDataQuery {
    #[serde(rename = "assetPairId")]
    pub asset_pair_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IsAlive {
    pub name: String,
    pub version: String,
}

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/marketdata", get(get_market_data))
        .route("/isalive", get(is_alive))
        .route("/metrics", get(metrics))
        .route("/intake/limit-orders", post(intake_limit_orders))
        .route("/intake/quotes", post(intake_quotes));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_market_data(
    State(state): State<AppState>,
    Query(query): Query<MarketDataQuery>,
) -> Result<Json<Vec<MarketSlice>>, ApiError> {
    let slices = match query.asset_pair_id.and_then(|id| InstrumentId::try_new(id)) {
        Some(instrument) => vec![state.reader.get_snapshot(&instrument).await?],
        None => state.reader.get_all_snapshots().await?,
    };
    Ok(Json(slices))
}

async fn is_alive() -> Json<IsAlive> {
    Json(IsAlive {
        name: SERVICE_NAME.to_string(),
        version: crate::SERVICE_VERSION.to_string(),
    })
}

async fn metrics(State(state): State<AppState>) -> Json<BTreeMap<String, u64>> {
    Json(state.metrics.export())
}

async fn intake_limit_orders(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    enqueue(&state.limit_orders, body).await
}

async fn intake_quotes(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, ApiError> {
    enqueue(&state.quotes, body).await
}

async fn enqueue(tx: &mpsc::Sender<Vec<u8>>, body: Bytes) -> Result<StatusCode, ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("empty body".to_string()));
    }
    tx.send(body.to_vec())
        .await
        .map_err(|_| ApiError::ServiceUnavailable("subscriber stopped".to_string()))?;
    Ok(StatusCode::ACCEPTED)
}
