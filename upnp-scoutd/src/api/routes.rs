use std::collections::BTreeMap;
use std::sync::Arc;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::watch;
use shared::protocol::API_PREFIX;
use shared::types::{DeviceRecord, DiscoverySnapshot};
use crate::config::Config;
use crate::hash::compute_fingerprint;
use crate::survey::{Discovery, Survey, SurveyRequest};

pub type LatestSnapshot = Option<Arc<DiscoverySnapshot>>;

#[derive(Clone)]
pub struct AppState {
    pub survey: Arc<Survey>,
    /// Most recent completed discovery, replaced by every scan
    pub latest: Arc<watch::Sender<LatestSnapshot>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(survey: Survey, config: Config) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            survey: Arc::new(survey),
            latest: Arc::new(latest),
            config: Arc::new(config),
        }
    }

    fn snapshot(&self) -> Option<Arc<DiscoverySnapshot>> {
        self.latest.borrow().clone()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanQuery {
    pub host: Option<String>,
    pub st: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/config", get(get_config))
        .route("/scan", post(run_scan))
        .route("/devices", get(get_devices))
        .route("/devices/hash", get(get_hash))
        .route("/devices/:host", get(get_host));

    Router::new().nest(API_PREFIX, v1).with_state(state)
}

/// Freeze a discovery into an API snapshot
pub fn snapshot_of(discovery: Discovery) -> Result<DiscoverySnapshot, serde_json::Error> {
    Ok(DiscoverySnapshot {
        completed_at: chrono::Utc::now(),
        fingerprint: compute_fingerprint(&discovery.result)?,
        devices: discovery.result,
        scan: discovery.scan,
        skipped: discovery.skipped,
        socket_error: discovery.socket_error,
    })
}

async fn get_config(State(state): State<AppState>) -> Json<Config> {
    Json(state.config.as_ref().clone())
}

async fn run_scan(
    State(state): State<AppState>,
    Query(params): Query<ScanQuery>,
) -> Result<Json<DiscoverySnapshot>, (StatusCode, String)> {
    let request = SurveyRequest {
        host: params.host,
        search_target: params.st,
    };

    let discovery = state
        .survey
        .discover(&request)
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let snapshot = snapshot_of(discovery).map_err(|e| {
        tracing::error!("Failed to fingerprint discovery: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    tracing::info!("New snapshot {}", snapshot.fingerprint);
    state.latest.send_replace(Some(Arc::new(snapshot.clone())));
    Ok(Json(snapshot))
}

async fn get_devices(State(state): State<AppState>) -> Result<Json<DiscoverySnapshot>, StatusCode> {
    state
        .snapshot()
        .map(|snapshot| Json(snapshot.as_ref().clone()))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_hash(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .snapshot()
        .map(|snapshot| snapshot.fingerprint.clone())
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_host(
    State(state): State<AppState>,
    Path(host): Path<String>,
) -> Result<Json<BTreeMap<String, DeviceRecord>>, StatusCode> {
    state
        .snapshot()
        .and_then(|snapshot| snapshot.devices.get(&host).cloned())
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
