//! # API Handlers
//!
//! Axum handlers for the plugin operations the dashboard host calls.

use crate::AppState;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vk_core::datasource::{CheckHealthResult, PublishStreamStatus, SubscribeStreamStatus};

#[derive(Debug, Deserialize)]
pub struct StreamPathRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct StreamStatusResponse<S> {
    pub status: S,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub ksql_server: String,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        ksql_server: state.datasource.settings().ksql_server.clone(),
    })
}

pub async fn check_health(State(state): State<Arc<AppState>>) -> Json<CheckHealthResult> {
    let result = state.datasource.check_health().await;
    tracing::info!("Health check: {:?} {}", result.status, result.message);
    Json(result)
}

pub async fn subscribe_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StreamPathRequest>,
) -> Json<StreamStatusResponse<SubscribeStreamStatus>> {
    Json(StreamStatusResponse {
        status: state.datasource.subscribe_stream(&req.path),
    })
}

pub async fn publish_stream(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StreamPathRequest>,
) -> Json<StreamStatusResponse<PublishStreamStatus>> {
    Json(StreamStatusResponse {
        status: state.datasource.publish_stream(&req.path),
    })
}
