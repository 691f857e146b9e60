use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::core::models::usage::{ServiceUsage, UsageSummary};
use crate::core::monitor::{MonitorError, UsageMonitor};

pub type AppState = Arc<UsageMonitor>;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// Maps monitor failures onto HTTP statuses.
#[derive(Debug)]
pub struct ApiError(MonitorError);

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MonitorError::UnknownService(_) => StatusCode::NOT_FOUND,
            MonitorError::Store(e) => {
                tracing::error!("store failure: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = ErrorBody {
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub async fn get_summary(State(monitor): State<AppState>) -> Result<Json<UsageSummary>, ApiError> {
    Ok(Json(monitor.summary().await?))
}

pub async fn get_service_usage(
    State(monitor): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<ServiceUsage>, ApiError> {
    Ok(Json(monitor.service_usage(&service).await?))
}

pub async fn refresh(State(monitor): State<AppState>) -> Result<Json<UsageSummary>, ApiError> {
    Ok(Json(monitor.refresh_all().await?))
}
