//! Instance endpoints: create, inspect, deliver events, terminate.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateInstanceRequest {
    pub workflow: String,
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Deserialize)]
pub struct SubmitEventRequest {
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

/// POST /api/v1/instances
pub async fn create_instance(
    State(state): State<AppState>,
    Json(body): Json<CreateInstanceRequest>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    if body.workflow.trim().is_empty() {
        return Err(AppError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }

    let id = state
        .engine
        .create(&body.workflow, body.id, body.params)
        .await?;

    let response = ApiResponse::success(
        json!({ "id": id, "workflow": body.workflow }),
        request_id,
        start.elapsed().as_millis() as u64,
    )
    .with_link("self", &format!("/api/v1/instances/{id}"))
    .with_link("journal", &format!("/api/v1/instances/{id}/journal"));

    Ok(Json(response))
}

/// GET /api/v1/instances
pub async fn list_instances(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let instances = state.engine.list_instances().await?;
    let count = instances.len();

    let response = ApiResponse::success(
        json!({ "instances": instances, "count": count }),
        request_id,
        start.elapsed().as_millis() as u64,
    )
    .with_link("self", "/api/v1/instances");

    Ok(Json(response))
}

/// GET /api/v1/instances/{id}
pub async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let instance = state.engine.instance(id).await?;

    let response = ApiResponse::success(
        serde_json::to_value(&instance)
            .map_err(|e| AppError::Internal(e.to_string()))?,
        request_id,
        start.elapsed().as_millis() as u64,
    )
    .with_link("self", &format!("/api/v1/instances/{id}"))
    .with_link("journal", &format!("/api/v1/instances/{id}/journal"))
    .with_link("events", &format!("/api/v1/instances/{id}/events"));

    Ok(Json(response))
}

/// GET /api/v1/instances/{id}/journal
pub async fn get_journal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let records = state.engine.journal(id).await?;
    let count = records.len();

    let response = ApiResponse::success(
        json!({ "records": records, "count": count }),
        request_id,
        start.elapsed().as_millis() as u64,
    )
    .with_link("self", &format!("/api/v1/instances/{id}/journal"))
    .with_link("instance", &format!("/api/v1/instances/{id}"));

    Ok(Json(response))
}

/// POST /api/v1/instances/{id}/events
pub async fn submit_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SubmitEventRequest>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    if body.event_type.trim().is_empty() {
        return Err(AppError::Validation(
            "event_type must not be empty".to_string(),
        ));
    }

    state
        .engine
        .submit_event(id, &body.event_type, body.payload)
        .await?;

    let response = ApiResponse::success(
        json!({ "accepted": true, "event_type": body.event_type }),
        request_id,
        start.elapsed().as_millis() as u64,
    )
    .with_link("instance", &format!("/api/v1/instances/{id}"));

    Ok(Json(response))
}

/// POST /api/v1/instances/{id}/terminate
pub async fn terminate_instance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    state.engine.terminate(id).await?;
    let report = state.engine.status(id).await?;

    let response = ApiResponse::success(
        serde_json::to_value(&report)
            .map_err(|e| AppError::Internal(e.to_string()))?,
        request_id,
        start.elapsed().as_millis() as u64,
    )
    .with_link("instance", &format!("/api/v1/instances/{id}"));

    Ok(Json(response))
}

pub fn instance_routes() -> Router<AppState> {
    Router::new()
        .route("/instances", post(create_instance).get(list_instances))
        .route("/instances/{id}", get(get_instance))
        .route("/instances/{id}/journal", get(get_journal))
        .route("/instances/{id}/events", post(submit_event))
        .route("/instances/{id}/terminate", post(terminate_instance))
}
