use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    response::IntoResponse,
    routing::{get, put},
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{labordtos::*, userdtos::*},
    error::HttpError,
    middleware::JWTAuthMiddeware,
    models::usermodel::UserRole,
    AppState,
};

pub fn admin_handler() -> Router {
    Router::new()
        .route("/cashiers", put(set_cashier))
        .route("/drivers/pending", get(pending_drivers))
        .route("/drivers/:driver_id/approval", put(approve_driver))
        .route("/workers/:worker_id/verification", put(verify_worker))
        .route("/profiles", get(list_profiles))
        .route("/incidents", get(list_incidents))
        .route("/incidents/:incident_id/resolve", put(resolve_incident))
}

#[derive(Debug, Deserialize)]
pub struct ProfileListQuery {
    pub role: UserRole,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn set_cashier(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<SetCashierDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let profile = app_state
        .account_service
        .admin_set_cashier(&auth.user, &body.email, body.enabled)
        .await?;

    Ok(Json(ApiResponse::success(
        "Cashier flag updated",
        FilterProfileDto::filter_profile(&profile),
    )))
}

pub async fn pending_drivers(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let drivers = app_state.account_service.pending_drivers(&auth.user).await?;

    Ok(Json(ApiResponse::success("Pending drivers retrieved", drivers)))
}

pub async fn approve_driver(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(driver_id): Path<Uuid>,
    Json(body): Json<ApprovalDto>,
) -> Result<impl IntoResponse, HttpError> {
    let driver = app_state
        .account_service
        .admin_approve_driver(&auth.user, driver_id, body.approved)
        .await?;

    Ok(Json(ApiResponse::success("Driver approval updated", driver)))
}

pub async fn verify_worker(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(worker_id): Path<Uuid>,
    Json(body): Json<ApprovalDto>,
) -> Result<impl IntoResponse, HttpError> {
    let worker = app_state
        .account_service
        .admin_verify_worker(&auth.user, worker_id, body.approved)
        .await?;

    Ok(Json(ApiResponse::success("Worker verification updated", worker)))
}

pub async fn list_profiles(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Query(params): Query<ProfileListQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let profiles = app_state
        .account_service
        .list_profiles(
            &auth.user,
            params.role,
            params.limit.unwrap_or(50),
            params.offset.unwrap_or(0),
        )
        .await?;

    let profiles: Vec<FilterProfileDto> = profiles
        .iter()
        .map(FilterProfileDto::filter_profile)
        .collect();

    Ok(Json(ApiResponse::success("Profiles retrieved", profiles)))
}

pub async fn list_incidents(
    Extension(app_state): Extension<Arc<AppState>>,
    Query(params): Query<IncidentFilterQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let incidents = app_state.labour_service.list_incidents(params.status).await?;

    Ok(Json(ApiResponse::success("Incidents retrieved", incidents)))
}

pub async fn resolve_incident(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(incident_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let incident = app_state.labour_service.resolve_incident(incident_id).await?;

    Ok(Json(ApiResponse::success("Incident resolved", incident)))
}
