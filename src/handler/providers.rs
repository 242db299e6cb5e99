use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::workerdb::{VehicleUpdate, WorkerOnboarding, WorkerProfileUpdate},
    dtos::{labordtos::*, userdtos::*},
    error::HttpError,
    middleware::{
        guard::{enforce, REQUIRE_DRIVER, REQUIRE_PROVIDER},
        JWTAuthMiddeware,
    },
    utils::geo::GeoPoint,
    AppState,
};

/// Authenticated worker routes, nested under `/workers`.
pub fn workers_handler() -> Router {
    Router::new()
        .route("/me", get(get_my_worker_profile).put(update_my_worker_profile))
        .route("/me/ensure", post(ensure_worker_profile))
        .route("/me/skills", put(set_my_worker_skills))
        .route("/onboard", post(onboard_worker))
        .route("/:worker_id", get(get_worker_profile))
}

/// Public listing, merged next to `workers_handler` without auth.
pub fn public_workers_handler() -> Router {
    Router::new().route("/", get(list_workers))
}

pub fn drivers_handler() -> Router {
    Router::new()
        .route("/me", get(get_my_driver_profile))
        .route("/me/ensure", post(ensure_driver_profile))
        .route("/me/vehicle", put(update_my_vehicle))
        .layer(middleware::from_fn_with_state(REQUIRE_DRIVER, enforce))
}

pub fn providers_handler() -> Router {
    Router::new()
        .route("/me/location", put(report_location))
        .layer(middleware::from_fn_with_state(REQUIRE_PROVIDER, enforce))
}

pub fn documents_handler() -> Router {
    Router::new()
        .route("/", get(list_documents).put(record_document))
        .route("/upload-path", post(allocate_upload_path))
}

pub async fn list_workers(
    Extension(app_state): Extension<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> Result<impl IntoResponse, HttpError> {
    let workers = app_state.account_service.list_workers(params.limit).await?;

    Ok(Json(workers))
}

pub async fn ensure_worker_profile(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let worker = app_state.account_service.ensure_worker_profile(&auth.user).await?;

    Ok(Json(ApiResponse::success("Worker profile ready", worker)))
}

pub async fn get_my_worker_profile(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let worker = app_state.account_service.get_worker_profile(auth.user.id).await?;

    Ok(Json(ApiResponse::success("Worker profile retrieved", worker)))
}

pub async fn get_worker_profile(
    Extension(app_state): Extension<Arc<AppState>>,
    Path(worker_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let worker = app_state.account_service.get_worker_profile(worker_id).await?;

    Ok(Json(ApiResponse::success("Worker profile retrieved", worker)))
}

pub async fn set_my_worker_skills(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<SetSkillsDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let worker = app_state
        .account_service
        .set_my_worker_skills(&auth.user, &body.skills)
        .await?;

    Ok(Json(ApiResponse::success("Skills updated", worker)))
}

pub async fn update_my_worker_profile(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<UpdateWorkerProfileDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let update = WorkerProfileUpdate {
        bio: body.bio,
        status: body.status,
    };
    let worker = app_state
        .account_service
        .update_my_worker_profile(&auth.user, update)
        .await?;

    Ok(Json(ApiResponse::success("Worker profile updated", worker)))
}

pub async fn onboard_worker(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<OnboardWorkerDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let onboarding = WorkerOnboarding {
        full_name: body.full_name,
        phone: body.phone,
        bio: body.bio,
        skills: body.skills,
        lat: body.lat,
        lng: body.lng,
    };
    let worker = app_state
        .account_service
        .onboard_worker(&auth.user, onboarding)
        .await?;

    Ok(Json(ApiResponse::success("Welcome aboard", worker)))
}

pub async fn ensure_driver_profile(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let driver = app_state.account_service.ensure_driver_profile(&auth.user).await?;

    Ok(Json(ApiResponse::success("Driver profile ready", driver)))
}

pub async fn get_my_driver_profile(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    // The driver row is created lazily on first visit.
    let driver = app_state.account_service.ensure_driver_profile(&auth.user).await?;

    Ok(Json(ApiResponse::success("Driver profile retrieved", driver)))
}

pub async fn update_my_vehicle(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<UpdateVehicleDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let update = VehicleUpdate {
        vehicle_make: body.vehicle_make,
        vehicle_model: body.vehicle_model,
        vehicle_plate: body.vehicle_plate.map(|plate| plate.trim().to_uppercase()),
        vehicle_color: body.vehicle_color,
    };
    let driver = app_state.account_service.update_my_vehicle(&auth.user, update).await?;

    Ok(Json(ApiResponse::success("Vehicle updated", driver)))
}

pub async fn report_location(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<LocationDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let update = app_state
        .location_service
        .report(&auth.user, GeoPoint::new(body.lat, body.lng))
        .await?;

    Ok(Json(update))
}

pub async fn allocate_upload_path(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<UploadPathDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let target = app_state
        .account_service
        .allocate_upload_path(&auth.user, body.bucket, &body.label, &body.ext)?;

    Ok(Json(ApiResponse::success(
        "Upload path allocated",
        UploadTargetDto {
            bucket: target.bucket.as_str().to_string(),
            path: target.path,
            public_url: target.public_url,
        },
    )))
}

pub async fn record_document(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<RecordDocumentDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let status = app_state
        .account_service
        .record_document(&auth.user, body.doc_type, body.bucket, body.path.trim())
        .await?;

    Ok(Json(ApiResponse::success("Document saved", status)))
}

pub async fn list_documents(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let documents = app_state.account_service.list_documents(&auth.user).await?;

    Ok(Json(ApiResponse::success("Documents retrieved", documents)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, db::db::DBClient};
    use axum::{body::Body, http::{Request, StatusCode}};
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_worker_listing_build_guard_skips_database() {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/fixlink")
            .unwrap();
        let mut config = Config::for_tests();
        config.app_phase = "build".to_string();
        let app_state = Arc::new(AppState::new(DBClient::new(pool), config));

        let app = public_workers_handler().layer(Extension(app_state));
        let response = app
            .oneshot(Request::builder().uri("/?limit=5").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"[]");
    }
}
