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
    dtos::labordtos::*,
    error::HttpError,
    middleware::{
        guard::{enforce, REQUIRE_ADMIN, REQUIRE_CLIENT},
        JWTAuthMiddeware,
    },
    service::lifecycle::JobAction,
    utils::geo::GeoPoint,
    AppState,
};

pub fn jobs_handler() -> Router {
    Router::new()
        .route(
            "/",
            get(list_my_jobs)
                .merge(post(create_job).layer(middleware::from_fn_with_state(REQUIRE_CLIENT, enforce))),
        )
        .route("/nearby", get(find_nearby_jobs))
        .route("/:job_id", get(get_job))
        .route("/:job_id/auto-assign", post(auto_assign))
        .route(
            "/:job_id/reassign",
            post(reassign).layer(middleware::from_fn_with_state(REQUIRE_ADMIN, enforce)),
        )
        .route("/:job_id/take", post(take_job))
        .route("/:job_id/accept", post(accept_job))
        .route("/:job_id/reject", post(reject_job))
        .route("/:job_id/depart", post(depart))
        .route("/:job_id/arrive", post(arrive))
        .route("/:job_id/start", post(start_job))
        .route("/:job_id/complete", post(complete_job))
        .route("/:job_id/cancel", post(cancel_job))
        .route("/:job_id/review", post(add_review))
        .route("/:job_id/incidents", post(report_incident))
        .route("/:job_id/chat", post(ensure_job_chat))
        .route("/:job_id/read", put(mark_job_read))
}

pub async fn create_job(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<CreateJobDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let job = app_state.labour_service.create_job(&auth.user, body).await?;

    Ok(Json(ApiResponse::success("Job created successfully", job)))
}

pub async fn list_my_jobs(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let jobs = app_state.labour_service.list_my_jobs(&auth.user).await?;

    Ok(Json(ApiResponse::success("Jobs retrieved successfully", jobs)))
}

pub async fn get_job(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let view = app_state.labour_service.get_job_view(&auth.user, job_id).await?;

    Ok(Json(ApiResponse::success("Job retrieved successfully", view)))
}

pub async fn find_nearby_jobs(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Query(params): Query<NearbyJobsQuery>,
) -> Result<impl IntoResponse, HttpError> {
    params.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let jobs = app_state
        .matching_service
        .find_nearby_jobs(&auth.user, GeoPoint::new(params.lat, params.lng), params.radius_km)
        .await?;

    Ok(Json(ApiResponse::success("Nearby jobs retrieved successfully", jobs)))
}

pub async fn auto_assign(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let outcome = app_state
        .matching_service
        .assign_worker_auto(&auth.user, job_id)
        .await?;

    Ok(Json(ApiResponse::success("Assignment attempted", outcome)))
}

pub async fn reassign(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let outcome = app_state
        .matching_service
        .reassign_worker_if_needed(&auth.user, job_id)
        .await?;

    Ok(Json(ApiResponse::success("Reassignment checked", outcome)))
}

async fn transition(
    app_state: Arc<AppState>,
    auth: JWTAuthMiddeware,
    job_id: Uuid,
    action: JobAction,
    body: Option<Json<JobActionDto>>,
) -> Result<Json<ApiResponse<crate::models::labourmodel::Job>>, HttpError> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let job = app_state
        .labour_service
        .apply_action(&auth.user, job_id, action, body.expected_version, body.reason)
        .await?;

    Ok(Json(ApiResponse::success(
        &format!("Job {} successful", action),
        job,
    )))
}

pub async fn take_job(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
    body: Option<Json<JobActionDto>>,
) -> Result<impl IntoResponse, HttpError> {
    transition(app_state, auth, job_id, JobAction::Take, body).await
}

pub async fn accept_job(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
    body: Option<Json<JobActionDto>>,
) -> Result<impl IntoResponse, HttpError> {
    transition(app_state, auth, job_id, JobAction::Accept, body).await
}

pub async fn reject_job(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
    body: Option<Json<JobActionDto>>,
) -> Result<impl IntoResponse, HttpError> {
    transition(app_state, auth, job_id, JobAction::Reject, body).await
}

pub async fn depart(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
    body: Option<Json<JobActionDto>>,
) -> Result<impl IntoResponse, HttpError> {
    transition(app_state, auth, job_id, JobAction::Depart, body).await
}

pub async fn arrive(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
    body: Option<Json<JobActionDto>>,
) -> Result<impl IntoResponse, HttpError> {
    transition(app_state, auth, job_id, JobAction::Arrive, body).await
}

pub async fn start_job(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
    body: Option<Json<JobActionDto>>,
) -> Result<impl IntoResponse, HttpError> {
    transition(app_state, auth, job_id, JobAction::Start, body).await
}

pub async fn complete_job(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
    body: Option<Json<JobActionDto>>,
) -> Result<impl IntoResponse, HttpError> {
    transition(app_state, auth, job_id, JobAction::Complete, body).await
}

pub async fn cancel_job(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
    body: Option<Json<JobActionDto>>,
) -> Result<impl IntoResponse, HttpError> {
    transition(app_state, auth, job_id, JobAction::Cancel, body).await
}

pub async fn add_review(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
    Json(body): Json<CreateReviewDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let review = app_state
        .labour_service
        .add_review_if_valid(&auth.user, job_id, body.rating, body.comment)
        .await?;

    Ok(Json(ApiResponse::success("Review submitted successfully", review)))
}

pub async fn report_incident(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
    Json(body): Json<ReportIncidentDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let incident = app_state
        .labour_service
        .report_incident(&auth.user, job_id, body.description)
        .await?;

    Ok(Json(ApiResponse::success("Incident reported", incident)))
}

pub async fn ensure_job_chat(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let chat = app_state.chat_service.ensure_chat_for_job(&auth.user, job_id).await?;

    Ok(Json(ApiResponse::success("Chat ready", chat)))
}

pub async fn mark_job_read(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let updated = app_state.chat_service.mark_job_read(&auth.user, job_id).await?;

    Ok(Json(ApiResponse::success(
        "Messages marked as read",
        crate::dtos::chatdtos::MarkReadDto { updated },
    )))
}
