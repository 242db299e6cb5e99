use std::sync::Arc;

use axum::{
    extract::Path,
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{chatdtos::*, labordtos::ApiResponse, userdtos::DirectChatDto},
    error::HttpError,
    middleware::JWTAuthMiddeware,
    AppState,
};

pub fn chat_handler() -> Router {
    Router::new()
        .route("/", get(list_chats))
        .route("/direct", post(open_direct_chat))
        .route("/unread-total", get(unread_total))
        .route("/:chat_id/messages", get(list_messages).post(post_message))
        .route("/:chat_id/read", put(mark_chat_read))
}

pub async fn list_chats(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let chats = app_state.chat_service.list_chats(&auth.user).await?;

    Ok(Json(ApiResponse::success("Chats retrieved successfully", chats)))
}

pub async fn open_direct_chat(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<DirectChatDto>,
) -> Result<impl IntoResponse, HttpError> {
    let chat = app_state
        .chat_service
        .open_direct_chat(&auth.user, body.user_id)
        .await?;

    Ok(Json(ApiResponse::success("Chat ready", chat)))
}

pub async fn list_messages(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(chat_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let messages = app_state.chat_service.list_messages(&auth.user, chat_id).await?;

    Ok(Json(ApiResponse::success("Messages retrieved successfully", messages)))
}

pub async fn post_message(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(chat_id): Path<Uuid>,
    Json(body): Json<PostMessageDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let message = app_state
        .chat_service
        .post_message(&auth.user, chat_id, &body.body)
        .await?;

    Ok(Json(ApiResponse::success("Message sent", message)))
}

pub async fn unread_total(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let total = app_state.chat_service.unread_total(&auth.user).await?;

    Ok(Json(ApiResponse::success("Unread total", UnreadTotalDto { total })))
}

pub async fn mark_chat_read(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Path(chat_id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpError> {
    let updated = app_state.chat_service.mark_chat_read(&auth.user, chat_id).await?;

    Ok(Json(ApiResponse::success("Messages marked as read", MarkReadDto { updated })))
}
