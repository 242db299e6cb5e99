// routes.rs
use std::sync::Arc;

use axum::{middleware, routing::get, Extension, Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    db::cache::CacheHelper,
    handler::{
        account::{account_handler, cashier_handler},
        admin::admin_handler,
        chat::chat_handler,
        jobs::jobs_handler,
        ors::ors_handler,
        providers::{
            documents_handler, drivers_handler, providers_handler, public_workers_handler,
            workers_handler,
        },
        realtime::realtime_handler,
    },
    middleware::{
        auth,
        guard::{enforce, REQUIRE_ADMIN, REQUIRE_ADMIN_OR_CASHIER},
    },
    AppState,
};

async fn health_check(Extension(app_state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let redis = match &app_state.db_client.redis_client {
        Some(redis) => match CacheHelper::health_check(redis).await {
            Ok(true) => "ok",
            _ => "degraded",
        },
        None => "disabled",
    };

    Json(json!({
        "status": "ok",
        "message": "Server is running",
        "cache": redis,
        "change_feed_head": app_state.hub.head(),
    }))
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Guards sit inside `auth`, which is layered last so it runs first.
    let api_route = Router::new()
        .nest("/jobs", jobs_handler().layer(middleware::from_fn(auth)))
        .nest(
            "/workers",
            workers_handler()
                .layer(middleware::from_fn(auth))
                .merge(public_workers_handler()),
        )
        .nest("/drivers", drivers_handler().layer(middleware::from_fn(auth)))
        .nest("/providers", providers_handler().layer(middleware::from_fn(auth)))
        .nest("/documents", documents_handler().layer(middleware::from_fn(auth)))
        .nest("/profile", account_handler().layer(middleware::from_fn(auth)))
        .nest("/chats", chat_handler().layer(middleware::from_fn(auth)))
        .nest(
            "/cashier",
            cashier_handler()
                .layer(middleware::from_fn_with_state(REQUIRE_ADMIN_OR_CASHIER, enforce))
                .layer(middleware::from_fn(auth)),
        )
        .nest(
            "/admin",
            admin_handler()
                .layer(middleware::from_fn_with_state(REQUIRE_ADMIN, enforce))
                .layer(middleware::from_fn(auth)),
        )
        .nest("/realtime", realtime_handler().layer(middleware::from_fn(auth)))
        .nest("/ors", ors_handler())
        .layer(TraceLayer::new_for_http());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_route)
        .layer(Extension(app_state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, db::db::DBClient};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    fn router() -> Router {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/fixlink")
            .unwrap();
        create_router(Arc::new(AppState::new(DBClient::new(pool), Config::for_tests())))
    }

    async fn status(uri: &str, method: &str) -> StatusCode {
        router()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        assert_eq!(status("/health", "GET").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_routes_need_a_token() {
        assert_eq!(status("/api/jobs", "GET").await, StatusCode::UNAUTHORIZED);
        assert_eq!(status("/api/admin/drivers/pending", "GET").await, StatusCode::UNAUTHORIZED);
        assert_eq!(status("/api/cashier/credit", "POST").await, StatusCode::UNAUTHORIZED);
        assert_eq!(status("/api/realtime", "GET").await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bad_token_is_rejected() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/api/chats/unread-total")
                    .header("authorization", "Bearer not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_ors_is_public() {
        assert_eq!(status("/api/ors/route", "GET").await, StatusCode::BAD_REQUEST);
    }
}
