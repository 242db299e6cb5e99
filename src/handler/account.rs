use std::sync::Arc;

use axum::{
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use validator::Validate;

use crate::{
    dtos::{labordtos::ApiResponse, userdtos::*},
    error::HttpError,
    middleware::JWTAuthMiddeware,
    models::usermodel::UserRole,
    AppState,
};

pub const ROLE_COOKIE: &str = "app_role";
const ROLE_COOKIE_DAYS: i64 = 365;

pub fn account_handler() -> Router {
    Router::new()
        .route("/", get(get_me).delete(delete_account))
        .route("/home", get(resolve_home))
        .route("/role", put(select_role))
        .route("/subscription", post(pay_subscription))
}

pub fn cashier_handler() -> Router {
    Router::new().route("/credit", post(cashier_credit))
}

fn role_cookie(role: UserRole) -> Cookie<'static> {
    Cookie::build((ROLE_COOKIE, role.to_str().to_string()))
        .path("/")
        .max_age(time::Duration::days(ROLE_COOKIE_DAYS))
        .same_site(SameSite::Lax)
        .build()
}

pub async fn get_me(
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    Ok(Json(ApiResponse::success(
        "Profile retrieved",
        FilterProfileDto::filter_profile(&auth.user),
    )))
}

pub async fn resolve_home(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    jar: CookieJar,
) -> Result<impl IntoResponse, HttpError> {
    let cookie_role = jar
        .get(ROLE_COOKIE)
        .and_then(|cookie| UserRole::parse(cookie.value()));

    let resolution = app_state.account_service.home(&auth.user, cookie_role).await?;

    let jar = if resolution.refresh_cookie {
        jar.add(role_cookie(resolution.role))
    } else {
        jar
    };

    Ok((
        jar,
        Json(HomeResponseDto {
            role: resolution.role.to_str().to_string(),
            redirect_to: resolution.home.to_string(),
        }),
    ))
}

pub async fn select_role(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    jar: CookieJar,
    Json(body): Json<SelectRoleDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let profile = app_state
        .account_service
        .select_role(&auth.user, &body.role, body.expected_version)
        .await?;

    let jar = jar.add(role_cookie(profile.role));

    Ok((
        jar,
        Json(HomeResponseDto {
            role: profile.role.to_str().to_string(),
            redirect_to: profile.role.home_route().to_string(),
        }),
    ))
}

pub async fn pay_subscription(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<PaySubscriptionDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let profile = app_state
        .account_service
        .pay_subscription(&auth.user, body.months)
        .await?;

    Ok(Json(ApiResponse::success(
        "Subscription paid",
        FilterProfileDto::filter_profile(&profile),
    )))
}

pub async fn delete_account(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    jar: CookieJar,
) -> Result<impl IntoResponse, HttpError> {
    app_state.account_service.delete_account(&auth.user).await?;

    let jar = jar.remove(Cookie::build(ROLE_COOKIE).path("/").build());

    Ok((jar, Json(ApiResponse::success("Account deleted", ()))))
}

pub async fn cashier_credit(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    Json(body): Json<CashierCreditDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let profile = app_state
        .account_service
        .cashier_credit_by_email(&auth.user, &body.email, body.amount)
        .await?;

    Ok(Json(ApiResponse::success(
        "Balance credited",
        FilterProfileDto::filter_profile(&profile),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_cookie_lasts_a_year() {
        let cookie = role_cookie(UserRole::Taxi);
        assert_eq!(cookie.name(), "app_role");
        assert_eq!(cookie.value(), "taxi");
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::days(365)));
    }
}
