use std::sync::Arc;

use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::IntoResponse,
    Extension,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

use crate::{
    db::userdb::ProfileExt,
    error::{ErrorMessage, HttpError},
    models::usermodel::Profile,
    utils::token,
    AppState,
};

pub mod guard;
pub mod rate_limit;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JWTAuthMiddeware {
    pub user: Profile,
}

/// Cookie `token`, then `Authorization: Bearer`, then `?token=` (browsers
/// cannot set headers on a WebSocket upgrade).
pub fn extract_token(cookie_jar: &CookieJar, req: &Request) -> Option<String> {
    cookie_jar
        .get("token")
        .map(|cookie| cookie.value().to_string())
        .or_else(|| {
            req.headers()
                .get(header::AUTHORIZATION)
                .and_then(|auth_header| auth_header.to_str().ok())
                .and_then(|auth_value| auth_value.strip_prefix("Bearer "))
                .map(|token| token.trim().to_owned())
        })
        .or_else(|| {
            req.uri().query().and_then(|query| {
                serde_urlencoded::from_str::<Vec<(String, String)>>(query)
                    .ok()?
                    .into_iter()
                    .find(|(key, _)| key == "token")
                    .map(|(_, value)| value)
            })
        })
        .filter(|token| !token.is_empty())
}

pub async fn auth(
    cookie_jar: CookieJar,
    Extension(app_state): Extension<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, HttpError> {
    let token = extract_token(&cookie_jar, &req)
        .ok_or_else(|| HttpError::unauthorized(ErrorMessage::TokenNotProvided.to_string()))?;

    let subject = token::decode_token(
        token,
        app_state.env.jwt_secret.as_bytes(),
        &app_state.env.jwt_audience,
    )
    .map_err(|_| HttpError::unauthorized(ErrorMessage::InvalidToken.to_string()))?;

    let user_id = uuid::Uuid::parse_str(&subject)
        .map_err(|_| HttpError::unauthorized(ErrorMessage::InvalidToken.to_string()))?;

    let user = app_state
        .db_client
        .get_profile(user_id)
        .await
        .map_err(|e| {
            tracing::error!("Profile lookup failed during auth: {}", e);
            HttpError::server_error(ErrorMessage::ServerError.to_string())
        })?
        .ok_or_else(|| HttpError::unauthorized(ErrorMessage::UserNoLongerExist.to_string()))?;

    req.extensions_mut().insert(JWTAuthMiddeware { user });

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::HeaderValue};

    fn request(uri: &str) -> Request {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[test]
    fn test_token_sources_in_order() {
        let empty = CookieJar::new();

        let mut req = request("/api/realtime?token=from-query");
        assert_eq!(extract_token(&empty, &req).as_deref(), Some("from-query"));

        req.headers_mut()
            .insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(extract_token(&empty, &req).as_deref(), Some("from-header"));

        let jar = CookieJar::new().add(axum_extra::extract::cookie::Cookie::new("token", "from-cookie"));
        assert_eq!(extract_token(&jar, &req).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_missing_or_blank_token() {
        let empty = CookieJar::new();
        assert!(extract_token(&empty, &request("/api/jobs")).is_none());
        assert!(extract_token(&empty, &request("/api/realtime?token=")).is_none());

        let mut req = request("/api/jobs");
        req.headers_mut()
            .insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(extract_token(&empty, &req).is_none());
    }
}
