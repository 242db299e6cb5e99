use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};

use crate::{
    error::{ErrorMessage, HttpError},
    models::usermodel::{Profile, UserRole},
};

use super::JWTAuthMiddeware;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Role(UserRole),
    AnyRole(&'static [UserRole]),
    AdminOrCashier,
}

impl Requirement {
    pub fn is_met_by(&self, profile: &Profile) -> bool {
        match self {
            Requirement::Role(role) => profile.role == *role,
            Requirement::AnyRole(roles) => roles.contains(&profile.role),
            Requirement::AdminOrCashier => profile.is_admin() || profile.is_cashier,
        }
    }
}

/// Access rule for a group of routes and where to send people who fail it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteGuard {
    pub requirement: Requirement,
    pub redirect_to: &'static str,
}

pub const REQUIRE_ADMIN: RouteGuard = RouteGuard {
    requirement: Requirement::Role(UserRole::Admin),
    redirect_to: "/",
};

pub const REQUIRE_ADMIN_OR_CASHIER: RouteGuard = RouteGuard {
    requirement: Requirement::AdminOrCashier,
    redirect_to: "/",
};

pub const REQUIRE_CLIENT: RouteGuard = RouteGuard {
    requirement: Requirement::Role(UserRole::Client),
    redirect_to: "/role",
};

pub const REQUIRE_PROVIDER: RouteGuard = RouteGuard {
    requirement: Requirement::AnyRole(&[UserRole::Worker, UserRole::Taxi]),
    redirect_to: "/role",
};

pub const REQUIRE_DRIVER: RouteGuard = RouteGuard {
    requirement: Requirement::Role(UserRole::Taxi),
    redirect_to: "/role",
};

impl RouteGuard {
    pub fn check(&self, profile: &Profile) -> Result<(), HttpError> {
        if self.requirement.is_met_by(profile) {
            Ok(())
        } else {
            Err(HttpError::redirect(
                ErrorMessage::PermissionDenied.to_string(),
                self.redirect_to,
            ))
        }
    }
}

/// Layer with `middleware::from_fn_with_state(GUARD, enforce)` inside `auth`.
pub async fn enforce(
    State(guard): State<RouteGuard>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, HttpError> {
    let user = req
        .extensions()
        .get::<JWTAuthMiddeware>()
        .ok_or_else(|| HttpError::unauthorized(ErrorMessage::UserNotAuthenticated.to_string()))?;

    guard.check(&user.user)?;

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::usermodel::test_profile;
    use axum::{
        body::Body,
        http::StatusCode,
        middleware,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    #[test]
    fn test_predefined_guards() {
        let client = test_profile(UserRole::Client);
        let worker = test_profile(UserRole::Worker);
        let taxi = test_profile(UserRole::Taxi);
        let admin = test_profile(UserRole::Admin);

        assert!(REQUIRE_ADMIN.check(&admin).is_ok());
        assert!(REQUIRE_ADMIN.check(&client).is_err());

        assert!(REQUIRE_CLIENT.check(&client).is_ok());
        assert!(REQUIRE_CLIENT.check(&worker).is_err());

        assert!(REQUIRE_PROVIDER.check(&worker).is_ok());
        assert!(REQUIRE_PROVIDER.check(&taxi).is_ok());
        assert!(REQUIRE_PROVIDER.check(&client).is_err());

        assert!(REQUIRE_DRIVER.check(&taxi).is_ok());
        assert!(REQUIRE_DRIVER.check(&worker).is_err());
    }

    #[test]
    fn test_cashier_flag_passes_admin_or_cashier() {
        let mut cashier = test_profile(UserRole::Client);
        assert!(REQUIRE_ADMIN_OR_CASHIER.check(&cashier).is_err());
        cashier.is_cashier = true;
        assert!(REQUIRE_ADMIN_OR_CASHIER.check(&cashier).is_ok());
        assert!(REQUIRE_ADMIN_OR_CASHIER.check(&test_profile(UserRole::Admin)).is_ok());
    }

    #[test]
    fn test_rejection_carries_redirect() {
        let err = REQUIRE_PROVIDER.check(&test_profile(UserRole::Client)).unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.redirect_to.as_deref(), Some("/role"));

        let err = REQUIRE_ADMIN.check(&test_profile(UserRole::Worker)).unwrap_err();
        assert_eq!(err.redirect_to.as_deref(), Some("/"));
    }

    fn guarded(role: Option<UserRole>) -> Router {
        let router = Router::new()
            .route("/driver", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(REQUIRE_DRIVER, enforce));

        match role {
            Some(role) => router.layer(axum::Extension(JWTAuthMiddeware { user: test_profile(role) })),
            None => router,
        }
    }

    #[tokio::test]
    async fn test_enforce_layer() {
        let request = || Request::builder().uri("/driver").body(Body::empty()).unwrap();

        let ok = guarded(Some(UserRole::Taxi)).oneshot(request()).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let denied = guarded(Some(UserRole::Client)).oneshot(request()).await.unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        let body = axum::body::to_bytes(denied.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["redirect_to"], "/role");

        let anonymous = guarded(None).oneshot(request()).await.unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);
    }
}
