use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Client,
    Worker,
    Taxi,
    Admin,
}

impl UserRole {
    pub fn to_str(&self) -> &str {
        match self {
            UserRole::Client => "client",
            UserRole::Worker => "worker",
            UserRole::Taxi => "taxi",
            UserRole::Admin => "admin",
        }
    }

    pub fn parse(raw: &str) -> Option<UserRole> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "client" => Some(UserRole::Client),
            "worker" => Some(UserRole::Worker),
            "taxi" | "driver" => Some(UserRole::Taxi),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }

    /// Landing route of the front-end for this role.
    pub fn home_route(&self) -> &'static str {
        match self {
            UserRole::Client => "/client",
            UserRole::Worker => "/worker",
            UserRole::Taxi => "/driver",
            UserRole::Admin => "/admin",
        }
    }

    /// Roles a user may pick for themselves from the role selector.
    pub fn is_self_selectable(&self) -> bool {
        matches!(self, UserRole::Client | UserRole::Worker | UserRole::Taxi)
    }

    /// Workers and drivers are the two kinds of job providers.
    pub fn is_provider(&self) -> bool {
        matches!(self, UserRole::Worker | UserRole::Taxi)
    }
}

#[derive(Debug, Deserialize, Serialize, sqlx::FromRow, Clone)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub role: UserRole,
    pub verified: bool,
    pub is_cashier: bool,
    pub balance: BigDecimal,
    pub subscription_expires_at: Option<DateTime<Utc>>,
    pub version: i32,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn has_active_subscription(&self, now: DateTime<Utc>) -> bool {
        self.subscription_expires_at.map(|at| at > now).unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) fn test_profile(role: UserRole) -> Profile {
    let now = Utc::now();
    Profile {
        id: Uuid::new_v4(),
        email: format!("{}@example.com", role.to_str()),
        full_name: Some("Test User".to_string()),
        phone: None,
        avatar_url: None,
        role,
        verified: true,
        is_cashier: false,
        balance: BigDecimal::from(0),
        subscription_expires_at: None,
        version: 1,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_accepts_driver_alias() {
        assert_eq!(UserRole::parse("driver"), Some(UserRole::Taxi));
        assert_eq!(UserRole::parse(" Worker "), Some(UserRole::Worker));
        assert_eq!(UserRole::parse("cashier"), None);
    }

    #[test]
    fn test_admin_is_not_self_selectable() {
        assert!(!UserRole::Admin.is_self_selectable());
        assert!(UserRole::Taxi.is_self_selectable());
        assert_eq!(UserRole::Taxi.home_route(), "/driver");
    }

    #[test]
    fn test_subscription_expiry() {
        let mut profile = test_profile(UserRole::Client);
        let now = Utc::now();
        assert!(!profile.has_active_subscription(now));
        profile.subscription_expires_at = Some(now + chrono::Duration::days(3));
        assert!(profile.has_active_subscription(now));
    }
}
