// db/userdb.rs
use async_trait::async_trait;
use sqlx::types::BigDecimal;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::usermodel::{Profile, UserRole};

pub(crate) const PROFILE_COLUMNS: &str = r#"
    id, email, full_name, phone, avatar_url, role, verified, is_cashier,
    balance, subscription_expires_at, version, created_at, updated_at
"#;

#[async_trait]
pub trait ProfileExt {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, sqlx::Error>;

    async fn get_profile_by_email(&self, email: &str) -> Result<Option<Profile>, sqlx::Error>;

    /// Compare-and-swap on `version`; `None` means someone else wrote first.
    async fn update_profile_role(
        &self,
        user_id: Uuid,
        role: UserRole,
        expected_version: i32,
    ) -> Result<Option<Profile>, sqlx::Error>;

    async fn set_profile_verified(
        &self,
        user_id: Uuid,
        verified: bool,
    ) -> Result<Option<Profile>, sqlx::Error>;

    async fn set_cashier_by_email(
        &self,
        email: &str,
        enabled: bool,
    ) -> Result<Option<Profile>, sqlx::Error>;

    async fn credit_balance_by_email(
        &self,
        email: &str,
        amount: BigDecimal,
    ) -> Result<Option<Profile>, sqlx::Error>;

    /// Debits `price` and extends the subscription by `months`, only if the
    /// balance covers it. `None` means insufficient funds (or missing profile).
    async fn pay_subscription(
        &self,
        user_id: Uuid,
        price: BigDecimal,
        months: i32,
    ) -> Result<Option<Profile>, sqlx::Error>;

    async fn delete_profile(&self, user_id: Uuid) -> Result<u64, sqlx::Error>;

    async fn get_profiles_by_role(
        &self,
        role: UserRole,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Profile>, sqlx::Error>;
}

#[async_trait]
impl ProfileExt for DBClient {
    async fn get_profile(&self, user_id: Uuid) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!(
            "SELECT {} FROM profiles WHERE id = $1",
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_profile_by_email(&self, email: &str) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!(
            "SELECT {} FROM profiles WHERE LOWER(email) = LOWER($1)",
            PROFILE_COLUMNS
        ))
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await
    }

    async fn update_profile_role(
        &self,
        user_id: Uuid,
        role: UserRole,
        expected_version: i32,
    ) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!(
            r#"
            UPDATE profiles
            SET role = $2, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $3
            RETURNING {}
            "#,
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .bind(role)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await
    }

    async fn set_profile_verified(
        &self,
        user_id: Uuid,
        verified: bool,
    ) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!(
            r#"
            UPDATE profiles
            SET verified = $2, version = version + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .bind(verified)
        .fetch_optional(&self.pool)
        .await
    }

    async fn set_cashier_by_email(
        &self,
        email: &str,
        enabled: bool,
    ) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!(
            r#"
            UPDATE profiles
            SET is_cashier = $2, version = version + 1, updated_at = NOW()
            WHERE LOWER(email) = LOWER($1)
            RETURNING {}
            "#,
            PROFILE_COLUMNS
        ))
        .bind(email.trim())
        .bind(enabled)
        .fetch_optional(&self.pool)
        .await
    }

    async fn credit_balance_by_email(
        &self,
        email: &str,
        amount: BigDecimal,
    ) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!(
            r#"
            UPDATE profiles
            SET balance = balance + $2, version = version + 1, updated_at = NOW()
            WHERE LOWER(email) = LOWER($1)
            RETURNING {}
            "#,
            PROFILE_COLUMNS
        ))
        .bind(email.trim())
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
    }

    async fn pay_subscription(
        &self,
        user_id: Uuid,
        price: BigDecimal,
        months: i32,
    ) -> Result<Option<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!(
            r#"
            UPDATE profiles
            SET balance = balance - $2,
                subscription_expires_at =
                    GREATEST(COALESCE(subscription_expires_at, NOW()), NOW())
                    + make_interval(months => $3),
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND balance >= $2
            RETURNING {}
            "#,
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .bind(price)
        .bind(months)
        .fetch_optional(&self.pool)
        .await
    }

    async fn delete_profile(&self, user_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM profiles WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn get_profiles_by_role(
        &self,
        role: UserRole,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Profile>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!(
            r#"
            SELECT {} FROM profiles
            WHERE role = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            PROFILE_COLUMNS
        ))
        .bind(role)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }
}
