use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    models::{documentmodel::DocumentType, usermodel::Profile},
    utils::storage::Bucket,
};

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct SelectRoleDto {
    #[validate(length(min = 1, max = 20, message = "Role is required"))]
    pub role: String,

    pub expected_version: Option<i32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HomeResponseDto {
    pub role: String,
    pub redirect_to: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FilterProfileDto {
    pub id: String,
    pub email: String,
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub role: String,
    pub verified: bool,
    pub is_cashier: bool,
    pub balance: String,
    pub subscription_expires_at: Option<String>,
    pub version: i32,
}

impl FilterProfileDto {
    pub fn filter_profile(profile: &Profile) -> Self {
        FilterProfileDto {
            id: profile.id.to_string(),
            email: profile.email.to_owned(),
            full_name: profile.full_name.to_owned(),
            phone: profile.phone.to_owned(),
            avatar_url: profile.avatar_url.to_owned(),
            role: profile.role.to_str().to_string(),
            verified: profile.verified,
            is_cashier: profile.is_cashier,
            balance: profile.balance.to_string(),
            subscription_expires_at: profile.subscription_expires_at.map(|at| at.to_rfc3339()),
            version: profile.version,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct CashierCreditDto {
    #[validate(email(message = "Email is invalid"))]
    pub email: String,

    #[validate(range(min = 0.01, max = 10000000.0, message = "Amount must be positive"))]
    pub amount: f64,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct SetCashierDto {
    #[validate(email(message = "Email is invalid"))]
    pub email: String,

    pub enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct PaySubscriptionDto {
    #[serde(default = "one_month")]
    #[validate(range(min = 1, max = 12, message = "Months must be between 1 and 12"))]
    pub months: i32,
}

fn one_month() -> i32 {
    1
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct UploadPathDto {
    pub bucket: Bucket,

    #[validate(length(min = 1, max = 40, message = "Label must be between 1 and 40 characters"))]
    pub label: String,

    #[validate(length(min = 1, max = 8, message = "Extension must be between 1 and 8 characters"))]
    pub ext: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadTargetDto {
    pub bucket: String,
    pub path: String,
    pub public_url: String,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct RecordDocumentDto {
    pub doc_type: DocumentType,

    #[serde(default = "default_docs_bucket")]
    pub bucket: Bucket,

    #[validate(length(min = 1, max = 300, message = "Path is required"))]
    pub path: String,
}

fn default_docs_bucket() -> Bucket {
    Bucket::WorkerDocs
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DirectChatDto {
    pub user_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_defaults_to_one_month() {
        let dto: PaySubscriptionDto = serde_json::from_str("{}").unwrap();
        assert_eq!(dto.months, 1);
        assert!(dto.validate().is_ok());
    }

    #[test]
    fn test_cashier_credit_requires_email_and_positive_amount() {
        let ok = CashierCreditDto { email: "a@b.co".to_string(), amount: 10.0 };
        let bad_email = CashierCreditDto { email: "nope".to_string(), amount: 10.0 };
        let bad_amount = CashierCreditDto { email: "a@b.co".to_string(), amount: 0.0 };
        assert!(ok.validate().is_ok());
        assert!(bad_email.validate().is_err());
        assert!(bad_amount.validate().is_err());
    }

    #[test]
    fn test_document_bucket_defaults() {
        let dto: RecordDocumentDto = serde_json::from_value(serde_json::json!({
            "doc_type": "id_front",
            "path": "u/id_front_1.jpg"
        }))
        .unwrap();
        assert_eq!(dto.bucket, Bucket::WorkerDocs);
    }
}
