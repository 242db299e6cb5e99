use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::usermodel::UserRole;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "document_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    IdFront,
    IdBack,
    Selfie,
    Certificate,
    License,
    VehicleRegistration,
    Insurance,
}

impl DocumentType {
    pub fn to_str(&self) -> &str {
        match self {
            DocumentType::IdFront => "id_front",
            DocumentType::IdBack => "id_back",
            DocumentType::Selfie => "selfie",
            DocumentType::Certificate => "certificate",
            DocumentType::License => "license",
            DocumentType::VehicleRegistration => "vehicle_registration",
            DocumentType::Insurance => "insurance",
        }
    }

    /// Documents a provider must have on file before their profile counts as complete.
    pub fn required_for(role: UserRole) -> &'static [DocumentType] {
        match role {
            UserRole::Worker => &[DocumentType::IdFront, DocumentType::IdBack, DocumentType::Selfie],
            UserRole::Taxi => &[
                DocumentType::License,
                DocumentType::VehicleRegistration,
                DocumentType::Insurance,
            ],
            UserRole::Client | UserRole::Admin => &[],
        }
    }

    pub fn is_complete(role: UserRole, on_file: &[DocumentType]) -> bool {
        Self::required_for(role)
            .iter()
            .all(|required| on_file.contains(required))
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Document {
    pub id: Uuid,
    pub user_id: Uuid,
    pub doc_type: DocumentType,
    pub bucket: String,
    pub path: String,
    pub public_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
