use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::labourmodel::*;

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct CreateJobDto {
    #[validate(length(min = 1, max = 50, message = "Skill must be between 1 and 50 characters"))]
    pub skill: String,

    #[validate(length(min = 1, max = 2000, message = "Description must be between 1 and 2000 characters"))]
    pub description: String,

    #[validate(length(max = 300, message = "Address must be at most 300 characters"))]
    pub address: Option<String>,

    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    pub lat: f64,

    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be between -180 and 180"))]
    pub lng: f64,

    #[validate(range(min = 0.0, message = "Price must not be negative"))]
    pub price: f64,

    pub schedule: Option<JobSchedule>,

    #[serde(default)]
    #[validate(length(max = 10, message = "At most 10 photos per job"))]
    pub photo_urls: Vec<String>,

    #[serde(default)]
    pub auto_assign: bool,
}

/// Optional body of the job action routes.
#[derive(Debug, Default, Deserialize, Serialize, Validate)]
pub struct JobActionDto {
    /// Version the screen rendered; omitted means "whatever is current".
    pub expected_version: Option<i32>,

    #[validate(length(max = 500, message = "Reason must be at most 500 characters"))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct CreateReviewDto {
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i32,

    #[validate(length(max = 1000, message = "Comment must be at most 1000 characters"))]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct NearbyJobsQuery {
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    pub lat: f64,

    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be between -180 and 180"))]
    pub lng: f64,

    pub radius_km: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct ReportIncidentDto {
    #[validate(length(min = 1, max = 2000, message = "Description must be between 1 and 2000 characters"))]
    pub description: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct IncidentFilterQuery {
    pub status: Option<IncidentStatus>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct LocationDto {
    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    pub lat: f64,

    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be between -180 and 180"))]
    pub lng: f64,
}

// Provider profile DTOs
#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct SetSkillsDto {
    #[validate(length(min = 1, max = 20, message = "Pick between 1 and 20 skills"))]
    pub skills: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct UpdateWorkerProfileDto {
    #[validate(length(max = 1000, message = "Bio must be at most 1000 characters"))]
    pub bio: Option<String>,

    pub status: Option<ProviderStatus>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct OnboardWorkerDto {
    #[validate(length(min = 2, max = 100, message = "Full name must be between 2 and 100 characters"))]
    pub full_name: String,

    #[validate(length(min = 7, max = 20, message = "Phone must be between 7 and 20 characters"))]
    pub phone: Option<String>,

    #[validate(length(max = 1000, message = "Bio must be at most 1000 characters"))]
    pub bio: Option<String>,

    #[validate(length(min = 1, max = 20, message = "Pick between 1 and 20 skills"))]
    pub skills: Vec<String>,

    #[validate(range(min = -90.0, max = 90.0, message = "Latitude must be between -90 and 90"))]
    pub lat: Option<f64>,

    #[validate(range(min = -180.0, max = 180.0, message = "Longitude must be between -180 and 180"))]
    pub lng: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct UpdateVehicleDto {
    #[validate(length(min = 1, max = 50))]
    pub vehicle_make: Option<String>,

    #[validate(length(min = 1, max = 50))]
    pub vehicle_model: Option<String>,

    #[validate(length(min = 2, max = 15, message = "Plate must be between 2 and 15 characters"))]
    pub vehicle_plate: Option<String>,

    #[validate(length(min = 1, max = 30))]
    pub vehicle_color: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ApprovalDto {
    pub approved: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: &str, data: T) -> Self {
        Self {
            status: "success".to_string(),
            message: message.to_string(),
            data: Some(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_job_validation() {
        let dto: CreateJobDto = serde_json::from_value(serde_json::json!({
            "skill": "plumber",
            "description": "Kitchen sink leaks",
            "lat": 6.5,
            "lng": 3.4,
            "price": 5000.0
        }))
        .unwrap();
        assert!(dto.validate().is_ok());
        assert!(!dto.auto_assign);
        assert!(dto.photo_urls.is_empty());

        let bad = CreateJobDto { lat: 120.0, ..dto };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_review_rating_bounds() {
        let ok = CreateReviewDto { rating: 5, comment: None };
        let low = CreateReviewDto { rating: 0, comment: None };
        assert!(ok.validate().is_ok());
        assert!(low.validate().is_err());
    }
}
