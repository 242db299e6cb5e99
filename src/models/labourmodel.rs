use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::{BigDecimal, Json};
use uuid::Uuid;

/// Skill name that routes a job to drivers instead of workers.
pub const TAXI_SKILL: &str = "taxi";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Open,
    Assigned,
    Accepted,
    OnRoute,
    Arrived,
    Started,
    Completed,
    Cancelled,
    Rejected,
}

impl JobStatus {
    pub const ALL: [JobStatus; 9] = [
        JobStatus::Open,
        JobStatus::Assigned,
        JobStatus::Accepted,
        JobStatus::OnRoute,
        JobStatus::Arrived,
        JobStatus::Started,
        JobStatus::Completed,
        JobStatus::Cancelled,
        JobStatus::Rejected,
    ];

    pub fn to_str(&self) -> &str {
        match self {
            JobStatus::Open => "open",
            JobStatus::Assigned => "assigned",
            JobStatus::Accepted => "accepted",
            JobStatus::OnRoute => "on_route",
            JobStatus::Arrived => "arrived",
            JobStatus::Started => "started",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "provider_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Offline,
    Available,
    Busy,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JobSchedule {
    pub date: NaiveDate,
    pub time_window: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub client_id: Uuid,
    pub worker_id: Option<Uuid>,
    pub skill: String,
    pub description: String,
    pub address: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub price: BigDecimal,
    pub status: JobStatus,
    pub schedule: Option<Json<JobSchedule>>,
    pub photo_urls: Vec<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn is_taxi_job(&self) -> bool {
        self.skill.eq_ignore_ascii_case(TAXI_SKILL)
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.client_id == user_id || self.worker_id == Some(user_id)
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct WorkerProfile {
    pub user_id: Uuid,
    pub bio: Option<String>,
    pub skills: Vec<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub status: ProviderStatus,
    pub rating: f32,
    pub rating_count: i32,
    pub completed_jobs: i32,
    pub verified: bool,
    pub docs_complete: bool,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct DriverProfile {
    pub user_id: Uuid,
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_plate: Option<String>,
    pub vehicle_color: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub status: ProviderStatus,
    pub approved: bool,
    pub docs_complete: bool,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A provider that could take a job, as seen by the matcher.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct ProviderCandidate {
    pub user_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub rating: f32,
    pub active_jobs: i64,
}

/// Public card shown by the worker listing.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct WorkerListing {
    pub user_id: Uuid,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub skills: Vec<String>,
    pub rating: f32,
    pub completed_jobs: i32,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct JobReview {
    pub id: Uuid,
    pub job_id: Uuid,
    pub reviewer_id: Uuid,
    pub worker_id: Uuid,
    pub rating: i32,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "incident_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Resolved,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Incident {
    pub id: Uuid,
    pub job_id: Uuid,
    pub reporter_id: Uuid,
    pub target_id: Uuid,
    pub description: String,
    pub status: IncidentStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}
