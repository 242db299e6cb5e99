// db/labourdb.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::{BigDecimal, Json};
use sqlx::Error;
use uuid::Uuid;

use super::db::DBClient;
use crate::{models::labourmodel::*, utils::geo::BoundingBox};

pub(crate) const JOB_COLUMNS: &str = r#"
    id, client_id, worker_id, skill, description, address, lat, lng, price,
    status, schedule, photo_urls, assigned_at, started_at, completed_at,
    cancelled_at, cancel_reason, version, created_at, updated_at
"#;

/// Statuses in which a provider is considered busy with a job.
pub(crate) const ACTIVE_JOB_STATUSES: &str =
    "('assigned', 'accepted', 'on_route', 'arrived', 'started')";

#[derive(Debug, Clone)]
pub struct NewJob {
    pub skill: String,
    pub description: String,
    pub address: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub price: BigDecimal,
    pub schedule: Option<JobSchedule>,
    pub photo_urls: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProviderChange {
    Keep,
    Set(Uuid),
    Clear,
}

/// One compare-and-swap status change on a job row.
#[derive(Debug, Clone)]
pub struct JobTransition {
    pub job_id: Uuid,
    pub expected_version: i32,
    pub from: Vec<JobStatus>,
    pub to: JobStatus,
    pub provider: ProviderChange,
    pub cancel_reason: Option<String>,
}

#[async_trait]
pub trait LaborExt {
    async fn create_job(&self, client_id: Uuid, job: NewJob) -> Result<Job, Error>;

    async fn get_job_by_id(&self, job_id: Uuid) -> Result<Option<Job>, Error>;

    /// Applies the transition only if the row still has `expected_version`
    /// and one of the `from` statuses. `None` means the swap lost.
    async fn transition_job(&self, transition: JobTransition) -> Result<Option<Job>, Error>;

    async fn get_jobs_for_client(&self, client_id: Uuid) -> Result<Vec<Job>, Error>;

    async fn get_jobs_for_provider(&self, provider_id: Uuid) -> Result<Vec<Job>, Error>;

    async fn get_open_jobs_in_box(
        &self,
        bbox: BoundingBox,
        skills: Option<Vec<String>>,
    ) -> Result<Vec<Job>, Error>;

    async fn record_assignment_attempt(&self, job_id: Uuid, provider_id: Uuid) -> Result<(), Error>;

    async fn get_attempted_providers(&self, job_id: Uuid) -> Result<Vec<Uuid>, Error>;

    /// Rejected jobs plus assignments nobody answered since `assigned_before`.
    async fn get_stale_assignments(&self, assigned_before: DateTime<Utc>) -> Result<Vec<Job>, Error>;

    // Reviews
    async fn create_review(
        &self,
        job_id: Uuid,
        reviewer_id: Uuid,
        worker_id: Uuid,
        rating: i32,
        comment: Option<String>,
    ) -> Result<JobReview, Error>;

    async fn get_review_for_job(&self, job_id: Uuid) -> Result<Option<JobReview>, Error>;

    // Incidents
    async fn create_incident(
        &self,
        job_id: Uuid,
        reporter_id: Uuid,
        target_id: Uuid,
        description: String,
    ) -> Result<Incident, Error>;

    async fn get_incidents(&self, status: Option<IncidentStatus>) -> Result<Vec<Incident>, Error>;

    async fn resolve_incident(&self, incident_id: Uuid) -> Result<Option<Incident>, Error>;
}

#[async_trait]
impl LaborExt for DBClient {
    async fn create_job(&self, client_id: Uuid, job: NewJob) -> Result<Job, Error> {
        sqlx::query_as::<_, Job>(&format!(
            r#"
            INSERT INTO jobs (client_id, skill, description, address, lat, lng, price, schedule, photo_urls)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(client_id)
        .bind(job.skill)
        .bind(job.description)
        .bind(job.address)
        .bind(job.lat)
        .bind(job.lng)
        .bind(job.price)
        .bind(job.schedule.map(Json))
        .bind(job.photo_urls)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_job_by_id(&self, job_id: Uuid) -> Result<Option<Job>, Error> {
        sqlx::query_as::<_, Job>(&format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn transition_job(&self, transition: JobTransition) -> Result<Option<Job>, Error> {
        let (change_provider, provider_id) = match transition.provider {
            ProviderChange::Keep => (false, None),
            ProviderChange::Set(id) => (true, Some(id)),
            ProviderChange::Clear => (true, None),
        };

        let from: Vec<String> = transition
            .from
            .iter()
            .map(|status| status.to_str().to_string())
            .collect();

        sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE jobs
            SET status = $3,
                worker_id = CASE WHEN $4 THEN $5 ELSE worker_id END,
                assigned_at = CASE
                    WHEN $4 AND $5::uuid IS NULL THEN NULL
                    WHEN $4 THEN NOW()
                    ELSE assigned_at
                END,
                started_at = CASE WHEN $3 = 'started'::job_status THEN NOW() ELSE started_at END,
                completed_at = CASE WHEN $3 = 'completed'::job_status THEN NOW() ELSE completed_at END,
                cancelled_at = CASE WHEN $3 = 'cancelled'::job_status THEN NOW() ELSE cancelled_at END,
                cancel_reason = COALESCE($6, cancel_reason),
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1 AND version = $2 AND status::text = ANY($7)
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(transition.job_id)
        .bind(transition.expected_version)
        .bind(transition.to)
        .bind(change_provider)
        .bind(provider_id)
        .bind(transition.cancel_reason)
        .bind(from)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_jobs_for_client(&self, client_id: Uuid) -> Result<Vec<Job>, Error> {
        sqlx::query_as::<_, Job>(&format!(
            "SELECT {} FROM jobs WHERE client_id = $1 ORDER BY created_at DESC",
            JOB_COLUMNS
        ))
        .bind(client_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_jobs_for_provider(&self, provider_id: Uuid) -> Result<Vec<Job>, Error> {
        sqlx::query_as::<_, Job>(&format!(
            "SELECT {} FROM jobs WHERE worker_id = $1 ORDER BY updated_at DESC",
            JOB_COLUMNS
        ))
        .bind(provider_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_open_jobs_in_box(
        &self,
        bbox: BoundingBox,
        skills: Option<Vec<String>>,
    ) -> Result<Vec<Job>, Error> {
        sqlx::query_as::<_, Job>(&format!(
            r#"
            SELECT {} FROM jobs
            WHERE status = 'open'::job_status
              AND lat BETWEEN $1 AND $2
              AND lng BETWEEN $3 AND $4
              AND ($5::text[] IS NULL OR LOWER(skill) = ANY($5))
            ORDER BY created_at DESC
            LIMIT 200
            "#,
            JOB_COLUMNS
        ))
        .bind(bbox.min_lat)
        .bind(bbox.max_lat)
        .bind(bbox.min_lng)
        .bind(bbox.max_lng)
        .bind(skills)
        .fetch_all(&self.pool)
        .await
    }

    async fn record_assignment_attempt(&self, job_id: Uuid, provider_id: Uuid) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO job_assignment_attempts (job_id, worker_id)
            VALUES ($1, $2)
            ON CONFLICT (job_id, worker_id) DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(provider_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_attempted_providers(&self, job_id: Uuid) -> Result<Vec<Uuid>, Error> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT worker_id FROM job_assignment_attempts WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_stale_assignments(&self, assigned_before: DateTime<Utc>) -> Result<Vec<Job>, Error> {
        sqlx::query_as::<_, Job>(&format!(
            r#"
            SELECT {} FROM jobs
            WHERE status = 'rejected'::job_status
               OR (status = 'assigned'::job_status AND assigned_at < $1)
            ORDER BY updated_at ASC
            LIMIT 100
            "#,
            JOB_COLUMNS
        ))
        .bind(assigned_before)
        .fetch_all(&self.pool)
        .await
    }

    async fn create_review(
        &self,
        job_id: Uuid,
        reviewer_id: Uuid,
        worker_id: Uuid,
        rating: i32,
        comment: Option<String>,
    ) -> Result<JobReview, Error> {
        let mut tx = self.pool.begin().await?;

        let review = sqlx::query_as::<_, JobReview>(
            r#"
            INSERT INTO reviews (job_id, reviewer_id, worker_id, rating, comment)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, job_id, reviewer_id, worker_id, rating, comment, created_at
            "#,
        )
        .bind(job_id)
        .bind(reviewer_id)
        .bind(worker_id)
        .bind(rating)
        .bind(comment)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE worker_profiles
            SET rating = ((rating * rating_count) + $2) / (rating_count + 1),
                rating_count = rating_count + 1,
                version = version + 1,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(worker_id)
        .bind(rating as f32)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(review)
    }

    async fn get_review_for_job(&self, job_id: Uuid) -> Result<Option<JobReview>, Error> {
        sqlx::query_as::<_, JobReview>(
            r#"
            SELECT id, job_id, reviewer_id, worker_id, rating, comment, created_at
            FROM reviews WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn create_incident(
        &self,
        job_id: Uuid,
        reporter_id: Uuid,
        target_id: Uuid,
        description: String,
    ) -> Result<Incident, Error> {
        sqlx::query_as::<_, Incident>(
            r#"
            INSERT INTO incidents (job_id, reporter_id, target_id, description)
            VALUES ($1, $2, $3, $4)
            RETURNING id, job_id, reporter_id, target_id, description, status, created_at, resolved_at
            "#,
        )
        .bind(job_id)
        .bind(reporter_id)
        .bind(target_id)
        .bind(description)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_incidents(&self, status: Option<IncidentStatus>) -> Result<Vec<Incident>, Error> {
        sqlx::query_as::<_, Incident>(
            r#"
            SELECT id, job_id, reporter_id, target_id, description, status, created_at, resolved_at
            FROM incidents
            WHERE ($1::incident_status IS NULL OR status = $1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await
    }

    async fn resolve_incident(&self, incident_id: Uuid) -> Result<Option<Incident>, Error> {
        sqlx::query_as::<_, Incident>(
            r#"
            UPDATE incidents
            SET status = 'resolved'::incident_status, resolved_at = NOW()
            WHERE id = $1
            RETURNING id, job_id, reporter_id, target_id, description, status, created_at, resolved_at
            "#,
        )
        .bind(incident_id)
        .fetch_optional(&self.pool)
        .await
    }
}
