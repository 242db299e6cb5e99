// db/workerdb.rs
use async_trait::async_trait;
use sqlx::Error;
use uuid::Uuid;

use super::{db::DBClient, labourdb::ACTIVE_JOB_STATUSES};
use crate::{
    models::{
        documentmodel::{Document, DocumentType},
        labourmodel::*,
        usermodel::UserRole,
    },
    utils::geo::BoundingBox,
};

const WORKER_COLUMNS: &str = r#"
    user_id, bio, skills, lat, lng, status, rating, rating_count, completed_jobs,
    verified, docs_complete, location_updated_at, version, created_at, updated_at
"#;

const DRIVER_COLUMNS: &str = r#"
    user_id, vehicle_make, vehicle_model, vehicle_plate, vehicle_color, lat, lng,
    status, approved, docs_complete, location_updated_at, version, created_at, updated_at
"#;

const DOCUMENT_COLUMNS: &str =
    "id, user_id, doc_type, bucket, path, public_url, created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct WorkerProfileUpdate {
    pub bio: Option<String>,
    pub status: Option<ProviderStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct VehicleUpdate {
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub vehicle_plate: Option<String>,
    pub vehicle_color: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WorkerOnboarding {
    pub full_name: String,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub skills: Vec<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[async_trait]
pub trait ProviderExt {
    // Worker profiles
    async fn ensure_worker_profile(&self, user_id: Uuid) -> Result<WorkerProfile, Error>;

    async fn get_worker_profile(&self, user_id: Uuid) -> Result<Option<WorkerProfile>, Error>;

    async fn set_worker_skills(
        &self,
        user_id: Uuid,
        skills: Vec<String>,
    ) -> Result<Option<WorkerProfile>, Error>;

    async fn update_worker_profile(
        &self,
        user_id: Uuid,
        update: WorkerProfileUpdate,
    ) -> Result<Option<WorkerProfile>, Error>;

    /// Profile row, role and worker row written in one transaction.
    async fn onboard_worker(
        &self,
        user_id: Uuid,
        onboarding: WorkerOnboarding,
    ) -> Result<WorkerProfile, Error>;

    async fn set_worker_verified(
        &self,
        user_id: Uuid,
        verified: bool,
    ) -> Result<Option<WorkerProfile>, Error>;

    async fn update_worker_location(
        &self,
        user_id: Uuid,
        lat: f64,
        lng: f64,
    ) -> Result<Option<WorkerProfile>, Error>;

    // Driver profiles
    async fn ensure_driver_profile(&self, user_id: Uuid) -> Result<DriverProfile, Error>;

    async fn get_driver_profile(&self, user_id: Uuid) -> Result<Option<DriverProfile>, Error>;

    async fn update_driver_vehicle(
        &self,
        user_id: Uuid,
        update: VehicleUpdate,
    ) -> Result<Option<DriverProfile>, Error>;

    async fn set_driver_approved(
        &self,
        user_id: Uuid,
        approved: bool,
    ) -> Result<Option<DriverProfile>, Error>;

    async fn update_driver_location(
        &self,
        user_id: Uuid,
        lat: f64,
        lng: f64,
    ) -> Result<Option<DriverProfile>, Error>;

    async fn get_pending_drivers(&self) -> Result<Vec<DriverProfile>, Error>;

    // Shared provider bookkeeping
    async fn set_provider_status(&self, user_id: Uuid, status: ProviderStatus) -> Result<(), Error>;

    async fn increment_completed_jobs(&self, user_id: Uuid) -> Result<(), Error>;

    async fn find_worker_candidates(
        &self,
        skill: &str,
        bbox: BoundingBox,
    ) -> Result<Vec<ProviderCandidate>, Error>;

    async fn find_driver_candidates(&self, bbox: BoundingBox) -> Result<Vec<ProviderCandidate>, Error>;

    async fn get_available_workers(&self, limit: i64) -> Result<Vec<WorkerListing>, Error>;

    // Verification documents
    async fn upsert_document(
        &self,
        user_id: Uuid,
        doc_type: DocumentType,
        bucket: &str,
        path: &str,
        public_url: &str,
    ) -> Result<Document, Error>;

    async fn get_documents(&self, user_id: Uuid) -> Result<Vec<Document>, Error>;

    async fn set_docs_complete(&self, user_id: Uuid, role: UserRole, complete: bool) -> Result<(), Error>;
}

#[async_trait]
impl ProviderExt for DBClient {
    async fn ensure_worker_profile(&self, user_id: Uuid) -> Result<WorkerProfile, Error> {
        sqlx::query(
            "INSERT INTO worker_profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        sqlx::query_as::<_, WorkerProfile>(&format!(
            "SELECT {} FROM worker_profiles WHERE user_id = $1",
            WORKER_COLUMNS
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_worker_profile(&self, user_id: Uuid) -> Result<Option<WorkerProfile>, Error> {
        sqlx::query_as::<_, WorkerProfile>(&format!(
            "SELECT {} FROM worker_profiles WHERE user_id = $1",
            WORKER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn set_worker_skills(
        &self,
        user_id: Uuid,
        skills: Vec<String>,
    ) -> Result<Option<WorkerProfile>, Error> {
        sqlx::query_as::<_, WorkerProfile>(&format!(
            r#"
            UPDATE worker_profiles
            SET skills = $2, version = version + 1, updated_at = NOW()
            WHERE user_id = $1
            RETURNING {}
            "#,
            WORKER_COLUMNS
        ))
        .bind(user_id)
        .bind(skills)
        .fetch_optional(&self.pool)
        .await
    }

    async fn update_worker_profile(
        &self,
        user_id: Uuid,
        update: WorkerProfileUpdate,
    ) -> Result<Option<WorkerProfile>, Error> {
        sqlx::query_as::<_, WorkerProfile>(&format!(
            r#"
            UPDATE worker_profiles
            SET bio = COALESCE($2, bio),
                status = COALESCE($3, status),
                version = version + 1,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING {}
            "#,
            WORKER_COLUMNS
        ))
        .bind(user_id)
        .bind(update.bio)
        .bind(update.status)
        .fetch_optional(&self.pool)
        .await
    }

    async fn onboard_worker(
        &self,
        user_id: Uuid,
        onboarding: WorkerOnboarding,
    ) -> Result<WorkerProfile, Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE profiles
            SET full_name = $2,
                phone = COALESCE($3, phone),
                role = 'worker'::user_role,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .bind(&onboarding.full_name)
        .bind(&onboarding.phone)
        .execute(&mut *tx)
        .await?;

        let profile = sqlx::query_as::<_, WorkerProfile>(&format!(
            r#"
            INSERT INTO worker_profiles (user_id, bio, skills, lat, lng, location_updated_at)
            VALUES ($1, $2, $3, $4, $5, CASE WHEN $4::float8 IS NULL THEN NULL ELSE NOW() END)
            ON CONFLICT (user_id) DO UPDATE
            SET bio = COALESCE(EXCLUDED.bio, worker_profiles.bio),
                skills = EXCLUDED.skills,
                lat = COALESCE(EXCLUDED.lat, worker_profiles.lat),
                lng = COALESCE(EXCLUDED.lng, worker_profiles.lng),
                location_updated_at = COALESCE(EXCLUDED.location_updated_at, worker_profiles.location_updated_at),
                version = worker_profiles.version + 1,
                updated_at = NOW()
            RETURNING {}
            "#,
            WORKER_COLUMNS
        ))
        .bind(user_id)
        .bind(onboarding.bio)
        .bind(onboarding.skills)
        .bind(onboarding.lat)
        .bind(onboarding.lng)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(profile)
    }

    async fn set_worker_verified(
        &self,
        user_id: Uuid,
        verified: bool,
    ) -> Result<Option<WorkerProfile>, Error> {
        sqlx::query_as::<_, WorkerProfile>(&format!(
            r#"
            UPDATE worker_profiles
            SET verified = $2, version = version + 1, updated_at = NOW()
            WHERE user_id = $1
            RETURNING {}
            "#,
            WORKER_COLUMNS
        ))
        .bind(user_id)
        .bind(verified)
        .fetch_optional(&self.pool)
        .await
    }

    async fn update_worker_location(
        &self,
        user_id: Uuid,
        lat: f64,
        lng: f64,
    ) -> Result<Option<WorkerProfile>, Error> {
        sqlx::query_as::<_, WorkerProfile>(&format!(
            r#"
            UPDATE worker_profiles
            SET lat = $2, lng = $3, location_updated_at = NOW(), version = version + 1
            WHERE user_id = $1
            RETURNING {}
            "#,
            WORKER_COLUMNS
        ))
        .bind(user_id)
        .bind(lat)
        .bind(lng)
        .fetch_optional(&self.pool)
        .await
    }

    async fn ensure_driver_profile(&self, user_id: Uuid) -> Result<DriverProfile, Error> {
        sqlx::query(
            "INSERT INTO driver_profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        sqlx::query_as::<_, DriverProfile>(&format!(
            "SELECT {} FROM driver_profiles WHERE user_id = $1",
            DRIVER_COLUMNS
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_driver_profile(&self, user_id: Uuid) -> Result<Option<DriverProfile>, Error> {
        sqlx::query_as::<_, DriverProfile>(&format!(
            "SELECT {} FROM driver_profiles WHERE user_id = $1",
            DRIVER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn update_driver_vehicle(
        &self,
        user_id: Uuid,
        update: VehicleUpdate,
    ) -> Result<Option<DriverProfile>, Error> {
        sqlx::query_as::<_, DriverProfile>(&format!(
            r#"
            UPDATE driver_profiles
            SET vehicle_make = COALESCE($2, vehicle_make),
                vehicle_model = COALESCE($3, vehicle_model),
                vehicle_plate = COALESCE($4, vehicle_plate),
                vehicle_color = COALESCE($5, vehicle_color),
                version = version + 1,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING {}
            "#,
            DRIVER_COLUMNS
        ))
        .bind(user_id)
        .bind(update.vehicle_make)
        .bind(update.vehicle_model)
        .bind(update.vehicle_plate)
        .bind(update.vehicle_color)
        .fetch_optional(&self.pool)
        .await
    }

    async fn set_driver_approved(
        &self,
        user_id: Uuid,
        approved: bool,
    ) -> Result<Option<DriverProfile>, Error> {
        sqlx::query_as::<_, DriverProfile>(&format!(
            r#"
            UPDATE driver_profiles
            SET approved = $2, version = version + 1, updated_at = NOW()
            WHERE user_id = $1
            RETURNING {}
            "#,
            DRIVER_COLUMNS
        ))
        .bind(user_id)
        .bind(approved)
        .fetch_optional(&self.pool)
        .await
    }

    async fn update_driver_location(
        &self,
        user_id: Uuid,
        lat: f64,
        lng: f64,
    ) -> Result<Option<DriverProfile>, Error> {
        sqlx::query_as::<_, DriverProfile>(&format!(
            r#"
            UPDATE driver_profiles
            SET lat = $2, lng = $3, location_updated_at = NOW(), version = version + 1
            WHERE user_id = $1
            RETURNING {}
            "#,
            DRIVER_COLUMNS
        ))
        .bind(user_id)
        .bind(lat)
        .bind(lng)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_pending_drivers(&self) -> Result<Vec<DriverProfile>, Error> {
        sqlx::query_as::<_, DriverProfile>(&format!(
            r#"
            SELECT {} FROM driver_profiles
            WHERE approved = FALSE
            ORDER BY docs_complete DESC, created_at ASC
            "#,
            DRIVER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
    }

    async fn set_provider_status(&self, user_id: Uuid, status: ProviderStatus) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE worker_profiles SET status = $2, version = version + 1, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(status)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE driver_profiles SET status = $2, version = version + 1, updated_at = NOW() WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(status)
        .execute(&mut *tx)
        .await?;

        tx.commit().await
    }

    async fn increment_completed_jobs(&self, user_id: Uuid) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE worker_profiles
            SET completed_jobs = completed_jobs + 1, version = version + 1, updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_worker_candidates(
        &self,
        skill: &str,
        bbox: BoundingBox,
    ) -> Result<Vec<ProviderCandidate>, Error> {
        sqlx::query_as::<_, ProviderCandidate>(&format!(
            r#"
            SELECT wp.user_id, wp.lat, wp.lng, wp.rating,
                   (SELECT COUNT(*) FROM jobs j
                    WHERE j.worker_id = wp.user_id AND j.status IN {}) AS active_jobs
            FROM worker_profiles wp
            WHERE wp.status = 'available'::provider_status
              AND wp.verified = TRUE
              AND LOWER($1) = ANY(wp.skills)
              AND wp.lat BETWEEN $2 AND $3
              AND wp.lng BETWEEN $4 AND $5
            "#,
            ACTIVE_JOB_STATUSES
        ))
        .bind(skill)
        .bind(bbox.min_lat)
        .bind(bbox.max_lat)
        .bind(bbox.min_lng)
        .bind(bbox.max_lng)
        .fetch_all(&self.pool)
        .await
    }

    async fn find_driver_candidates(&self, bbox: BoundingBox) -> Result<Vec<ProviderCandidate>, Error> {
        sqlx::query_as::<_, ProviderCandidate>(&format!(
            r#"
            SELECT dp.user_id, dp.lat, dp.lng,
                   COALESCE((SELECT AVG(r.rating)::real FROM reviews r WHERE r.worker_id = dp.user_id), 0)::real AS rating,
                   (SELECT COUNT(*) FROM jobs j
                    WHERE j.worker_id = dp.user_id AND j.status IN {}) AS active_jobs
            FROM driver_profiles dp
            WHERE dp.status = 'available'::provider_status
              AND dp.approved = TRUE
              AND dp.lat BETWEEN $1 AND $2
              AND dp.lng BETWEEN $3 AND $4
            "#,
            ACTIVE_JOB_STATUSES
        ))
        .bind(bbox.min_lat)
        .bind(bbox.max_lat)
        .bind(bbox.min_lng)
        .bind(bbox.max_lng)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_available_workers(&self, limit: i64) -> Result<Vec<WorkerListing>, Error> {
        sqlx::query_as::<_, WorkerListing>(
            r#"
            SELECT wp.user_id, p.full_name, p.avatar_url, wp.skills, wp.rating, wp.completed_jobs
            FROM worker_profiles wp
            JOIN profiles p ON p.id = wp.user_id
            WHERE wp.verified = TRUE AND wp.status = 'available'::provider_status
            ORDER BY wp.rating DESC, wp.completed_jobs DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn upsert_document(
        &self,
        user_id: Uuid,
        doc_type: DocumentType,
        bucket: &str,
        path: &str,
        public_url: &str,
    ) -> Result<Document, Error> {
        sqlx::query_as::<_, Document>(&format!(
            r#"
            INSERT INTO documents (user_id, doc_type, bucket, path, public_url)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, doc_type) DO UPDATE
            SET bucket = EXCLUDED.bucket,
                path = EXCLUDED.path,
                public_url = EXCLUDED.public_url,
                updated_at = NOW()
            RETURNING {}
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(user_id)
        .bind(doc_type)
        .bind(bucket)
        .bind(path)
        .bind(public_url)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_documents(&self, user_id: Uuid) -> Result<Vec<Document>, Error> {
        sqlx::query_as::<_, Document>(&format!(
            "SELECT {} FROM documents WHERE user_id = $1 ORDER BY doc_type",
            DOCUMENT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn set_docs_complete(&self, user_id: Uuid, role: UserRole, complete: bool) -> Result<(), Error> {
        let table = match role {
            UserRole::Worker => "worker_profiles",
            UserRole::Taxi => "driver_profiles",
            UserRole::Client | UserRole::Admin => return Ok(()),
        };

        sqlx::query(&format!(
            "UPDATE {} SET docs_complete = $2, version = version + 1, updated_at = NOW() WHERE user_id = $1",
            table
        ))
        .bind(user_id)
        .bind(complete)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
