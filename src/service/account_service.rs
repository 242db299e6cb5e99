// service/account_service.rs
use std::sync::Arc;

use chrono::Utc;
use num_traits::FromPrimitive;
use serde::Serialize;
use sqlx::types::BigDecimal;
use uuid::Uuid;

use crate::{
    config::Config,
    db::{
        cache::{CacheHelper, WORKER_LISTING_KEY, WORKER_LISTING_TTL},
        db::DBClient,
        userdb::ProfileExt,
        workerdb::{ProviderExt, VehicleUpdate, WorkerOnboarding, WorkerProfileUpdate},
    },
    models::{
        documentmodel::{Document, DocumentType},
        labourmodel::{DriverProfile, WorkerListing, WorkerProfile},
        usermodel::{Profile, UserRole},
    },
    realtime::{
        hub::ChangeHub,
        protocol::{ChangeKind, Table},
    },
    service::error::ServiceError,
    utils::storage::{is_owned_path, object_path, public_url, Bucket},
};

pub const MAX_WORKER_LISTING: i64 = 100;

/// Where a signed-in user lands, and whether their role cookie is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HomeResolution {
    pub role: UserRole,
    pub home: &'static str,
    pub refresh_cookie: bool,
}

/// The profile row is authoritative; the cookie only saves a round-trip.
pub fn resolve_home(cookie_role: Option<UserRole>, profile_role: UserRole) -> HomeResolution {
    HomeResolution {
        role: profile_role,
        home: profile_role.home_route(),
        refresh_cookie: cookie_role != Some(profile_role),
    }
}

/// Lowercases, trims and deduplicates skills, keeping first-seen order.
pub fn normalize_skills(raw: &[String]) -> Result<Vec<String>, ServiceError> {
    let mut skills: Vec<String> = Vec::with_capacity(raw.len());
    for skill in raw {
        let skill = skill.trim().to_lowercase();
        if skill.is_empty() {
            continue;
        }
        if skill.chars().count() > 50 {
            return Err(ServiceError::Validation(format!("Skill '{}' is too long", skill)));
        }
        if !skills.contains(&skill) {
            skills.push(skill);
        }
    }

    if skills.is_empty() {
        return Err(ServiceError::Validation("Pick at least one skill".to_string()));
    }
    Ok(skills)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadTarget {
    pub bucket: Bucket,
    pub path: String,
    pub public_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentStatus {
    pub document: Document,
    pub docs_complete: bool,
}

#[derive(Debug, Clone)]
pub struct AccountService {
    db_client: Arc<DBClient>,
    hub: Arc<ChangeHub>,
    config: Config,
}

impl AccountService {
    pub fn new(db_client: Arc<DBClient>, hub: Arc<ChangeHub>, config: Config) -> Self {
        Self { db_client, hub, config }
    }

    async fn load_profile(&self, user_id: Uuid) -> Result<Profile, ServiceError> {
        self.db_client
            .get_profile(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Profile {}", user_id)))
    }

    pub async fn home(&self, actor: &Profile, cookie_role: Option<UserRole>) -> Result<HomeResolution, ServiceError> {
        // The extractor may hold a profile loaded before a concurrent role change.
        let profile = self.load_profile(actor.id).await?;
        Ok(resolve_home(cookie_role, profile.role))
    }

    pub async fn select_role(
        &self,
        actor: &Profile,
        raw_role: &str,
        expected_version: Option<i32>,
    ) -> Result<Profile, ServiceError> {
        if actor.is_admin() {
            return Err(ServiceError::Forbidden("Admins cannot change their own role".to_string()));
        }

        let role = UserRole::parse(raw_role)
            .filter(|role| role.is_self_selectable())
            .ok_or_else(|| ServiceError::Validation(format!("Unknown role '{}'", raw_role)))?;

        let version = expected_version.unwrap_or(actor.version);
        let profile = self
            .db_client
            .update_profile_role(actor.id, role, version)
            .await?
            .ok_or(ServiceError::Conflict { entity: "profile", id: actor.id })?;

        match role {
            UserRole::Worker => {
                self.db_client.ensure_worker_profile(actor.id).await?;
            }
            UserRole::Taxi => {
                self.db_client.ensure_driver_profile(actor.id).await?;
            }
            UserRole::Client | UserRole::Admin => {}
        }

        tracing::info!("User {} selected role {}", actor.id, role.to_str());
        self.hub.publish_row(Table::Profiles, ChangeKind::Update, &profile);
        Ok(profile)
    }

    // Worker profile

    pub async fn ensure_worker_profile(&self, actor: &Profile) -> Result<WorkerProfile, ServiceError> {
        if actor.role != UserRole::Worker {
            return Err(ServiceError::Forbidden("Only workers have a worker profile".to_string()));
        }
        Ok(self.db_client.ensure_worker_profile(actor.id).await?)
    }

    pub async fn get_worker_profile(&self, user_id: Uuid) -> Result<WorkerProfile, ServiceError> {
        self.db_client
            .get_worker_profile(user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Worker profile {}", user_id)))
    }

    pub async fn set_my_worker_skills(&self, actor: &Profile, raw: &[String]) -> Result<WorkerProfile, ServiceError> {
        let skills = normalize_skills(raw)?;
        self.ensure_worker_profile(actor).await?;

        let worker = self
            .db_client
            .set_worker_skills(actor.id, skills)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Worker profile {}", actor.id)))?;

        self.hub.publish_row(Table::WorkerProfiles, ChangeKind::Update, &worker);
        Ok(worker)
    }

    pub async fn update_my_worker_profile(
        &self,
        actor: &Profile,
        update: WorkerProfileUpdate,
    ) -> Result<WorkerProfile, ServiceError> {
        self.ensure_worker_profile(actor).await?;

        let worker = self
            .db_client
            .update_worker_profile(actor.id, update)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Worker profile {}", actor.id)))?;

        self.hub.publish_row(Table::WorkerProfiles, ChangeKind::Update, &worker);
        Ok(worker)
    }

    /// One-shot worker sign-up: profile details, role and skills together.
    pub async fn onboard_worker(
        &self,
        actor: &Profile,
        mut onboarding: WorkerOnboarding,
    ) -> Result<WorkerProfile, ServiceError> {
        if actor.is_admin() {
            return Err(ServiceError::Forbidden("Admins cannot onboard as workers".to_string()));
        }
        if onboarding.lat.is_some() != onboarding.lng.is_some() {
            return Err(ServiceError::Validation("Latitude and longitude go together".to_string()));
        }

        onboarding.skills = normalize_skills(&onboarding.skills)?;
        onboarding.full_name = onboarding.full_name.trim().to_string();

        let worker = self.db_client.onboard_worker(actor.id, onboarding).await?;

        tracing::info!("Worker {} onboarded with {} skills", actor.id, worker.skills.len());
        self.hub.publish_row(Table::WorkerProfiles, ChangeKind::Insert, &worker);
        if let Some(profile) = self.db_client.get_profile(actor.id).await? {
            self.hub.publish_row(Table::Profiles, ChangeKind::Update, &profile);
        }
        Ok(worker)
    }

    // Driver profile

    pub async fn ensure_driver_profile(&self, actor: &Profile) -> Result<DriverProfile, ServiceError> {
        if actor.role != UserRole::Taxi {
            return Err(ServiceError::Forbidden("Only drivers have a driver profile".to_string()));
        }
        Ok(self.db_client.ensure_driver_profile(actor.id).await?)
    }

    pub async fn update_my_vehicle(&self, actor: &Profile, update: VehicleUpdate) -> Result<DriverProfile, ServiceError> {
        self.ensure_driver_profile(actor).await?;

        let driver = self
            .db_client
            .update_driver_vehicle(actor.id, update)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Driver profile {}", actor.id)))?;

        self.hub.publish_row(Table::DriverProfiles, ChangeKind::Update, &driver);
        Ok(driver)
    }

    // Documents

    pub fn allocate_upload_path(
        &self,
        actor: &Profile,
        bucket: Bucket,
        label: &str,
        ext: &str,
    ) -> Result<UploadTarget, ServiceError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(ServiceError::Validation("Upload label is required".to_string()));
        }

        let path = object_path(actor.id, label, Utc::now().timestamp_millis(), ext);
        let url = public_url(&self.config.storage_public_url, bucket, &path);

        Ok(UploadTarget { bucket, path, public_url: url })
    }

    pub async fn record_document(
        &self,
        actor: &Profile,
        doc_type: DocumentType,
        bucket: Bucket,
        path: &str,
    ) -> Result<DocumentStatus, ServiceError> {
        if !actor.role.is_provider() {
            return Err(ServiceError::Forbidden("Only workers and drivers upload documents".to_string()));
        }
        if !matches!(bucket, Bucket::WorkerDocs | Bucket::WorkersDocs) {
            return Err(ServiceError::Validation(format!(
                "Documents cannot be stored in '{}'",
                bucket.as_str()
            )));
        }
        if !is_owned_path(actor.id, path) {
            return Err(ServiceError::Forbidden("Documents must live under your own folder".to_string()));
        }

        let url = public_url(&self.config.storage_public_url, bucket, path);
        let document = self
            .db_client
            .upsert_document(actor.id, doc_type, bucket.as_str(), path, &url)
            .await?;

        let on_file: Vec<DocumentType> = self
            .db_client
            .get_documents(actor.id)
            .await?
            .into_iter()
            .map(|doc| doc.doc_type)
            .collect();
        let docs_complete = DocumentType::is_complete(actor.role, &on_file);
        self.db_client
            .set_docs_complete(actor.id, actor.role, docs_complete)
            .await?;

        tracing::debug!(
            "Document {} stored for {} (complete: {})",
            doc_type.to_str(),
            actor.id,
            docs_complete
        );
        Ok(DocumentStatus { document, docs_complete })
    }

    pub async fn list_documents(&self, actor: &Profile) -> Result<Vec<Document>, ServiceError> {
        Ok(self.db_client.get_documents(actor.id).await?)
    }

    // Money

    pub async fn cashier_credit_by_email(
        &self,
        actor: &Profile,
        email: &str,
        amount: f64,
    ) -> Result<Profile, ServiceError> {
        if !actor.is_admin() && !actor.is_cashier {
            return Err(ServiceError::Forbidden("Only cashiers can credit balances".to_string()));
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ServiceError::Validation("Amount must be positive".to_string()));
        }

        let amount = BigDecimal::from_f64(amount)
            .ok_or_else(|| ServiceError::Validation("Amount is not a valid number".to_string()))?;
        let email = email.trim().to_lowercase();

        let profile = self
            .db_client
            .credit_balance_by_email(&email, amount.clone())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No account for {}", email)))?;

        tracing::info!("Cashier {} credited {} to {}", actor.id, amount, profile.id);
        self.hub.publish_row(Table::Profiles, ChangeKind::Update, &profile);
        Ok(profile)
    }

    pub async fn pay_subscription(&self, actor: &Profile, months: i32) -> Result<Profile, ServiceError> {
        if !(1..=12).contains(&months) {
            return Err(ServiceError::Validation("Months must be between 1 and 12".to_string()));
        }

        let price = BigDecimal::from_f64(self.config.subscription_monthly_price * f64::from(months))
            .ok_or_else(|| ServiceError::Other("Subscription price is misconfigured".to_string()))?;

        match self.db_client.pay_subscription(actor.id, price.clone(), months).await? {
            Some(profile) => {
                tracing::info!("User {} paid {} for {} month(s)", actor.id, price, months);
                self.hub.publish_row(Table::Profiles, ChangeKind::Update, &profile);
                Ok(profile)
            }
            None => {
                let current = self.load_profile(actor.id).await?;
                Err(ServiceError::InsufficientFunds {
                    required: price.to_string(),
                    available: current.balance.to_string(),
                })
            }
        }
    }

    pub async fn delete_account(&self, actor: &Profile) -> Result<(), ServiceError> {
        let deleted = self.db_client.delete_profile(actor.id).await?;
        if deleted == 0 {
            return Err(ServiceError::NotFound(format!("Profile {}", actor.id)));
        }

        tracing::info!("Account {} deleted", actor.id);
        self.hub.publish(
            Table::Profiles,
            ChangeKind::Delete,
            serde_json::json!({ "id": actor.id }),
        );
        Ok(())
    }

    // Admin

    fn ensure_admin(actor: &Profile) -> Result<(), ServiceError> {
        if actor.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("Admin access required".to_string()))
        }
    }

    pub async fn admin_set_cashier(&self, actor: &Profile, email: &str, enabled: bool) -> Result<Profile, ServiceError> {
        Self::ensure_admin(actor)?;
        let email = email.trim().to_lowercase();

        let profile = self
            .db_client
            .set_cashier_by_email(&email, enabled)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No account for {}", email)))?;

        tracing::info!("Admin {} set cashier={} for {}", actor.id, enabled, profile.id);
        self.hub.publish_row(Table::Profiles, ChangeKind::Update, &profile);
        Ok(profile)
    }

    pub async fn admin_approve_driver(
        &self,
        actor: &Profile,
        driver_id: Uuid,
        approved: bool,
    ) -> Result<DriverProfile, ServiceError> {
        Self::ensure_admin(actor)?;

        let driver = self
            .db_client
            .set_driver_approved(driver_id, approved)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Driver {}", driver_id)))?;

        if let Some(profile) = self.db_client.set_profile_verified(driver_id, approved).await? {
            self.hub.publish_row(Table::Profiles, ChangeKind::Update, &profile);
        }

        tracing::info!("Admin {} set approval={} for driver {}", actor.id, approved, driver_id);
        self.hub.publish_row(Table::DriverProfiles, ChangeKind::Update, &driver);
        Ok(driver)
    }

    pub async fn admin_verify_worker(
        &self,
        actor: &Profile,
        worker_id: Uuid,
        verified: bool,
    ) -> Result<WorkerProfile, ServiceError> {
        Self::ensure_admin(actor)?;

        let worker = self
            .db_client
            .set_worker_verified(worker_id, verified)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Worker {}", worker_id)))?;

        if let Some(profile) = self.db_client.set_profile_verified(worker_id, verified).await? {
            self.hub.publish_row(Table::Profiles, ChangeKind::Update, &profile);
        }

        self.hub.publish_row(Table::WorkerProfiles, ChangeKind::Update, &worker);
        Ok(worker)
    }

    pub async fn pending_drivers(&self, actor: &Profile) -> Result<Vec<DriverProfile>, ServiceError> {
        Self::ensure_admin(actor)?;
        Ok(self.db_client.get_pending_drivers().await?)
    }

    pub async fn list_profiles(
        &self,
        actor: &Profile,
        role: UserRole,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Profile>, ServiceError> {
        Self::ensure_admin(actor)?;
        Ok(self
            .db_client
            .get_profiles_by_role(role, limit.clamp(1, 200), offset.max(0))
            .await?)
    }

    // Public listing

    /// Available verified workers. Answers empty during a build without touching the database.
    pub async fn list_workers(&self, limit: Option<i64>) -> Result<Vec<WorkerListing>, ServiceError> {
        if self.config.is_build_phase() {
            return Ok(Vec::new());
        }

        let limit = limit.unwrap_or(20).clamp(1, MAX_WORKER_LISTING);
        let key = format!("{}:{}", WORKER_LISTING_KEY, limit);

        if let Some(redis) = &self.db_client.redis_client {
            match CacheHelper::get::<Vec<WorkerListing>>(redis, &key).await {
                Ok(Some(workers)) => return Ok(workers),
                Ok(None) => {}
                Err(e) => tracing::warn!("Worker listing cache read failed: {}", e),
            }
        }

        let workers = self.db_client.get_available_workers(limit).await?;

        if let Some(redis) = &self.db_client.redis_client {
            if let Err(e) = CacheHelper::set(redis, &key, &workers, WORKER_LISTING_TTL).await {
                tracing::warn!("Worker listing cache write failed: {}", e);
            }
        }

        Ok(workers)
    }
}
