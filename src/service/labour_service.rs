// service/labour_service.rs
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use num_traits::FromPrimitive;
use serde::Serialize;
use sqlx::types::BigDecimal;
use uuid::Uuid;

use crate::{
    db::{
        chatdb::ChatExt,
        db::DBClient,
        labourdb::{JobTransition, LaborExt, NewJob, ProviderChange},
        workerdb::ProviderExt,
    },
    dtos::labordtos::CreateJobDto,
    models::{
        labourmodel::*,
        usermodel::{Profile, UserRole},
    },
    realtime::{
        hub::ChangeHub,
        protocol::{ChangeKind, Table},
    },
    service::{
        error::ServiceError,
        lifecycle::{self, JobAction, JobViewer},
        matching_service::{AssignmentOutcome, MatchingService},
    },
};

/// The storage a job's lifecycle runs on: the job row itself and the
/// provider bookkeeping around each transition.
#[async_trait]
pub trait LifecycleStore: Debug + Send + Sync {
    async fn create_job(&self, client_id: Uuid, job: NewJob) -> Result<Job, sqlx::Error>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, sqlx::Error>;

    /// `None` when the row moved on since it was read.
    async fn transition_job(&self, transition: JobTransition) -> Result<Option<Job>, sqlx::Error>;

    async fn get_worker_profile(&self, user_id: Uuid) -> Result<Option<WorkerProfile>, sqlx::Error>;

    async fn get_driver_profile(&self, user_id: Uuid) -> Result<Option<DriverProfile>, sqlx::Error>;

    async fn set_provider_status(&self, user_id: Uuid, status: ProviderStatus) -> Result<(), sqlx::Error>;

    async fn increment_completed_jobs(&self, user_id: Uuid) -> Result<(), sqlx::Error>;

    async fn rebind_job_chat(&self, job_id: Uuid, provider_id: Uuid) -> Result<u64, sqlx::Error>;
}

#[async_trait]
impl LifecycleStore for DBClient {
    async fn create_job(&self, client_id: Uuid, job: NewJob) -> Result<Job, sqlx::Error> {
        LaborExt::create_job(self, client_id, job).await
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, sqlx::Error> {
        LaborExt::get_job_by_id(self, job_id).await
    }

    async fn transition_job(&self, transition: JobTransition) -> Result<Option<Job>, sqlx::Error> {
        LaborExt::transition_job(self, transition).await
    }

    async fn get_worker_profile(&self, user_id: Uuid) -> Result<Option<WorkerProfile>, sqlx::Error> {
        ProviderExt::get_worker_profile(self, user_id).await
    }

    async fn get_driver_profile(&self, user_id: Uuid) -> Result<Option<DriverProfile>, sqlx::Error> {
        ProviderExt::get_driver_profile(self, user_id).await
    }

    async fn set_provider_status(&self, user_id: Uuid, status: ProviderStatus) -> Result<(), sqlx::Error> {
        ProviderExt::set_provider_status(self, user_id, status).await
    }

    async fn increment_completed_jobs(&self, user_id: Uuid) -> Result<(), sqlx::Error> {
        ProviderExt::increment_completed_jobs(self, user_id).await
    }

    async fn rebind_job_chat(&self, job_id: Uuid, provider_id: Uuid) -> Result<u64, sqlx::Error> {
        ChatExt::rebind_job_chat(self, job_id, provider_id).await
    }
}

/// Hands a freshly created job to the matcher.
#[async_trait]
pub trait AutoAssigner: Debug + Send + Sync {
    async fn assign_worker_auto(&self, actor: &Profile, job_id: Uuid) -> Result<AssignmentOutcome, ServiceError>;
}

#[async_trait]
impl AutoAssigner for MatchingService {
    async fn assign_worker_auto(&self, actor: &Profile, job_id: Uuid) -> Result<AssignmentOutcome, ServiceError> {
        MatchingService::assign_worker_auto(self, actor, job_id).await
    }
}

/// What a screen needs to render one job: the row, how the viewer relates
/// to it and which buttons to show.
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    pub job: Job,
    pub viewer: JobViewer,
    pub allowed_actions: Vec<JobAction>,
    pub review: Option<JobReview>,
}

#[derive(Debug, Clone)]
pub struct LabourService {
    db_client: Arc<DBClient>,
    store: Arc<dyn LifecycleStore>,
    hub: Arc<ChangeHub>,
    matcher: Arc<dyn AutoAssigner>,
}

impl LabourService {
    pub fn new(
        db_client: Arc<DBClient>,
        hub: Arc<ChangeHub>,
        matching_service: Arc<MatchingService>,
    ) -> Self {
        let store: Arc<dyn LifecycleStore> = db_client.clone();
        Self::with_parts(db_client, store, hub, matching_service)
    }

    /// Same service with the lifecycle storage and matcher supplied separately.
    pub fn with_parts(
        db_client: Arc<DBClient>,
        store: Arc<dyn LifecycleStore>,
        hub: Arc<ChangeHub>,
        matcher: Arc<dyn AutoAssigner>,
    ) -> Self {
        Self {
            db_client,
            store,
            hub,
            matcher,
        }
    }

    async fn load_job(&self, job_id: Uuid) -> Result<Job, ServiceError> {
        self.store
            .get_job(job_id)
            .await?
            .ok_or(ServiceError::JobNotFound(job_id))
    }

    pub async fn create_job(&self, client: &Profile, job_data: CreateJobDto) -> Result<Job, ServiceError> {
        let skill = job_data.skill.trim().to_lowercase();
        if skill.is_empty() {
            return Err(ServiceError::Validation("Skill is required".to_string()));
        }

        let description = job_data.description.trim().to_string();
        if description.is_empty() {
            return Err(ServiceError::Validation("Description is required".to_string()));
        }

        let price = BigDecimal::from_f64(job_data.price)
            .ok_or_else(|| ServiceError::Validation("Price is not a valid amount".to_string()))?;

        let job = self
            .store
            .create_job(
                client.id,
                NewJob {
                    skill,
                    description,
                    address: job_data.address.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()),
                    lat: job_data.lat,
                    lng: job_data.lng,
                    price,
                    schedule: job_data.schedule,
                    photo_urls: job_data.photo_urls,
                },
            )
            .await?;

        tracing::info!("Job {} created by {} ({})", job.id, client.id, job.skill);
        self.hub.publish_row(Table::Jobs, ChangeKind::Insert, &job);

        if !job_data.auto_assign {
            return Ok(job);
        }

        // The job exists either way; a failed match leaves it open.
        match self.matcher.assign_worker_auto(client, job.id).await {
            Ok(outcome) => Ok(outcome.into_job()),
            Err(e) => {
                tracing::warn!("Auto-assignment for job {} failed: {}", job.id, e);
                Ok(job)
            }
        }
    }

    pub async fn get_job_view(&self, viewer: &Profile, job_id: Uuid) -> Result<JobView, ServiceError> {
        let job = self.load_job(job_id).await?;
        let relation = JobViewer::of(viewer, &job);

        let visible = job.status == JobStatus::Open
            || !matches!(relation, JobViewer::Prospect | JobViewer::Outsider);
        if !visible {
            return Err(ServiceError::Forbidden("You cannot view this job".to_string()));
        }

        let review = if job.status == JobStatus::Completed {
            self.db_client.get_review_for_job(job.id).await?
        } else {
            None
        };

        Ok(JobView {
            allowed_actions: lifecycle::allowed_actions(job.status, relation, review.is_some()),
            viewer: relation,
            review,
            job,
        })
    }

    pub async fn list_my_jobs(&self, profile: &Profile) -> Result<Vec<Job>, ServiceError> {
        let jobs = if profile.role.is_provider() {
            self.db_client.get_jobs_for_provider(profile.id).await?
        } else {
            self.db_client.get_jobs_for_client(profile.id).await?
        };
        Ok(jobs)
    }

    /// A prospect may only take work their provider profile qualifies them for.
    async fn ensure_eligible_provider(&self, actor: &Profile) -> Result<(), ServiceError> {
        let eligible = match actor.role {
            UserRole::Worker => self
                .store
                .get_worker_profile(actor.id)
                .await?
                .map(|profile| profile.verified)
                .unwrap_or(false),
            UserRole::Taxi => self
                .store
                .get_driver_profile(actor.id)
                .await?
                .map(|profile| profile.approved)
                .unwrap_or(false),
            UserRole::Client | UserRole::Admin => false,
        };

        if eligible {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(
                "Your provider profile must be verified before taking jobs".to_string(),
            ))
        }
    }

    /// Runs one lifecycle action as a compare-and-swap on the job row.
    pub async fn apply_action(
        &self,
        actor: &Profile,
        job_id: Uuid,
        action: JobAction,
        expected_version: Option<i32>,
        reason: Option<String>,
    ) -> Result<Job, ServiceError> {
        if matches!(action, JobAction::AutoAssign | JobAction::Reassign | JobAction::Review) {
            return Err(ServiceError::Validation(format!(
                "{} has its own endpoint",
                action
            )));
        }

        let job = self.load_job(job_id).await?;
        let viewer = JobViewer::of(actor, &job);

        let Some(to) = action.target(job.status) else {
            return Err(ServiceError::InvalidTransition {
                job_id,
                status: job.status,
                action,
            });
        };

        if !lifecycle::is_allowed(action, job.status, viewer, false) {
            return Err(ServiceError::Forbidden(format!(
                "You are not allowed to {} this job",
                action
            )));
        }

        if action == JobAction::Take {
            self.ensure_eligible_provider(actor).await?;
        }

        let provider = match action {
            JobAction::Take => ProviderChange::Set(actor.id),
            JobAction::Reject => ProviderChange::Clear,
            _ => ProviderChange::Keep,
        };

        let cancel_reason = match action {
            JobAction::Cancel | JobAction::Reject => reason
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty()),
            _ => None,
        };

        let updated = self
            .store
            .transition_job(JobTransition {
                job_id,
                expected_version: expected_version.unwrap_or(job.version),
                from: action.from_statuses().to_vec(),
                to,
                provider,
                cancel_reason,
            })
            .await?
            .ok_or(ServiceError::Conflict { entity: "Job", id: job_id })?;

        tracing::info!(
            "Job {} {} by {}: {} -> {}",
            job_id,
            action,
            actor.id,
            job.status.to_str(),
            updated.status.to_str()
        );

        let provider_id = match action {
            JobAction::Take => Some(actor.id),
            _ => job.worker_id,
        };
        if let Some(provider_id) = provider_id {
            self.apply_provider_side_effects(action, provider_id).await;
        }

        if action == JobAction::Take {
            if let Err(e) = self.store.rebind_job_chat(job_id, actor.id).await {
                tracing::warn!("Chat for job {} still points at the previous provider: {}", job_id, e);
            }
        }

        self.hub.publish_row(Table::Jobs, ChangeKind::Update, &updated);

        Ok(updated)
    }

    /// Availability bookkeeping after a committed transition. Failures are
    /// logged; the transition itself already happened.
    async fn apply_provider_side_effects(&self, action: JobAction, provider_id: Uuid) {
        let status = match action {
            JobAction::Take | JobAction::Accept => Some(ProviderStatus::Busy),
            JobAction::Complete | JobAction::Cancel | JobAction::Reject => Some(ProviderStatus::Available),
            _ => None,
        };

        if let Some(status) = status {
            if let Err(e) = self.store.set_provider_status(provider_id, status).await {
                tracing::error!("Failed to set provider {} {:?}: {}", provider_id, status, e);
            }
        }

        if action == JobAction::Complete {
            if let Err(e) = self.store.increment_completed_jobs(provider_id).await {
                tracing::error!("Failed to count completed job for {}: {}", provider_id, e);
            }
        }
    }

    pub async fn add_review_if_valid(
        &self,
        actor: &Profile,
        job_id: Uuid,
        rating: i32,
        comment: Option<String>,
    ) -> Result<JobReview, ServiceError> {
        let job = self.load_job(job_id).await?;

        if job.client_id != actor.id {
            return Err(ServiceError::Forbidden(
                "Only the client of this job can review it".to_string(),
            ));
        }

        if job.status != JobStatus::Completed {
            return Err(ServiceError::InvalidTransition {
                job_id,
                status: job.status,
                action: JobAction::Review,
            });
        }

        if !(1..=5).contains(&rating) {
            return Err(ServiceError::Validation("Rating must be between 1 and 5".to_string()));
        }

        let worker_id = job
            .worker_id
            .ok_or_else(|| ServiceError::Validation("Job has no provider to review".to_string()))?;

        if self.db_client.get_review_for_job(job_id).await?.is_some() {
            return Err(ServiceError::Conflict { entity: "Review", id: job_id });
        }

        let comment = comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());

        let review = self
            .db_client
            .create_review(job_id, actor.id, worker_id, rating, comment)
            .await
            .map_err(|e| ServiceError::from_unique(e, "Review", job_id))?;

        tracing::info!("Job {} reviewed: {} stars for {}", job_id, rating, worker_id);

        Ok(review)
    }

    pub async fn report_incident(
        &self,
        actor: &Profile,
        job_id: Uuid,
        description: String,
    ) -> Result<Incident, ServiceError> {
        let job = self.load_job(job_id).await?;

        let target_id = if job.client_id == actor.id {
            job.worker_id
                .ok_or_else(|| ServiceError::Validation("Job has no provider yet".to_string()))?
        } else if job.worker_id == Some(actor.id) {
            job.client_id
        } else {
            return Err(ServiceError::Forbidden(
                "Only the people on this job can report an incident".to_string(),
            ));
        };

        let description = description.trim().to_string();
        if description.is_empty() {
            return Err(ServiceError::Validation("Description is required".to_string()));
        }

        let incident = self
            .db_client
            .create_incident(job_id, actor.id, target_id, description)
            .await?;

        tracing::warn!("Incident {} reported on job {} by {}", incident.id, job_id, actor.id);

        Ok(incident)
    }

    pub async fn list_incidents(&self, status: Option<IncidentStatus>) -> Result<Vec<Incident>, ServiceError> {
        Ok(self.db_client.get_incidents(status).await?)
    }

    pub async fn resolve_incident(&self, incident_id: Uuid) -> Result<Incident, ServiceError> {
        self.db_client
            .resolve_incident(incident_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Incident {}", incident_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::usermodel::test_profile;
    use chrono::Utc;
    use sqlx::{postgres::PgPoolOptions, types::Json};
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn lazy_db() -> Arc<DBClient> {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/fixlink")
            .unwrap();
        Arc::new(DBClient::new(pool))
    }

    fn service() -> LabourService {
        let db_client = lazy_db();
        let hub = Arc::new(ChangeHub::default());
        let matching = Arc::new(MatchingService::new(db_client.clone(), hub.clone(), 10.0, 120));
        LabourService::new(db_client, hub, matching)
    }

    /// Job rows in memory with the same version/status guard as the SQL update.
    #[derive(Debug, Default)]
    struct MemoryStore {
        jobs: Mutex<HashMap<Uuid, Job>>,
        verified_workers: Mutex<Vec<Uuid>>,
        statuses: Mutex<Vec<(Uuid, ProviderStatus)>>,
        rebinds: Mutex<Vec<(Uuid, Uuid)>>,
    }

    #[async_trait]
    impl LifecycleStore for MemoryStore {
        async fn create_job(&self, client_id: Uuid, job: NewJob) -> Result<Job, sqlx::Error> {
            let now = Utc::now();
            let job = Job {
                id: Uuid::new_v4(),
                client_id,
                worker_id: None,
                skill: job.skill,
                description: job.description,
                address: job.address,
                lat: job.lat,
                lng: job.lng,
                price: job.price,
                status: JobStatus::Open,
                schedule: job.schedule.map(Json),
                photo_urls: job.photo_urls,
                assigned_at: None,
                started_at: None,
                completed_at: None,
                cancelled_at: None,
                cancel_reason: None,
                version: 1,
                created_at: now,
                updated_at: now,
            };
            self.jobs.lock().unwrap().insert(job.id, job.clone());
            Ok(job)
        }

        async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, sqlx::Error> {
            let job = self.jobs.lock().unwrap().get(&job_id).cloned();
            // Lets a concurrent caller read the same version before anyone writes.
            tokio::task::yield_now().await;
            Ok(job)
        }

        async fn transition_job(&self, transition: JobTransition) -> Result<Option<Job>, sqlx::Error> {
            let mut jobs = self.jobs.lock().unwrap();
            let Some(job) = jobs.get_mut(&transition.job_id) else {
                return Ok(None);
            };
            if job.version != transition.expected_version || !transition.from.contains(&job.status) {
                return Ok(None);
            }

            job.status = transition.to;
            job.version += 1;
            match transition.provider {
                ProviderChange::Keep => {}
                ProviderChange::Set(id) => job.worker_id = Some(id),
                ProviderChange::Clear => job.worker_id = None,
            }
            Ok(Some(job.clone()))
        }

        async fn get_worker_profile(&self, user_id: Uuid) -> Result<Option<WorkerProfile>, sqlx::Error> {
            if !self.verified_workers.lock().unwrap().contains(&user_id) {
                return Ok(None);
            }
            let now = Utc::now();
            Ok(Some(WorkerProfile {
                user_id,
                bio: None,
                skills: vec!["plumber".to_string()],
                lat: Some(6.5),
                lng: Some(3.4),
                status: ProviderStatus::Available,
                rating: 4.5,
                rating_count: 2,
                completed_jobs: 0,
                verified: true,
                docs_complete: true,
                location_updated_at: None,
                version: 1,
                created_at: now,
                updated_at: now,
            }))
        }

        async fn get_driver_profile(&self, _user_id: Uuid) -> Result<Option<DriverProfile>, sqlx::Error> {
            Ok(None)
        }

        async fn set_provider_status(&self, user_id: Uuid, status: ProviderStatus) -> Result<(), sqlx::Error> {
            self.statuses.lock().unwrap().push((user_id, status));
            Ok(())
        }

        async fn increment_completed_jobs(&self, _user_id: Uuid) -> Result<(), sqlx::Error> {
            Ok(())
        }

        async fn rebind_job_chat(&self, job_id: Uuid, provider_id: Uuid) -> Result<u64, sqlx::Error> {
            self.rebinds.lock().unwrap().push((job_id, provider_id));
            Ok(1)
        }
    }

    /// Records every job it is handed and assigns it to `provider_id`.
    #[derive(Debug)]
    struct RecordingMatcher {
        store: Arc<MemoryStore>,
        provider_id: Uuid,
        fail: bool,
        seen: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl AutoAssigner for RecordingMatcher {
        async fn assign_worker_auto(&self, _actor: &Profile, job_id: Uuid) -> Result<AssignmentOutcome, ServiceError> {
            self.seen.lock().unwrap().push(job_id);
            if self.fail {
                return Err(ServiceError::Validation("no candidates".to_string()));
            }

            let job = self.store.get_job(job_id).await?.ok_or(ServiceError::JobNotFound(job_id))?;
            let job = self
                .store
                .transition_job(JobTransition {
                    job_id,
                    expected_version: job.version,
                    from: vec![JobStatus::Open],
                    to: JobStatus::Assigned,
                    provider: ProviderChange::Set(self.provider_id),
                    cancel_reason: None,
                })
                .await?
                .ok_or(ServiceError::Conflict { entity: "Job", id: job_id })?;
            Ok(AssignmentOutcome::Assigned { job, provider_id: self.provider_id })
        }
    }

    fn memory_service(fail_matching: bool) -> (LabourService, Arc<MemoryStore>, Arc<RecordingMatcher>) {
        let store = Arc::new(MemoryStore::default());
        let matcher = Arc::new(RecordingMatcher {
            store: store.clone(),
            provider_id: Uuid::new_v4(),
            fail: fail_matching,
            seen: Mutex::new(vec![]),
        });
        let service = LabourService::with_parts(
            lazy_db(),
            store.clone(),
            Arc::new(ChangeHub::default()),
            matcher.clone(),
        );
        (service, store, matcher)
    }

    fn job_dto(skill: &str) -> CreateJobDto {
        CreateJobDto {
            skill: skill.to_string(),
            description: "Replace the kitchen tap".to_string(),
            address: None,
            lat: 6.5,
            lng: 3.4,
            price: 2500.0,
            schedule: None,
            photo_urls: vec![],
            auto_assign: false,
        }
    }

    #[tokio::test]
    async fn test_blank_skill_is_rejected_before_storage() {
        let client = test_profile(UserRole::Client);
        let result = service().create_job(&client, job_dto("   ")).await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_non_finite_price_is_rejected() {
        let client = test_profile(UserRole::Client);
        let dto = CreateJobDto { price: f64::NAN, ..job_dto("plumber") };
        let result = service().create_job(&client, dto).await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn test_matching_actions_are_not_generic_transitions() {
        let admin = test_profile(UserRole::Admin);
        for action in [JobAction::AutoAssign, JobAction::Reassign, JobAction::Review] {
            let result = service()
                .apply_action(&admin, Uuid::new_v4(), action, None, None)
                .await;
            assert!(matches!(result, Err(ServiceError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_auto_assign_hands_new_job_to_matcher() {
        let (service, _store, matcher) = memory_service(false);
        let client = test_profile(UserRole::Client);

        let dto = CreateJobDto { auto_assign: true, ..job_dto("Plumber") };
        let job = service.create_job(&client, dto).await.unwrap();

        assert_eq!(*matcher.seen.lock().unwrap(), vec![job.id]);
        assert_eq!(job.status, JobStatus::Assigned);
        assert_eq!(job.worker_id, Some(matcher.provider_id));
        assert_eq!(job.skill, "plumber");
    }

    #[tokio::test]
    async fn test_failed_matching_keeps_job_open() {
        let (service, _store, matcher) = memory_service(true);
        let client = test_profile(UserRole::Client);

        let dto = CreateJobDto { auto_assign: true, ..job_dto("plumber") };
        let job = service.create_job(&client, dto).await.unwrap();

        assert_eq!(*matcher.seen.lock().unwrap(), vec![job.id]);
        assert_eq!(job.status, JobStatus::Open);
        assert!(job.worker_id.is_none());
    }

    #[tokio::test]
    async fn test_manual_job_skips_matcher() {
        let (service, _store, matcher) = memory_service(false);
        let client = test_profile(UserRole::Client);

        let job = service.create_job(&client, job_dto("plumber")).await.unwrap();
        assert_eq!(job.status, JobStatus::Open);
        assert!(matcher.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_losing_take_race_is_a_conflict() {
        let (service, store, _matcher) = memory_service(false);
        let client = test_profile(UserRole::Client);
        let first = test_profile(UserRole::Worker);
        let second = test_profile(UserRole::Worker);
        store.verified_workers.lock().unwrap().extend([first.id, second.id]);

        let job = service.create_job(&client, job_dto("plumber")).await.unwrap();

        let (a, b) = tokio::join!(
            service.apply_action(&first, job.id, JobAction::Take, None, None),
            service.apply_action(&second, job.id, JobAction::Take, None, None),
        );

        let (winner, loser) = match (a, b) {
            (Ok(won), Err(lost)) => ((won, first.id), lost),
            (Err(lost), Ok(won)) => ((won, second.id), lost),
            other => panic!("expected exactly one winner, got {:?}", other),
        };
        assert!(matches!(loser, ServiceError::Conflict { entity: "Job", id } if id == job.id));
        assert_eq!(winner.0.status, JobStatus::Accepted);
        assert_eq!(winner.0.worker_id, Some(winner.1));
        assert_eq!(winner.0.version, job.version + 1);

        // Only the winner's side effects ran.
        assert_eq!(*store.statuses.lock().unwrap(), vec![(winner.1, ProviderStatus::Busy)]);
        assert_eq!(*store.rebinds.lock().unwrap(), vec![(job.id, winner.1)]);
    }

    #[tokio::test]
    async fn test_stale_expected_version_is_a_conflict() {
        let (service, store, _matcher) = memory_service(false);
        let client = test_profile(UserRole::Client);
        let worker = test_profile(UserRole::Worker);
        store.verified_workers.lock().unwrap().push(worker.id);

        let job = service.create_job(&client, job_dto("plumber")).await.unwrap();
        let result = service
            .apply_action(&worker, job.id, JobAction::Take, Some(job.version + 5), None)
            .await;

        assert!(matches!(result, Err(ServiceError::Conflict { .. })));
        assert!(store.statuses.lock().unwrap().is_empty());
    }
}
