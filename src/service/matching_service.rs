// service/matching_service.rs
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::{
        chatdb::ChatExt,
        db::DBClient,
        labourdb::{JobTransition, LaborExt, ProviderChange},
        workerdb::ProviderExt,
    },
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
    },
    utils::geo::GeoPoint,
};

pub const MAX_SEARCH_RADIUS_KM: f64 = 50.0;

#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    pub user_id: Uuid,
    pub distance_km: f64,
    pub rating: f32,
    pub active_jobs: i64,
}

/// Drops candidates outside `radius_km` or in `exclude`, then orders the
/// rest: fewest active jobs, then nearest, then best rated.
pub fn rank_candidates(
    origin: GeoPoint,
    radius_km: f64,
    candidates: Vec<ProviderCandidate>,
    exclude: &[Uuid],
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = candidates
        .into_iter()
        .filter(|candidate| !exclude.contains(&candidate.user_id))
        .map(|candidate| RankedCandidate {
            user_id: candidate.user_id,
            distance_km: origin.distance_km(&GeoPoint::new(candidate.lat, candidate.lng)),
            rating: candidate.rating,
            active_jobs: candidate.active_jobs,
        })
        .filter(|candidate| candidate.distance_km <= radius_km)
        .collect();

    ranked.sort_by(|a, b| {
        a.active_jobs
            .cmp(&b.active_jobs)
            .then(a.distance_km.total_cmp(&b.distance_km))
            .then(b.rating.total_cmp(&a.rating))
            .then(a.user_id.cmp(&b.user_id))
    });

    ranked
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AssignmentOutcome {
    Assigned { job: Job, provider_id: Uuid },
    /// Nobody suitable was left; the job went back to the open board.
    Reopened { job: Job },
    /// Nothing to do, or nobody to offer it to.
    Unchanged { job: Job },
}

impl AssignmentOutcome {
    pub fn job(&self) -> &Job {
        match self {
            AssignmentOutcome::Assigned { job, .. }
            | AssignmentOutcome::Reopened { job }
            | AssignmentOutcome::Unchanged { job } => job,
        }
    }

    pub fn into_job(self) -> Job {
        match self {
            AssignmentOutcome::Assigned { job, .. }
            | AssignmentOutcome::Reopened { job }
            | AssignmentOutcome::Unchanged { job } => job,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NearbyJob {
    #[serde(flatten)]
    pub job: Job,
    pub distance_km: f64,
}

/// Rejected jobs always need a new provider; assigned ones only once the
/// offer has gone unanswered for `timeout`.
pub fn needs_reassignment(job: &Job, now: chrono::DateTime<Utc>, timeout: Duration) -> bool {
    match job.status {
        JobStatus::Rejected => true,
        JobStatus::Assigned => job
            .assigned_at
            .map(|assigned_at| now - assigned_at >= timeout)
            .unwrap_or(true),
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct MatchingService {
    db_client: Arc<DBClient>,
    hub: Arc<ChangeHub>,
    radius_km: f64,
    assignment_timeout: Duration,
}

impl MatchingService {
    pub fn new(
        db_client: Arc<DBClient>,
        hub: Arc<ChangeHub>,
        radius_km: f64,
        assignment_timeout_secs: i64,
    ) -> Self {
        Self {
            db_client,
            hub,
            radius_km,
            assignment_timeout: Duration::seconds(assignment_timeout_secs),
        }
    }

    async fn load_job(&self, job_id: Uuid) -> Result<Job, ServiceError> {
        self.db_client
            .get_job_by_id(job_id)
            .await?
            .ok_or(ServiceError::JobNotFound(job_id))
    }

    fn authorize(&self, actor: &Profile, job: &Job, action: JobAction) -> Result<(), ServiceError> {
        let viewer = JobViewer::of(actor, job);
        if lifecycle::is_allowed(action, job.status, viewer, false) {
            return Ok(());
        }

        if action.target(job.status).is_none() {
            Err(ServiceError::InvalidTransition {
                job_id: job.id,
                status: job.status,
                action,
            })
        } else {
            Err(ServiceError::Forbidden(format!(
                "You are not allowed to {} this job",
                action
            )))
        }
    }

    async fn ranked_for(&self, job: &Job) -> Result<Vec<RankedCandidate>, ServiceError> {
        let origin = GeoPoint::new(job.lat, job.lng);
        let bbox = origin.bounding_box(self.radius_km);

        let candidates = if job.is_taxi_job() {
            self.db_client.find_driver_candidates(bbox).await?
        } else {
            self.db_client
                .find_worker_candidates(&job.skill.to_lowercase(), bbox)
                .await?
        };

        let mut exclude = self.db_client.get_attempted_providers(job.id).await?;
        exclude.push(job.client_id);

        Ok(rank_candidates(origin, self.radius_km, candidates, &exclude))
    }

    /// Offers the job to the best remaining candidate. `Ok(None)` when nobody is left.
    async fn offer_to_next(&self, job: &Job) -> Result<Option<(Job, Uuid)>, ServiceError> {
        let ranked = self.ranked_for(job).await?;
        let Some(best) = ranked.first() else {
            return Ok(None);
        };

        let updated = self
            .db_client
            .transition_job(JobTransition {
                job_id: job.id,
                expected_version: job.version,
                from: vec![job.status],
                to: JobStatus::Assigned,
                provider: ProviderChange::Set(best.user_id),
                cancel_reason: None,
            })
            .await?
            .ok_or(ServiceError::Conflict { entity: "Job", id: job.id })?;

        self.db_client
            .record_assignment_attempt(job.id, best.user_id)
            .await?;

        if let Err(e) = self.db_client.rebind_job_chat(job.id, best.user_id).await {
            tracing::warn!("Chat for job {} still points at the previous provider: {}", job.id, e);
        }

        tracing::info!(
            "Job {} offered to provider {} ({:.2} km away, {} active jobs)",
            job.id,
            best.user_id,
            best.distance_km,
            best.active_jobs
        );

        self.hub.publish_row(Table::Jobs, ChangeKind::Update, &updated);

        Ok(Some((updated, best.user_id)))
    }

    pub async fn assign_worker_auto(&self, actor: &Profile, job_id: Uuid) -> Result<AssignmentOutcome, ServiceError> {
        let job = self.load_job(job_id).await?;
        self.authorize(actor, &job, JobAction::AutoAssign)?;

        match self.offer_to_next(&job).await? {
            Some((job, provider_id)) => Ok(AssignmentOutcome::Assigned { job, provider_id }),
            None => {
                tracing::info!("No provider available for job {}", job.id);
                Ok(AssignmentOutcome::Unchanged { job })
            }
        }
    }

    /// Admin entry point; an assigned job is reassigned right away.
    pub async fn reassign_worker_if_needed(
        &self,
        actor: &Profile,
        job_id: Uuid,
    ) -> Result<AssignmentOutcome, ServiceError> {
        let job = self.load_job(job_id).await?;
        self.authorize(actor, &job, JobAction::Reassign)?;
        self.reassign(job).await
    }

    async fn reassign(&self, job: Job) -> Result<AssignmentOutcome, ServiceError> {
        match self.offer_to_next(&job).await? {
            Some((job, provider_id)) => Ok(AssignmentOutcome::Assigned { job, provider_id }),
            None => {
                let reopened = self
                    .db_client
                    .transition_job(JobTransition {
                        job_id: job.id,
                        expected_version: job.version,
                        from: vec![job.status],
                        to: JobStatus::Open,
                        provider: ProviderChange::Clear,
                        cancel_reason: None,
                    })
                    .await?
                    .ok_or(ServiceError::Conflict { entity: "Job", id: job.id })?;

                tracing::info!("Job {} reopened; no provider left to offer it to", job.id);
                self.hub.publish_row(Table::Jobs, ChangeKind::Update, &reopened);

                Ok(AssignmentOutcome::Reopened { job: reopened })
            }
        }
    }

    /// Reassigns every rejected or timed-out assignment. Per-job failures are logged and skipped.
    pub async fn sweep_stale_assignments(&self) -> Result<usize, ServiceError> {
        let now = Utc::now();
        let stale = self
            .db_client
            .get_stale_assignments(now - self.assignment_timeout)
            .await?;

        let mut handled = 0;
        for job in stale {
            if !needs_reassignment(&job, now, self.assignment_timeout) {
                continue;
            }

            let job_id = job.id;
            match self.reassign(job).await {
                Ok(_) => handled += 1,
                Err(ServiceError::Conflict { .. }) => {
                    tracing::debug!("Job {} changed during sweep; leaving it", job_id)
                }
                Err(e) => tracing::error!("Failed to reassign job {}: {}", job_id, e),
            }
        }

        Ok(handled)
    }

    /// Open jobs within `radius_km` of `origin` that match what the caller can do.
    pub async fn find_nearby_jobs(
        &self,
        actor: &Profile,
        origin: GeoPoint,
        radius_km: Option<f64>,
    ) -> Result<Vec<NearbyJob>, ServiceError> {
        if !origin.is_valid() {
            return Err(ServiceError::Validation("Invalid coordinates".to_string()));
        }

        let radius_km = radius_km.unwrap_or(self.radius_km);
        if !(radius_km > 0.0 && radius_km <= MAX_SEARCH_RADIUS_KM) {
            return Err(ServiceError::Validation(format!(
                "Radius must be between 0 and {} km",
                MAX_SEARCH_RADIUS_KM
            )));
        }

        let skills = match actor.role {
            UserRole::Worker => {
                let profile = self
                    .db_client
                    .get_worker_profile(actor.id)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound("Worker profile".to_string()))?;
                Some(profile.skills.iter().map(|s| s.to_lowercase()).collect())
            }
            UserRole::Taxi => Some(vec![TAXI_SKILL.to_string()]),
            UserRole::Admin => None,
            UserRole::Client => {
                return Err(ServiceError::Forbidden(
                    "Only providers can browse nearby jobs".to_string(),
                ))
            }
        };

        let jobs = self
            .db_client
            .get_open_jobs_in_box(origin.bounding_box(radius_km), skills)
            .await?;

        Ok(nearby_within(origin, radius_km, jobs, actor.id))
    }
}

fn nearby_within(origin: GeoPoint, radius_km: f64, jobs: Vec<Job>, viewer_id: Uuid) -> Vec<NearbyJob> {
    let mut nearby: Vec<NearbyJob> = jobs
        .into_iter()
        .filter(|job| job.client_id != viewer_id)
        .map(|job| {
            let distance_km = origin.distance_km(&GeoPoint::new(job.lat, job.lng));
            NearbyJob { job, distance_km }
        })
        .filter(|nearby| nearby.distance_km <= radius_km)
        .collect();

    nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    nearby
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::types::BigDecimal;

    fn candidate(id: u128, lat: f64, lng: f64, rating: f32, active_jobs: i64) -> ProviderCandidate {
        ProviderCandidate {
            user_id: Uuid::from_u128(id),
            lat,
            lng,
            rating,
            active_jobs,
        }
    }

    fn origin() -> GeoPoint {
        GeoPoint::new(6.5244, 3.3792)
    }

    #[test]
    fn test_least_loaded_wins_over_nearest() {
        let ranked = rank_candidates(
            origin(),
            10.0,
            vec![
                candidate(1, 6.5245, 3.3792, 5.0, 2),
                candidate(2, 6.5600, 3.3792, 3.0, 0),
            ],
            &[],
        );
        assert_eq!(ranked[0].user_id, Uuid::from_u128(2));
    }

    #[test]
    fn test_nearest_then_rating_break_ties() {
        let ranked = rank_candidates(
            origin(),
            10.0,
            vec![
                candidate(1, 6.5400, 3.3792, 5.0, 0),
                candidate(2, 6.5300, 3.3792, 4.0, 0),
                candidate(3, 6.5300, 3.3792, 4.8, 0),
            ],
            &[],
        );
        let order: Vec<u128> = ranked.iter().map(|c| c.user_id.as_u128()).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }

    #[test]
    fn test_radius_and_exclusions_filter() {
        let ranked = rank_candidates(
            origin(),
            5.0,
            vec![
                candidate(1, 6.5250, 3.3792, 4.0, 0),
                candidate(2, 7.5244, 3.3792, 5.0, 0),
                candidate(3, 6.5260, 3.3792, 4.0, 0),
            ],
            &[Uuid::from_u128(3)],
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].user_id, Uuid::from_u128(1));
    }

    fn job(status: JobStatus, assigned_secs_ago: Option<i64>, lat: f64) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            client_id: Uuid::from_u128(99),
            worker_id: None,
            skill: "plumber".to_string(),
            description: "Leak".to_string(),
            address: None,
            lat,
            lng: 3.3792,
            price: BigDecimal::from(100),
            status,
            schedule: None,
            photo_urls: vec![],
            assigned_at: assigned_secs_ago.map(|s| now - Duration::seconds(s)),
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_needs_reassignment() {
        let now = Utc::now();
        let timeout = Duration::seconds(120);
        assert!(needs_reassignment(&job(JobStatus::Rejected, None, 0.0), now, timeout));
        assert!(needs_reassignment(&job(JobStatus::Assigned, Some(300), 0.0), now, timeout));
        assert!(!needs_reassignment(&job(JobStatus::Assigned, Some(10), 0.0), now, timeout));
        assert!(!needs_reassignment(&job(JobStatus::Accepted, Some(300), 0.0), now, timeout));
    }

    #[test]
    fn test_nearby_jobs_sorted_and_own_jobs_hidden() {
        let far = job(JobStatus::Open, None, 6.60);
        let near = job(JobStatus::Open, None, 6.53);
        let too_far = job(JobStatus::Open, None, 7.50);
        let mut own = job(JobStatus::Open, None, 6.5244);
        own.client_id = Uuid::from_u128(7);

        let result = nearby_within(
            origin(),
            10.0,
            vec![far.clone(), own, too_far, near.clone()],
            Uuid::from_u128(7),
        );

        let ids: Vec<Uuid> = result.iter().map(|n| n.job.id).collect();
        assert_eq!(ids, vec![near.id, far.id]);
        assert!(result[0].distance_km < result[1].distance_km);
    }

    #[test]
    fn test_outcome_exposes_job() {
        let j = job(JobStatus::Open, None, 0.0);
        let outcome = AssignmentOutcome::Unchanged { job: j.clone() };
        assert_eq!(outcome.job().id, j.id);
        assert_eq!(outcome.into_job().id, j.id);
    }
}
