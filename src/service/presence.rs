// service/presence.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::{db::DBClient, workerdb::ProviderExt},
    models::usermodel::{Profile, UserRole},
    realtime::{
        hub::ChangeHub,
        protocol::{ChangeKind, Table},
    },
    service::error::ServiceError,
    utils::geo::GeoPoint,
};

/// Movement below this many metres is not worth reporting on its own.
pub const MIN_REPORT_DISTANCE_M: f64 = 25.0;
/// ...unless this long has passed since the last report.
pub const MIN_REPORT_INTERVAL_SECS: i64 = 30;

#[derive(Debug, Clone, Default)]
pub struct LocationThrottle {
    last: Option<(GeoPoint, DateTime<Utc>)>,
}

impl LocationThrottle {
    /// A report is skipped only when it is both close to the last reported
    /// point and too soon after it.
    pub fn should_report(&self, point: &GeoPoint, now: DateTime<Utc>) -> bool {
        match &self.last {
            None => true,
            Some((last_point, last_at)) => {
                let near = last_point.distance_m(point) <= MIN_REPORT_DISTANCE_M;
                let recent = now - *last_at < Duration::seconds(MIN_REPORT_INTERVAL_SECS);
                !(near && recent)
            }
        }
    }

    pub fn record(&mut self, point: GeoPoint, at: DateTime<Utc>) {
        self.last = Some((point, at));
    }

    pub fn last_reported(&self) -> Option<GeoPoint> {
        self.last.map(|(point, _)| point)
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.last
            .map_or(false, |(_, at)| now - at < Duration::seconds(MIN_REPORT_INTERVAL_SECS))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LocationUpdate {
    Reported { lat: f64, lng: f64 },
    Skipped,
}

#[derive(Debug)]
pub struct LocationService {
    db_client: Arc<DBClient>,
    hub: Arc<ChangeHub>,
    throttles: Mutex<HashMap<Uuid, LocationThrottle>>,
}

impl LocationService {
    pub fn new(db_client: Arc<DBClient>, hub: Arc<ChangeHub>) -> Self {
        Self {
            db_client,
            hub,
            throttles: Mutex::new(HashMap::new()),
        }
    }

    /// Claims the report slot for `user_id` under a single lock, so two
    /// concurrent reports cannot both pass the throttle. Returns the state to
    /// restore if storing fails, or `None` when the report is throttled.
    fn reserve(&self, user_id: Uuid, point: GeoPoint, now: DateTime<Utc>) -> Option<LocationThrottle> {
        let mut throttles = self.throttles.lock().unwrap_or_else(|p| p.into_inner());
        // Entries past the interval no longer hold anything back.
        throttles.retain(|_, throttle| throttle.is_fresh(now));

        let throttle = throttles.entry(user_id).or_default();
        if !throttle.should_report(&point, now) {
            return None;
        }

        let previous = throttle.clone();
        throttle.record(point, now);
        Some(previous)
    }

    /// Undoes a reservation, unless a later report has already replaced it.
    fn release(&self, user_id: Uuid, claimed: (GeoPoint, DateTime<Utc>), previous: LocationThrottle) {
        let mut throttles = self.throttles.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(throttle) = throttles.get_mut(&user_id) {
            if throttle.last == Some(claimed) {
                *throttle = previous;
            }
        }
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.throttles.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub async fn report(&self, profile: &Profile, point: GeoPoint) -> Result<LocationUpdate, ServiceError> {
        if !point.is_valid() {
            return Err(ServiceError::Validation(
                "Latitude must be within [-90, 90] and longitude within [-180, 180]".to_string(),
            ));
        }
        if !matches!(profile.role, UserRole::Worker | UserRole::Taxi) {
            return Err(ServiceError::Forbidden(
                "Only workers and drivers report their location".to_string(),
            ));
        }

        let now = Utc::now();
        let Some(previous) = self.reserve(profile.id, point, now) else {
            return Ok(LocationUpdate::Skipped);
        };

        // Only a stored report moves the throttle forward.
        if let Err(e) = self.store(profile, point).await {
            self.release(profile.id, (point, now), previous);
            return Err(e);
        }

        Ok(LocationUpdate::Reported {
            lat: point.lat,
            lng: point.lng,
        })
    }

    async fn store(&self, profile: &Profile, point: GeoPoint) -> Result<(), ServiceError> {
        if profile.role == UserRole::Taxi {
            let row = self
                .db_client
                .update_driver_location(profile.id, point.lat, point.lng)
                .await?
                .ok_or_else(|| ServiceError::NotFound("Driver profile".to_string()))?;
            self.hub.publish_row(Table::DriverProfiles, ChangeKind::Update, &row);
        } else {
            let row = self
                .db_client
                .update_worker_location(profile.id, point.lat, point.lng)
                .await?
                .ok_or_else(|| ServiceError::NotFound("Worker profile".to_string()))?;
            self.hub.publish_row(Table::WorkerProfiles, ChangeKind::Update, &row);
        }
        Ok(())
    }
}
