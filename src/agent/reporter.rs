// agent/reporter.rs
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use crate::{service::presence::LocationThrottle, utils::geo::GeoPoint};

pub const SINK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Location request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Location endpoint answered {0}")]
    Status(u16),
}

/// Where the device's position fixes end up.
#[async_trait]
pub trait LocationSink: Send + Sync {
    async fn send(&self, point: GeoPoint) -> Result<(), SinkError>;
}

/// `PUT /api/providers/me/location` with the provider's bearer token.
#[derive(Debug, Clone)]
pub struct HttpLocationSink {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HttpLocationSink {
    pub fn new(api_url: &str, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/api/providers/me/location", api_url.trim_end_matches('/')),
            token: token.into(),
        }
    }
}

#[async_trait]
impl LocationSink for HttpLocationSink {
    async fn send(&self, point: GeoPoint) -> Result<(), SinkError> {
        let response = self
            .client
            .put(&self.endpoint)
            .bearer_auth(&self.token)
            .timeout(SINK_TIMEOUT)
            .json(&json!({ "lat": point.lat, "lng": point.lng }))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(SinkError::Status(response.status().as_u16()))
        }
    }
}

/// Parses one `lat,lng` line; `None` for anything else or an impossible point.
pub fn parse_fix(line: &str) -> Option<GeoPoint> {
    let (lat, lng) = line.trim().split_once(',')?;
    let point = GeoPoint::new(lat.trim().parse().ok()?, lng.trim().parse().ok()?);
    point.is_valid().then_some(point)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Sent,
    Throttled,
    Invalid,
    Failed,
}

/// Device-side throttle in front of a sink. Failed sends are logged and
/// dropped; the next fix is simply tried again.
pub struct LocationReporter<S: LocationSink> {
    sink: S,
    throttle: LocationThrottle,
}

impl<S: LocationSink> LocationReporter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            throttle: LocationThrottle::default(),
        }
    }

    pub fn last_reported(&self) -> Option<GeoPoint> {
        self.throttle.last_reported()
    }

    pub async fn observe(&mut self, point: GeoPoint) -> ReportOutcome {
        self.observe_at(point, Utc::now()).await
    }

    pub async fn observe_at(&mut self, point: GeoPoint, now: DateTime<Utc>) -> ReportOutcome {
        if !point.is_valid() {
            tracing::warn!("Ignoring invalid fix {:?}", point);
            return ReportOutcome::Invalid;
        }
        if !self.throttle.should_report(&point, now) {
            return ReportOutcome::Throttled;
        }

        match self.sink.send(point).await {
            Ok(()) => {
                self.throttle.record(point, now);
                ReportOutcome::Sent
            }
            Err(e) => {
                tracing::warn!("Location update dropped: {}", e);
                ReportOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    };

    #[derive(Clone, Default)]
    struct RecordingSink {
        sent: Arc<Mutex<Vec<GeoPoint>>>,
        failing: Arc<AtomicBool>,
    }

    #[async_trait]
    impl LocationSink for RecordingSink {
        async fn send(&self, point: GeoPoint) -> Result<(), SinkError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SinkError::Status(503));
            }
            self.sent.lock().unwrap().push(point);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_throttles_small_quick_moves() {
        let sink = RecordingSink::default();
        let mut reporter = LocationReporter::new(sink.clone());
        let t0 = Utc::now();
        let origin = GeoPoint::new(6.5, 3.4);

        assert_eq!(reporter.observe_at(origin, t0).await, ReportOutcome::Sent);

        // ~11 m away, 5 s later
        let nudge = GeoPoint::new(6.5001, 3.4);
        assert_eq!(
            reporter.observe_at(nudge, t0 + chrono::Duration::seconds(5)).await,
            ReportOutcome::Throttled
        );

        // same spot but 30 s later
        assert_eq!(
            reporter.observe_at(nudge, t0 + chrono::Duration::seconds(30)).await,
            ReportOutcome::Sent
        );

        // ~110 m away right away
        let far = GeoPoint::new(6.501, 3.4);
        assert_eq!(
            reporter.observe_at(far, t0 + chrono::Duration::seconds(31)).await,
            ReportOutcome::Sent
        );

        assert_eq!(sink.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failures_are_dropped_without_advancing() {
        let sink = RecordingSink::default();
        sink.failing.store(true, Ordering::SeqCst);
        let mut reporter = LocationReporter::new(sink.clone());
        let t0 = Utc::now();
        let point = GeoPoint::new(6.5, 3.4);

        assert_eq!(reporter.observe_at(point, t0).await, ReportOutcome::Failed);
        assert!(reporter.last_reported().is_none());

        sink.failing.store(false, Ordering::SeqCst);
        assert_eq!(
            reporter.observe_at(point, t0 + chrono::Duration::seconds(1)).await,
            ReportOutcome::Sent
        );
    }

    #[test]
    fn test_parse_fix() {
        assert_eq!(parse_fix(" 6.5, 3.4 "), Some(GeoPoint::new(6.5, 3.4)));
        assert_eq!(parse_fix("6.5;3.4"), None);
        assert_eq!(parse_fix("abc,3.4"), None);
        assert_eq!(parse_fix("91,3.4"), None);
    }

    #[tokio::test]
    async fn test_invalid_fix_never_reaches_sink() {
        let sink = RecordingSink::default();
        let mut reporter = LocationReporter::new(sink.clone());
        assert_eq!(
            reporter.observe(GeoPoint::new(95.0, 3.4)).await,
            ReportOutcome::Invalid
        );
        assert!(sink.sent.lock().unwrap().is_empty());
    }
}
