// realtime/feed.rs
use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use uuid::Uuid;

use crate::{
    models::{
        chatmodels::Message,
        labourmodel::{Job, JobStatus},
    },
    realtime::protocol::{ChangeEvent, ChangeKind, Table},
};

/// The part of a job row every subscriber receives, even for jobs it may not see in full.
#[derive(Debug, Deserialize)]
struct JobStatusChange {
    id: Uuid,
    status: Option<JobStatus>,
    version: Option<i32>,
}

/// Local copy of one chat's messages, kept sorted by `(created_at, id)`
/// with every message id at most once, whatever order inserts arrive in.
#[derive(Debug, Default, Clone)]
pub struct MessageFeed {
    messages: Vec<Message>,
    seen: HashSet<Uuid>,
}

impl MessageFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the feed from a fetched page; duplicates are dropped.
    pub fn from_history(history: Vec<Message>) -> Self {
        let mut feed = Self::new();
        feed.extend(history);
        feed
    }

    /// Returns false when the message was already present.
    pub fn insert(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id) {
            return false;
        }

        let key = (message.created_at, message.id);
        let position = self
            .messages
            .partition_point(|existing| (existing.created_at, existing.id) <= key);
        self.messages.insert(position, message);
        true
    }

    pub fn extend<I: IntoIterator<Item = Message>>(&mut self, messages: I) -> usize {
        messages
            .into_iter()
            .filter(|message| self.insert(message.clone()))
            .count()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Latest known state per job. An older version never overwrites a newer one.
#[derive(Debug, Default, Clone)]
pub struct JobBoard {
    jobs: HashMap<Uuid, Job>,
}

impl JobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, job: Job) -> bool {
        match self.jobs.get(&job.id) {
            Some(current) if current.version >= job.version => false,
            _ => {
                self.jobs.insert(job.id, job);
                true
            }
        }
    }

    /// Folds one `jobs` change into the board. Full rows replace older
    /// versions; a redacted row only ever removes a job that left `open`.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> bool {
        if event.table != Table::Jobs {
            return false;
        }

        if event.kind != ChangeKind::Delete {
            if let Ok(job) = serde_json::from_value::<Job>(event.record.clone()) {
                return self.apply(job);
            }
        }

        let change = match serde_json::from_value::<JobStatusChange>(event.record.clone()) {
            Ok(change) => change,
            Err(e) => {
                tracing::debug!("Ignoring job event #{} without an id: {}", event.seq, e);
                return false;
            }
        };

        if let (Some(current), Some(version)) = (self.jobs.get(&change.id), change.version) {
            if current.version >= version {
                return false;
            }
        }

        let gone = event.kind == ChangeKind::Delete
            || change.status.map_or(false, |status| status != JobStatus::Open);
        gone && self.remove(change.id).is_some()
    }

    pub fn remove(&mut self, job_id: Uuid) -> Option<Job> {
        self.jobs.remove(&job_id)
    }

    pub fn get(&self, job_id: Uuid) -> Option<&Job> {
        self.jobs.get(&job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Open jobs, newest first.
    pub fn open_jobs(&self) -> Vec<&Job> {
        let mut open: Vec<&Job> = self
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Open)
            .collect();
        open.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use sqlx::types::BigDecimal;

    fn message(id: u128, seconds: i64) -> Message {
        Message {
            id: Uuid::from_u128(id),
            chat_id: Uuid::nil(),
            sender_id: Uuid::nil(),
            body: format!("m{}", id),
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(seconds),
            read_at: None,
        }
    }

    fn assert_sorted_unique(feed: &MessageFeed) {
        let messages = feed.messages();
        for pair in messages.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
        let ids: HashSet<Uuid> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids.len(), messages.len());
    }

    #[test]
    fn test_out_of_order_inserts_end_sorted() {
        let mut feed = MessageFeed::new();
        for (id, at) in [(3, 30), (1, 10), (4, 40), (2, 20)] {
            assert!(feed.insert(message(id, at)));
        }

        let ids: Vec<u128> = feed.messages().iter().map(|m| m.id.as_u128()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_sorted_unique(&feed);
    }

    #[test]
    fn test_duplicate_delivery_is_dropped() {
        let mut feed = MessageFeed::from_history(vec![message(1, 10), message(2, 20)]);
        assert!(!feed.insert(message(2, 20)));
        assert_eq!(feed.extend(vec![message(1, 10), message(3, 30), message(3, 30)]), 1);
        assert_eq!(feed.len(), 3);
        assert_sorted_unique(&feed);
    }

    #[test]
    fn test_equal_timestamps_order_by_id() {
        let mut feed = MessageFeed::new();
        feed.insert(message(9, 5));
        feed.insert(message(2, 5));
        feed.insert(message(5, 5));

        let ids: Vec<u128> = feed.messages().iter().map(|m| m.id.as_u128()).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[test]
    fn test_arbitrary_permutations_stay_sorted() {
        let base: Vec<Message> = (0..12).map(|i| message(i as u128, (i as i64 * 7) % 5)).collect();

        for rotation in 0..base.len() {
            let mut arrival = base.clone();
            arrival.rotate_left(rotation);
            arrival.reverse();
            arrival.extend(base.iter().step_by(3).cloned());

            let mut feed = MessageFeed::new();
            feed.extend(arrival);
            assert_eq!(feed.len(), base.len());
            assert_sorted_unique(&feed);
        }
    }

    fn job(version: i32, status: JobStatus) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::from_u128(1),
            client_id: Uuid::nil(),
            worker_id: None,
            skill: "plumber".to_string(),
            description: "Leak".to_string(),
            address: None,
            lat: 0.0,
            lng: 0.0,
            price: BigDecimal::from(100),
            status,
            schedule: None,
            photo_urls: vec![],
            assigned_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            version,
            created_at: now,
            updated_at: now,
        }
    }

    fn job_event(seq: u64, kind: ChangeKind, record: serde_json::Value) -> ChangeEvent {
        ChangeEvent {
            seq,
            table: Table::Jobs,
            kind,
            record,
            committed_at: Utc::now(),
        }
    }

    #[test]
    fn test_redacted_update_drops_taken_job() {
        let mut board = JobBoard::new();
        let open = serde_json::to_value(job(1, JobStatus::Open)).unwrap();
        assert!(board.apply_event(&job_event(1, ChangeKind::Insert, open)));
        assert_eq!(board.open_jobs().len(), 1);

        // stale summary is ignored
        let stale = serde_json::json!({ "id": Uuid::from_u128(1), "status": "accepted", "version": 1 });
        assert!(!board.apply_event(&job_event(2, ChangeKind::Update, stale)));
        assert_eq!(board.open_jobs().len(), 1);

        let taken = serde_json::json!({ "id": Uuid::from_u128(1), "status": "accepted", "version": 2 });
        assert!(board.apply_event(&job_event(3, ChangeKind::Update, taken)));
        assert!(board.is_empty());
    }

    #[test]
    fn test_delete_event_removes_job() {
        let mut board = JobBoard::new();
        board.apply(job(1, JobStatus::Open));
        let deleted = serde_json::json!({ "id": Uuid::from_u128(1) });
        assert!(board.apply_event(&job_event(2, ChangeKind::Delete, deleted)));
        assert!(board.is_empty());
    }

    #[test]
    fn test_job_board_keeps_newest_version() {
        let mut board = JobBoard::new();
        assert!(board.apply(job(2, JobStatus::Accepted)));
        assert!(!board.apply(job(1, JobStatus::Open)));
        assert!(!board.apply(job(2, JobStatus::Open)));
        assert_eq!(board.get(Uuid::from_u128(1)).unwrap().status, JobStatus::Accepted);
        assert!(board.open_jobs().is_empty());

        assert!(board.apply(job(3, JobStatus::Cancelled)));
        assert_eq!(board.len(), 1);
    }
}
