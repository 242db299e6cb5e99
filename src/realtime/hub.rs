// realtime/hub.rs
use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

use super::protocol::{ChangeEvent, ChangeKind, Table};

pub const DEFAULT_BACKLOG: usize = 1024;

#[derive(Debug, Error, PartialEq)]
pub enum HubError {
    /// Events after the requested cursor are no longer held.
    #[error("Cursor is older than the replay backlog (head is {head})")]
    ResyncRequired { head: u64 },
}

struct HubInner {
    head: u64,
    backlog: VecDeque<ChangeEvent>,
}

/// In-process change feed. Every published row change gets the next
/// sequence number, lands in a bounded backlog and is broadcast live.
pub struct ChangeHub {
    inner: Mutex<HubInner>,
    sender: broadcast::Sender<ChangeEvent>,
    capacity: usize,
}

impl std::fmt::Debug for ChangeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeHub")
            .field("head", &self.head())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// A live receiver plus whatever the caller missed since its cursor.
pub struct Opened {
    pub receiver: broadcast::Receiver<ChangeEvent>,
    pub head: u64,
    pub replay: Vec<ChangeEvent>,
}

impl Default for ChangeHub {
    fn default() -> Self {
        ChangeHub::new(DEFAULT_BACKLOG)
    }
}

impl ChangeHub {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        ChangeHub {
            inner: Mutex::new(HubInner {
                head: 0,
                backlog: VecDeque::with_capacity(capacity),
            }),
            sender,
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn head(&self) -> u64 {
        self.lock().head
    }

    pub fn publish(&self, table: Table, kind: ChangeKind, record: Value) -> ChangeEvent {
        let mut inner = self.lock();
        inner.head += 1;

        let event = ChangeEvent {
            seq: inner.head,
            table,
            kind,
            record,
            committed_at: Utc::now(),
        };

        if inner.backlog.len() == self.capacity {
            inner.backlog.pop_front();
        }
        inner.backlog.push_back(event.clone());

        // Sent under the lock so live order always equals seq order.
        let _ = self.sender.send(event.clone());

        event
    }

    /// Serializes a row and publishes it; a row that fails to serialize is logged and skipped.
    pub fn publish_row<T: Serialize>(&self, table: Table, kind: ChangeKind, row: &T) {
        match serde_json::to_value(row) {
            Ok(record) => {
                let event = self.publish(table, kind, record);
                tracing::debug!("Published {} change #{}", table.as_str(), event.seq);
            }
            Err(e) => tracing::warn!("Could not serialize {} row for the change feed: {}", table.as_str(), e),
        }
    }

    /// Subscribes and computes the replay in one critical section, so nothing
    /// published concurrently is lost between the two.
    pub fn open(&self, since: Option<u64>) -> Result<Opened, HubError> {
        let inner = self.lock();
        let receiver = self.sender.subscribe();
        let replay = match since {
            Some(cursor) => Self::events_after(&inner, cursor)?,
            None => Vec::new(),
        };

        Ok(Opened {
            receiver,
            head: inner.head,
            replay,
        })
    }

    /// Events with `seq > cursor` still held in the backlog.
    pub fn replay_since(&self, cursor: u64) -> Result<Vec<ChangeEvent>, HubError> {
        let inner = self.lock();
        Self::events_after(&inner, cursor)
    }

    fn events_after(inner: &HubInner, cursor: u64) -> Result<Vec<ChangeEvent>, HubError> {
        // A cursor ahead of head comes from before a restart.
        if cursor > inner.head {
            return Err(HubError::ResyncRequired { head: inner.head });
        }

        let oldest = inner
            .backlog
            .front()
            .map(|event| event.seq)
            .unwrap_or(inner.head + 1);

        if cursor + 1 < oldest {
            return Err(HubError::ResyncRequired { head: inner.head });
        }

        Ok(inner
            .backlog
            .iter()
            .filter(|event| event.seq > cursor)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn publish_n(hub: &ChangeHub, n: usize) {
        for i in 0..n {
            hub.publish(Table::Jobs, ChangeKind::Update, json!({ "n": i }));
        }
    }

    #[test]
    fn test_sequence_numbers_are_monotonic() {
        let hub = ChangeHub::new(8);
        let a = hub.publish(Table::Jobs, ChangeKind::Insert, json!({}));
        let b = hub.publish(Table::Messages, ChangeKind::Insert, json!({}));
        assert_eq!(a.seq, 1);
        assert_eq!(b.seq, 2);
        assert_eq!(hub.head(), 2);
    }

    #[test]
    fn test_replay_returns_only_missed_events() {
        let hub = ChangeHub::new(8);
        publish_n(&hub, 5);

        let replay = hub.replay_since(3).unwrap();
        let seqs: Vec<u64> = replay.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![4, 5]);

        assert!(hub.replay_since(5).unwrap().is_empty());
    }

    #[test]
    fn test_cursor_older_than_backlog_requires_resync() {
        let hub = ChangeHub::new(4);
        publish_n(&hub, 10);

        // backlog holds 7..=10
        assert!(hub.replay_since(6).is_ok());
        assert_eq!(hub.replay_since(5), Err(HubError::ResyncRequired { head: 10 }));
    }

    #[test]
    fn test_cursor_from_previous_process_requires_resync() {
        let hub = ChangeHub::new(4);
        publish_n(&hub, 2);
        assert_eq!(hub.replay_since(40), Err(HubError::ResyncRequired { head: 2 }));
    }

    #[test]
    fn test_zero_cursor_on_fresh_hub_is_fine() {
        let hub = ChangeHub::new(4);
        assert!(hub.replay_since(0).unwrap().is_empty());
        publish_n(&hub, 1);
        assert_eq!(hub.replay_since(0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_has_no_gap_and_no_duplicate() {
        let hub = ChangeHub::new(16);
        publish_n(&hub, 3);

        let mut opened = hub.open(Some(1)).unwrap();
        assert_eq!(opened.head, 3);
        assert_eq!(opened.replay.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2, 3]);

        hub.publish(Table::Jobs, ChangeKind::Update, json!({}));
        let live = opened.receiver.recv().await.unwrap();
        assert_eq!(live.seq, 4);
    }
}
