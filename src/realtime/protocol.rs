// realtime/protocol.rs
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Jobs,
    Messages,
    Profiles,
    WorkerProfiles,
    DriverProfiles,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Jobs => "jobs",
            Table::Messages => "messages",
            Table::Profiles => "profiles",
            Table::WorkerProfiles => "worker_profiles",
            Table::DriverProfiles => "driver_profiles",
        }
    }

    /// Column holding the owner's id, for tables that are private per user.
    pub fn owner_column(&self) -> Option<&'static str> {
        match self {
            Table::Profiles => Some("id"),
            Table::WorkerProfiles | Table::DriverProfiles => Some("user_id"),
            Table::Jobs | Table::Messages => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub seq: u64,
    pub table: Table,
    pub kind: ChangeKind,
    pub record: Value,
    pub committed_at: DateTime<Utc>,
}

/// Frames a subscriber sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe {
        id: String,
        table: Table,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        since: Option<u64>,
    },
    Unsubscribe {
        id: String,
    },
    Heartbeat,
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Subscribed {
        id: String,
        cursor: u64,
    },
    Change {
        id: String,
        event: ChangeEvent,
    },
    /// The requested cursor fell out of the backlog; refetch, then continue from `cursor`.
    ResyncRequired {
        id: String,
        cursor: u64,
    },
    /// Carries how far each subscription has been processed, including
    /// events its filter skipped, so a quiet subscription can resume from there.
    HeartbeatAck {
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        cursors: BTreeMap<String, u64>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        message: String,
    },
}

impl ServerFrame {
    pub fn error(id: Option<String>, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            id,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_frame_wire_format() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "subscribe",
            "id": "chat",
            "table": "messages",
            "filter": "chat_id=eq.42"
        }))
        .unwrap();

        assert_eq!(
            frame,
            ClientFrame::Subscribe {
                id: "chat".to_string(),
                table: Table::Messages,
                filter: Some("chat_id=eq.42".to_string()),
                since: None,
            }
        );
    }

    #[test]
    fn test_server_frames_are_tagged() {
        let ack = serde_json::to_value(ServerFrame::HeartbeatAck {
            cursors: BTreeMap::new(),
        })
        .unwrap();
        assert_eq!(ack, json!({ "type": "heartbeat_ack" }));

        let progress: ServerFrame =
            serde_json::from_value(json!({ "type": "heartbeat_ack", "cursors": { "chat": 12 } })).unwrap();
        assert_eq!(
            progress,
            ServerFrame::HeartbeatAck {
                cursors: BTreeMap::from([("chat".to_string(), 12)]),
            }
        );

        let resync = serde_json::to_value(ServerFrame::ResyncRequired {
            id: "jobs".to_string(),
            cursor: 7,
        })
        .unwrap();
        assert_eq!(resync["type"], "resync_required");
        assert_eq!(resync["cursor"], 7);
    }
}
