// agent/chat.rs
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    models::chatmodels::Message,
    realtime::{
        client::{Delivery, SubscriptionHandle, SubscriptionManager},
        feed::MessageFeed,
        protocol::{ChangeKind, Table},
    },
};

const HISTORY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("History request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("History endpoint answered {0}")]
    Status(u16),

    #[error("Subscription rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    data: Option<Vec<Message>>,
}

/// Local copy of one chat: history over HTTP, new messages over the change feed.
pub struct ChatMirror {
    chat_id: Uuid,
    client: reqwest::Client,
    history_url: String,
    token: String,
    feed: MessageFeed,
}

impl ChatMirror {
    pub fn new(api_url: &str, token: impl Into<String>, chat_id: Uuid) -> Self {
        Self {
            chat_id,
            client: reqwest::Client::new(),
            history_url: format!(
                "{}/api/chats/{}/messages",
                api_url.trim_end_matches('/'),
                chat_id
            ),
            token: token.into(),
            feed: MessageFeed::new(),
        }
    }

    pub fn feed(&self) -> &MessageFeed {
        &self.feed
    }

    pub fn subscribe(&self, manager: &SubscriptionManager) -> SubscriptionHandle {
        manager.subscribe(Table::Messages, Some(format!("chat_id=eq.{}", self.chat_id)))
    }

    /// Merges the server's full history; returns how many messages were new.
    pub async fn refresh(&mut self) -> Result<usize, MirrorError> {
        let response = self
            .client
            .get(&self.history_url)
            .bearer_auth(&self.token)
            .timeout(HISTORY_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MirrorError::Status(response.status().as_u16()));
        }

        let history: HistoryResponse = response.json().await?;
        Ok(self.feed.extend(history.data.unwrap_or_default()))
    }

    /// Applies one delivery. Inserted messages are returned for display.
    pub async fn apply(&mut self, delivery: Delivery) -> Result<Option<Message>, MirrorError> {
        match delivery {
            Delivery::Change(event) if event.table == Table::Messages && event.kind == ChangeKind::Insert => {
                match serde_json::from_value::<Message>(event.record) {
                    Ok(message) if message.chat_id == self.chat_id => {
                        let shown = message.clone();
                        Ok(self.feed.insert(message).then_some(shown))
                    }
                    Ok(_) => Ok(None),
                    Err(e) => {
                        tracing::warn!("Skipping undecodable message event #{}: {}", event.seq, e);
                        Ok(None)
                    }
                }
            }
            Delivery::Change(_) => Ok(None),
            Delivery::ResyncRequired { cursor } => {
                tracing::info!("Chat {} fell behind the feed at #{}, reloading history", self.chat_id, cursor);
                self.refresh().await?;
                Ok(None)
            }
            Delivery::Rejected(reason) => Err(MirrorError::Rejected(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::protocol::ChangeEvent;
    use chrono::Utc;

    fn insert_event(seq: u64, message: &Message) -> Delivery {
        Delivery::Change(ChangeEvent {
            seq,
            table: Table::Messages,
            kind: ChangeKind::Insert,
            record: serde_json::to_value(message).unwrap(),
            committed_at: Utc::now(),
        })
    }

    fn message(chat_id: Uuid, body: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            chat_id,
            sender_id: Uuid::new_v4(),
            body: body.to_string(),
            created_at: Utc::now(),
            read_at: None,
        }
    }

    #[tokio::test]
    async fn test_apply_inserts_once_and_ignores_other_chats() {
        let chat_id = Uuid::new_v4();
        let mut mirror = ChatMirror::new("http://127.0.0.1:9", "token", chat_id);

        let hello = message(chat_id, "hello");
        assert!(mirror.apply(insert_event(1, &hello)).await.unwrap().is_some());
        assert!(mirror.apply(insert_event(2, &hello)).await.unwrap().is_none());

        let elsewhere = message(Uuid::new_v4(), "not ours");
        assert!(mirror.apply(insert_event(3, &elsewhere)).await.unwrap().is_none());

        assert_eq!(mirror.feed().len(), 1);
    }

    #[tokio::test]
    async fn test_rejection_surfaces_as_error() {
        let mut mirror = ChatMirror::new("http://127.0.0.1:9", "token", Uuid::new_v4());
        let result = mirror.apply(Delivery::Rejected("not a participant".to_string())).await;
        assert!(matches!(result, Err(MirrorError::Rejected(_))));
    }
}
