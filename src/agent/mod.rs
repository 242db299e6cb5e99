//! Device-side pieces used by the `field_agent` binary.

pub mod chat;
pub mod reporter;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::realtime::{client::SubscriptionManager, policy::ReconnectPolicy};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_url: String,
    pub ws_url: String,
    pub token: String,
    pub chat_id: Option<Uuid>,
}

impl AgentConfig {
    pub fn init() -> AgentConfig {
        let api_url = std::env::var("FIXLINK_API_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());
        let ws_url = std::env::var("FIXLINK_WS_URL")
            .unwrap_or_else(|_| format!("{}/api/realtime", api_url.replacen("http", "ws", 1)));
        let token = std::env::var("FIXLINK_TOKEN").expect("FIXLINK_TOKEN must be set");

        let chat_id = std::env::var("FIXLINK_CHAT_ID")
            .ok()
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| match Uuid::parse_str(&raw) {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::warn!("FIXLINK_CHAT_ID is not a uuid, chat mirroring disabled");
                    None
                }
            });

        AgentConfig {
            api_url,
            ws_url,
            token,
            chat_id,
        }
    }
}

/// Opens the change-feed connection with the default reconnect policy.
pub fn connect_feed(config: &AgentConfig) -> (SubscriptionManager, JoinHandle<()>) {
    SubscriptionManager::connect(&config.ws_url, &config.token, ReconnectPolicy::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::protocol::Table;

    #[tokio::test]
    async fn test_connect_feed_keeps_retrying_unreachable_server() {
        let config = AgentConfig {
            api_url: "http://127.0.0.1:9".to_string(),
            ws_url: "ws://127.0.0.1:9/api/realtime".to_string(),
            token: "token".to_string(),
            chat_id: None,
        };

        let (manager, connection) = connect_feed(&config);
        let _jobs = manager.subscribe(Table::Jobs, None);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!connection.is_finished());
        connection.abort();
    }
}
