// service/chat_service.rs
use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::{
    db::{
        cache::{unread_key, CacheHelper, UNREAD_CACHE_TTL},
        chatdb::ChatExt,
        db::DBClient,
        labourdb::LaborExt,
        userdb::ProfileExt,
    },
    models::{
        chatmodels::{Chat, Message},
        labourmodel::Job,
        usermodel::Profile,
    },
    realtime::{
        hub::ChangeHub,
        protocol::{ChangeKind, Table},
    },
    service::error::ServiceError,
};

pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Strips all markup and surrounding whitespace, then enforces 1..=2000 characters.
pub fn sanitize_body(raw: &str) -> Result<String, ServiceError> {
    let mut builder = ammonia::Builder::empty();
    builder.clean_content_tags(HashSet::from(["script", "style"]));
    let cleaned = builder.clean(raw.trim()).to_string();
    let cleaned = cleaned.trim();

    let length = cleaned.chars().count();
    if length == 0 {
        return Err(ServiceError::Validation("Message cannot be empty".to_string()));
    }
    if length > MAX_MESSAGE_CHARS {
        return Err(ServiceError::Validation(format!(
            "Message must be at most {} characters",
            MAX_MESSAGE_CHARS
        )));
    }

    Ok(cleaned.to_string())
}

/// How a job chat's stored pair relates to the job as it stands now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobChatBinding {
    Current,
    /// The job moved to another provider; the chat follows it.
    Rebind(Uuid),
    /// Nobody is on the job right now; only its client keeps the chat.
    Unstaffed,
}

pub fn job_chat_binding(chat: &Chat, job: &Job) -> JobChatBinding {
    match job.worker_id {
        None => JobChatBinding::Unstaffed,
        Some(provider_id)
            if chat.participant_one_id == job.client_id && chat.participant_two_id == provider_id =>
        {
            JobChatBinding::Current
        }
        Some(provider_id) => JobChatBinding::Rebind(provider_id),
    }
}

#[derive(Debug, Clone)]
pub struct ChatService {
    db_client: Arc<DBClient>,
    hub: Arc<ChangeHub>,
}

impl ChatService {
    pub fn new(db_client: Arc<DBClient>, hub: Arc<ChangeHub>) -> Self {
        Self { db_client, hub }
    }

    async fn load_chat(&self, chat_id: Uuid) -> Result<Chat, ServiceError> {
        self.db_client
            .get_chat_by_id(chat_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Chat {}", chat_id)))
    }

    fn ensure_participant(chat: &Chat, actor: &Profile, allow_admin: bool) -> Result<(), ServiceError> {
        if chat.has_participant(actor.id) || (allow_admin && actor.is_admin()) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("You are not part of this chat".to_string()))
        }
    }

    /// Loads a chat the actor may use. Job chats are checked against the
    /// job's current provider, not the pair stored when the chat was opened.
    pub async fn member_chat(&self, actor: &Profile, chat_id: Uuid, allow_admin: bool) -> Result<Chat, ServiceError> {
        let chat = self.load_chat(chat_id).await?;
        let admin = allow_admin && actor.is_admin();

        let job = match chat.job_id {
            Some(job_id) => self.db_client.get_job_by_id(job_id).await?,
            None => None,
        };
        let Some(job) = job else {
            Self::ensure_participant(&chat, actor, allow_admin)?;
            return Ok(chat);
        };

        match job_chat_binding(&chat, &job) {
            JobChatBinding::Current => {
                Self::ensure_participant(&chat, actor, allow_admin)?;
                Ok(chat)
            }
            JobChatBinding::Rebind(provider_id) => {
                if actor.id != job.client_id && actor.id != provider_id && !admin {
                    return Err(ServiceError::Forbidden("You are not part of this chat".to_string()));
                }
                tracing::info!("Chat {} follows job {} to provider {}", chat.id, job.id, provider_id);
                Ok(self
                    .db_client
                    .get_or_create_job_chat(job.id, job.client_id, provider_id)
                    .await?)
            }
            JobChatBinding::Unstaffed => {
                if actor.id != job.client_id && !admin {
                    return Err(ServiceError::Forbidden("You are not part of this chat".to_string()));
                }
                Ok(chat)
            }
        }
    }

    async fn invalidate_unread(&self, user_id: Uuid) {
        if let Some(redis) = &self.db_client.redis_client {
            if let Err(e) = CacheHelper::invalidate_unread_total(redis, user_id).await {
                tracing::warn!("Failed to invalidate unread count for {}: {}", user_id, e);
            }
        }
    }

    pub async fn ensure_chat_for_job(&self, actor: &Profile, job_id: Uuid) -> Result<Chat, ServiceError> {
        let job = self
            .db_client
            .get_job_by_id(job_id)
            .await?
            .ok_or(ServiceError::JobNotFound(job_id))?;

        if !job.involves(actor.id) && !actor.is_admin() {
            return Err(ServiceError::Forbidden(
                "Only the people on this job can open its chat".to_string(),
            ));
        }

        let provider_id = job
            .worker_id
            .ok_or_else(|| ServiceError::Validation("Job has no provider yet".to_string()))?;

        Ok(self
            .db_client
            .get_or_create_job_chat(job.id, job.client_id, provider_id)
            .await?)
    }

    pub async fn open_direct_chat(&self, actor: &Profile, other_id: Uuid) -> Result<Chat, ServiceError> {
        if other_id == actor.id {
            return Err(ServiceError::Validation("You cannot chat with yourself".to_string()));
        }

        if self.db_client.get_profile(other_id).await?.is_none() {
            return Err(ServiceError::NotFound(format!("User {}", other_id)));
        }

        Ok(self
            .db_client
            .get_or_create_direct_chat(actor.id, other_id)
            .await?)
    }

    pub async fn list_chats(&self, actor: &Profile) -> Result<Vec<Chat>, ServiceError> {
        Ok(self.db_client.get_user_chats(actor.id).await?)
    }

    pub async fn post_message(&self, actor: &Profile, chat_id: Uuid, body: &str) -> Result<Message, ServiceError> {
        let body = sanitize_body(body)?;
        let chat = self.member_chat(actor, chat_id, false).await?;

        let message = self.db_client.insert_message(chat.id, actor.id, body).await?;

        self.hub.publish_row(Table::Messages, ChangeKind::Insert, &message);
        self.invalidate_unread(chat.other_participant(actor.id)).await;

        Ok(message)
    }

    pub async fn list_messages(&self, actor: &Profile, chat_id: Uuid) -> Result<Vec<Message>, ServiceError> {
        let chat = self.member_chat(actor, chat_id, true).await?;
        Ok(self.db_client.get_chat_messages(chat.id).await?)
    }

    /// Unread messages across the caller's chats, served from Redis when possible.
    pub async fn unread_total(&self, actor: &Profile) -> Result<i64, ServiceError> {
        let key = unread_key(actor.id);

        if let Some(redis) = &self.db_client.redis_client {
            match CacheHelper::get::<i64>(redis, &key).await {
                Ok(Some(total)) => return Ok(total),
                Ok(None) => {}
                Err(e) => tracing::warn!("Unread cache read failed: {}", e),
            }
        }

        let total = self.db_client.count_unread(actor.id).await?;

        if let Some(redis) = &self.db_client.redis_client {
            if let Err(e) = CacheHelper::set(redis, &key, &total, UNREAD_CACHE_TTL).await {
                tracing::warn!("Unread cache write failed: {}", e);
            }
        }

        Ok(total)
    }

    pub async fn mark_chat_read(&self, actor: &Profile, chat_id: Uuid) -> Result<u64, ServiceError> {
        let chat = self.member_chat(actor, chat_id, false).await?;

        let updated = self.db_client.mark_chat_read(chat.id, actor.id).await?;
        if updated > 0 {
            self.invalidate_unread(actor.id).await;
        }
        Ok(updated)
    }

    /// Marks the job's chat read; a job without a chat has nothing unread.
    pub async fn mark_job_read(&self, actor: &Profile, job_id: Uuid) -> Result<u64, ServiceError> {
        match self.db_client.get_chat_by_job(job_id).await? {
            Some(chat) => self.mark_chat_read(actor, chat.id).await,
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::labourmodel::JobStatus;
    use chrono::Utc;
    use sqlx::types::BigDecimal;

    fn job_with(client_id: Uuid, worker_id: Option<Uuid>) -> Job {
        let now = Utc::now();
        Job {
            id: Uuid::new_v4(),
            client_id,
            worker_id,
            skill: "electrician".to_string(),
            description: "Socket sparks".to_string(),
            address: None,
            lat: 6.5,
            lng: 3.4,
            price: BigDecimal::from(4000),
            status: if worker_id.is_some() { JobStatus::Accepted } else { JobStatus::Open },
            schedule: None,
            photo_urls: vec![],
            assigned_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            version: 3,
            created_at: now,
            updated_at: now,
        }
    }

    fn chat_for(job: &Job, provider_id: Uuid) -> Chat {
        Chat {
            id: Uuid::new_v4(),
            job_id: Some(job.id),
            participant_one_id: job.client_id,
            participant_two_id: provider_id,
            last_message_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_job_chat_follows_reassigned_provider() {
        let client_id = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let job = job_with(client_id, Some(first));
        let chat = chat_for(&job, first);
        assert_eq!(job_chat_binding(&chat, &job), JobChatBinding::Current);

        let reassigned = Job { worker_id: Some(second), ..job };
        assert_eq!(job_chat_binding(&chat, &reassigned), JobChatBinding::Rebind(second));
    }

    #[test]
    fn test_reopened_job_chat_drops_old_provider() {
        let client_id = Uuid::new_v4();
        let provider_id = Uuid::new_v4();
        let job = job_with(client_id, Some(provider_id));
        let chat = chat_for(&job, provider_id);

        let reopened = Job { worker_id: None, status: JobStatus::Open, ..job };
        assert_eq!(job_chat_binding(&chat, &reopened), JobChatBinding::Unstaffed);
    }

    #[test]
    fn test_sanitize_strips_markup() {
        let cleaned = sanitize_body("  <b>On my way</b><script>alert(1)</script> ").unwrap();
        assert_eq!(cleaned, "On my way");
    }

    #[test]
    fn test_sanitize_rejects_empty_after_cleaning() {
        assert!(matches!(sanitize_body("   "), Err(ServiceError::Validation(_))));
        assert!(matches!(sanitize_body("<img src=x>"), Err(ServiceError::Validation(_))));
    }

    #[test]
    fn test_sanitize_enforces_length_in_characters() {
        let exact: String = "é".repeat(MAX_MESSAGE_CHARS);
        assert!(sanitize_body(&exact).is_ok());

        let too_long: String = "a".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(matches!(sanitize_body(&too_long), Err(ServiceError::Validation(_))));
    }
}
