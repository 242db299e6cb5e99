// db/chatdb.rs
use async_trait::async_trait;
use sqlx::Error;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::chatmodels::*;

const CHAT_COLUMNS: &str =
    "id, job_id, participant_one_id, participant_two_id, last_message_at, created_at";

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, body, created_at, read_at";

#[async_trait]
pub trait ChatExt {
    async fn get_or_create_job_chat(
        &self,
        job_id: Uuid,
        client_id: Uuid,
        provider_id: Uuid,
    ) -> Result<Chat, Error>;

    async fn get_or_create_direct_chat(
        &self,
        user_one_id: Uuid,
        user_two_id: Uuid,
    ) -> Result<Chat, Error>;

    /// Points an existing job chat at a new provider. Returns rows changed.
    async fn rebind_job_chat(&self, job_id: Uuid, provider_id: Uuid) -> Result<u64, Error>;

    async fn get_chat_by_id(&self, chat_id: Uuid) -> Result<Option<Chat>, Error>;

    async fn get_chat_by_job(&self, job_id: Uuid) -> Result<Option<Chat>, Error>;

    async fn get_user_chats(&self, user_id: Uuid) -> Result<Vec<Chat>, Error>;

    /// Inserts the message and bumps the chat's `last_message_at` in one statement.
    async fn insert_message(
        &self,
        chat_id: Uuid,
        sender_id: Uuid,
        body: String,
    ) -> Result<Message, Error>;

    async fn get_chat_messages(&self, chat_id: Uuid) -> Result<Vec<Message>, Error>;

    async fn mark_chat_read(&self, chat_id: Uuid, reader_id: Uuid) -> Result<u64, Error>;

    async fn count_unread(&self, user_id: Uuid) -> Result<i64, Error>;
}

#[async_trait]
impl ChatExt for DBClient {
    async fn get_or_create_job_chat(
        &self,
        job_id: Uuid,
        client_id: Uuid,
        provider_id: Uuid,
    ) -> Result<Chat, Error> {
        // An existing job chat is rebound to the job's current pair.
        sqlx::query_as::<_, Chat>(&format!(
            r#"
            INSERT INTO chats (job_id, participant_one_id, participant_two_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (job_id) DO UPDATE
                SET participant_one_id = EXCLUDED.participant_one_id,
                    participant_two_id = EXCLUDED.participant_two_id
            RETURNING {}
            "#,
            CHAT_COLUMNS
        ))
        .bind(job_id)
        .bind(client_id)
        .bind(provider_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_or_create_direct_chat(
        &self,
        user_one_id: Uuid,
        user_two_id: Uuid,
    ) -> Result<Chat, Error> {
        let find = format!(
            r#"
            SELECT {} FROM chats
            WHERE job_id IS NULL
              AND ((participant_one_id = $1 AND participant_two_id = $2)
                OR (participant_one_id = $2 AND participant_two_id = $1))
            "#,
            CHAT_COLUMNS
        );

        if let Some(chat) = sqlx::query_as::<_, Chat>(&find)
            .bind(user_one_id)
            .bind(user_two_id)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(chat);
        }

        sqlx::query(
            r#"
            INSERT INTO chats (participant_one_id, participant_two_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(user_one_id)
        .bind(user_two_id)
        .execute(&self.pool)
        .await?;

        // Re-read: a concurrent insert for the same pair may have won.
        sqlx::query_as::<_, Chat>(&find)
            .bind(user_one_id)
            .bind(user_two_id)
            .fetch_one(&self.pool)
            .await
    }

    async fn rebind_job_chat(&self, job_id: Uuid, provider_id: Uuid) -> Result<u64, Error> {
        let result = sqlx::query(
            "UPDATE chats SET participant_two_id = $2 WHERE job_id = $1 AND participant_two_id <> $2",
        )
        .bind(job_id)
        .bind(provider_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_chat_by_id(&self, chat_id: Uuid) -> Result<Option<Chat>, Error> {
        sqlx::query_as::<_, Chat>(&format!("SELECT {} FROM chats WHERE id = $1", CHAT_COLUMNS))
            .bind(chat_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn get_chat_by_job(&self, job_id: Uuid) -> Result<Option<Chat>, Error> {
        sqlx::query_as::<_, Chat>(&format!("SELECT {} FROM chats WHERE job_id = $1", CHAT_COLUMNS))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn get_user_chats(&self, user_id: Uuid) -> Result<Vec<Chat>, Error> {
        sqlx::query_as::<_, Chat>(&format!(
            r#"
            SELECT {} FROM chats
            WHERE participant_one_id = $1 OR participant_two_id = $1
            ORDER BY last_message_at DESC NULLS LAST, created_at DESC
            "#,
            CHAT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn insert_message(
        &self,
        chat_id: Uuid,
        sender_id: Uuid,
        body: String,
    ) -> Result<Message, Error> {
        sqlx::query_as::<_, Message>(&format!(
            r#"
            WITH inserted AS (
                INSERT INTO messages (chat_id, sender_id, body)
                VALUES ($1, $2, $3)
                RETURNING {cols}
            ), touched AS (
                UPDATE chats SET last_message_at = NOW() WHERE id = $1
            )
            SELECT {cols} FROM inserted
            "#,
            cols = MESSAGE_COLUMNS
        ))
        .bind(chat_id)
        .bind(sender_id)
        .bind(body)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_chat_messages(&self, chat_id: Uuid) -> Result<Vec<Message>, Error> {
        sqlx::query_as::<_, Message>(&format!(
            r#"
            SELECT {} FROM messages
            WHERE chat_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
            MESSAGE_COLUMNS
        ))
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn mark_chat_read(&self, chat_id: Uuid, reader_id: Uuid) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET read_at = NOW()
            WHERE chat_id = $1 AND sender_id <> $2 AND read_at IS NULL
            "#,
        )
        .bind(chat_id)
        .bind(reader_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_unread(&self, user_id: Uuid) -> Result<i64, Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM messages m
            JOIN chats c ON c.id = m.chat_id
            WHERE (c.participant_one_id = $1 OR c.participant_two_id = $1)
              AND m.sender_id <> $1
              AND m.read_at IS NULL
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
    }
}
