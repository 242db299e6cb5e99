// db/cache.rs
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Cache TTL constants (in seconds)
pub const UNREAD_CACHE_TTL: usize = 300;       // 5 minutes
pub const WORKER_LISTING_TTL: usize = 60;      // 1 minute

pub const WORKER_LISTING_KEY: &str = "workers:listing";

pub fn unread_key(user_id: Uuid) -> String {
    format!("unread_total:{}", user_id)
}

pub struct CacheHelper;

impl CacheHelper {
    /// Generic get from cache. A miss or an undecodable payload both read as `None`.
    pub async fn get<T: DeserializeOwned>(
        redis: &Arc<ConnectionManager>,
        key: &str,
    ) -> Result<Option<T>, redis::RedisError> {
        let mut conn = ConnectionManager::clone(redis);
        let cached: Option<String> = conn.get(key).await?;

        match cached {
            Some(data) => match serde_json::from_str::<T>(&data) {
                Ok(value) => {
                    tracing::debug!("Cache HIT: {}", key);
                    Ok(Some(value))
                }
                Err(_) => {
                    tracing::warn!("Cache deserialization failed for: {}", key);
                    Ok(None)
                }
            },
            None => {
                tracing::debug!("Cache MISS: {}", key);
                Ok(None)
            }
        }
    }

    /// Generic set to cache with TTL
    pub async fn set<T: Serialize>(
        redis: &Arc<ConnectionManager>,
        key: &str,
        value: &T,
        ttl_seconds: usize,
    ) -> Result<(), redis::RedisError> {
        if let Ok(json) = serde_json::to_string(value) {
            let mut conn = ConnectionManager::clone(redis);
            let _: () = conn.set_ex(key, json, ttl_seconds).await?;
            tracing::debug!("Cache SET: {} (TTL: {}s)", key, ttl_seconds);
        }
        Ok(())
    }

    pub async fn delete(
        redis: &Arc<ConnectionManager>,
        key: &str,
    ) -> Result<(), redis::RedisError> {
        let mut conn = ConnectionManager::clone(redis);
        let _: () = conn.del(key).await?;
        tracing::debug!("Cache DELETE: {}", key);
        Ok(())
    }

    pub async fn invalidate_unread_total(
        redis: &Arc<ConnectionManager>,
        user_id: Uuid,
    ) -> Result<(), redis::RedisError> {
        Self::delete(redis, &unread_key(user_id)).await
    }

    pub async fn health_check(
        redis: &Arc<ConnectionManager>,
    ) -> Result<bool, redis::RedisError> {
        let mut conn = ConnectionManager::clone(redis);
        let response: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(response == "PONG")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unread_key_is_per_user() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(unread_key(a), unread_key(b));
        assert!(unread_key(a).starts_with("unread_total:"));
    }
}
