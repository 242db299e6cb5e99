use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct PostMessageDto {
    // Length is enforced again after markup is stripped.
    #[validate(length(min = 1, max = 8000, message = "Message cannot be empty"))]
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadTotalDto {
    pub total: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadDto {
    pub updated: u64,
}
