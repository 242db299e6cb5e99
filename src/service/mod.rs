pub mod account_service;
pub mod background_jobs;
pub mod chat_service;
pub mod error;
pub mod labour_service;
pub mod lifecycle;
pub mod matching_service;
pub mod presence;
