pub mod account;
pub mod admin;
pub mod chat;
pub mod jobs;
pub mod ors;
pub mod providers;
pub mod realtime;
