pub mod client;
pub mod feed;
pub mod filter;
pub mod hub;
pub mod policy;
pub mod protocol;
