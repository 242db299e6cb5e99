pub mod cache;
pub mod chatdb;
pub mod db;
pub mod labourdb;
pub mod userdb;
pub mod workerdb;
