pub mod geo;
pub mod storage;
pub mod token;
