pub mod config;
pub mod models;
pub mod recorder;
pub mod redirect;
pub mod rewrite;
pub mod storage;
pub mod token;
