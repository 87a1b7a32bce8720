pub mod api;
pub mod artist;
pub mod config;
