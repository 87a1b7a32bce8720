pub mod error;
pub mod handler_utils;
pub mod painting;
pub mod server;
