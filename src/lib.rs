// Savvy Bridge - Library root

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod history;
pub mod http_client;
