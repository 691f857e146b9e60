pub mod auth;
pub mod collectors;
pub mod config;
pub mod formatter;
pub mod models;
pub mod monitor;
pub mod store;
