pub mod api;
pub mod broker;
pub mod clients;
pub mod config;
pub mod error;
pub mod models;
pub mod realtime;
pub mod router;
pub mod telemetry;
pub mod templates;
pub mod utils;
pub mod workers;
