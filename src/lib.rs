pub mod api;
pub mod clients;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod telemetry;
pub mod utils;
pub mod worker;
