pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod hook;
pub mod mapper;
pub mod strategy;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod testing;
