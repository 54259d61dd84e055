pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod gateway;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod services;
pub mod workers;
