//! Bootstrap for embedding the vodcast core in a service
//!
//! This module handles:
//! - Configuration loading
//! - Database initialization and migrations
//! - Service wiring and background jobs

pub mod config;
pub mod database;
pub mod services;

pub use config::load_config;
pub use database::{init_database, run_migrations};
pub use services::{build_services, init_services, start_jobs, BackgroundJobs, Services};
