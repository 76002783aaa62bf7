//! Shared infrastructure for the ReminderRelay services: configuration,
//! errors, domain and wire types, store/queue connection handles.

pub mod config;
pub mod db;
pub mod error;
pub mod queue;
pub mod redis_pool;
pub mod types;
