//! tasksync: local task store kept in step with remote task services.

pub mod cli;
pub mod config;
pub mod error;
pub mod reminders;
pub mod remote;
pub mod store;
pub mod tasks;
pub mod worker;
