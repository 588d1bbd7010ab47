//! SQLite persistence for alarms and client state

mod alarm_repository;
mod connection;
mod migrations;
mod state_repository;

pub use alarm_repository::SqliteAlarmStore;
pub use connection::Database;
pub use state_repository::SqliteStateStore;
