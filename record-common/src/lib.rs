pub mod announcements;
pub mod config;
pub mod database;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod store;
pub mod types;

// Shared fixtures for the database tests of every crate in the workspace.
pub mod test_utils;
