pub mod config;
pub mod error;
pub mod notifier;
pub mod render;
pub mod worker;
