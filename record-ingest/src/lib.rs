pub mod config;
pub mod detector;
pub mod ingest;
pub mod parser;
