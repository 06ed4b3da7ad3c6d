use envconfig::Envconfig;
use record_common::config::{EnvMsDuration, NonEmptyString};

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(default = "sqlite://lap_records.sqlite?mode=rwc")]
    pub database_url: String,

    pub discord_webhook_url: NonEmptyString,

    #[envconfig(default = "record-worker")]
    pub worker_name: NonEmptyString,

    #[envconfig(default = "5000")]
    pub poll_interval: EnvMsDuration,

    #[envconfig(default = "10")]
    pub batch_size: u32,

    #[envconfig(default = "5000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(default = "4")]
    pub max_db_connections: u32,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
