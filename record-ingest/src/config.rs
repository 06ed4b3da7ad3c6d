use envconfig::Envconfig;
use record_common::config::NonEmptyString;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(default = "sqlite://lap_records.sqlite?mode=rwc")]
    pub database_url: String,

    /// Directory the server writes its result files into.
    #[envconfig(default = "results")]
    pub results_dir: String,

    #[envconfig(default = "json")]
    pub result_extension: NonEmptyString,

    #[envconfig(default = "1")]
    pub max_db_connections: u32,
}
