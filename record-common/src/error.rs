use thiserror::Error;

/// Enumeration of errors for operations against the record database.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError {
        command: &'static str,
        error: sqlx::Error,
    },
    #[error("migration failed with: {error}")]
    MigrationError { error: sqlx::migrate::MigrateError },
    #[error("session {0} does not exist")]
    MissingSession(crate::types::SessionId),
    #[error("{0} is not a valid SessionType")]
    ParseSessionTypeError(String),
    #[error("{0} is not a valid AnnouncementKind")]
    ParseAnnouncementKindError(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Build a `map_err` closure that tags a sqlx error with the failing command.
pub(crate) fn query_error(command: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |error| StoreError::QueryError { command, error }
}
