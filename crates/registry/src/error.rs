/// The eight error kinds used across the registry and the gateway/northbound
/// daemons. Handlers translate these into CoAP or HTTP status codes; see
/// `gateway_core::rd` and `northbound`'s response mapping.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found")]
    NotFound,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad input: {0}")]
    BadInput(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Error::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Conflict(db.message().to_string())
            }
            other => Error::Transient(other.to_string()),
        }
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Error::Transient(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
