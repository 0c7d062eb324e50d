use thiserror::Error;

pub type SealzipResult<T> = Result<T, SealzipError>;

#[derive(Debug, Error)]
pub enum SealzipError {
    #[error("config error: {0}")]
    Config(String),
}
