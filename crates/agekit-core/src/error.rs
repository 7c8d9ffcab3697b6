use thiserror::Error;

pub type AgekitResult<T> = Result<T, AgekitError>;

#[derive(Debug, Error)]
pub enum AgekitError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
