use thiserror::Error;

/// Failures from the Azure management plane, split so callers can tell
/// retryable conditions from terminal ones even though nothing retries today.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("transient provider failure ({status}): {message}")]
    Transient { status: u16, message: String },

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider rejected request ({status}): {message}")]
    Unknown { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, ProviderError>;
