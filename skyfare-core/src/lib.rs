pub mod booking;
pub mod collaborators;
pub mod money;
pub mod payment;
pub mod repository;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("Payment provider rejected the request: {0}")]
    ProviderRejected(String),
    #[error("Webhook signature rejected: {0}")]
    SignatureRejected(String),
    #[error("Malformed provider event: {0}")]
    MalformedEvent(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
