use thiserror::Error;

/// Errors raised while registering or resolving job variants.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No job variant is registered under this id.
    #[error("Unknown job id: {id}")]
    NotFound { id: String },

    /// A second factory was registered under an existing id.
    #[error("Job id already registered: {id}")]
    Duplicate { id: String },

    #[error("Invalid job id: {0:?}")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
