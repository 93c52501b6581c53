use subshop_messaging_core::ProcessingError;
use thiserror::Error;

/// Failure reported by a persistence collaborator.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("concurrent modification: {0}")]
    Conflict(String),

    /// Connectivity, timeouts, pool exhaustion.
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        RepositoryError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Not-found and validation failures cannot be fixed by retrying.
    pub fn is_permanent(&self) -> bool {
        match self {
            RepositoryError::NotFound { .. } | RepositoryError::Validation(_) => true,
            RepositoryError::Conflict(_) | RepositoryError::Unavailable(_) => false,
        }
    }
}

impl From<RepositoryError> for ProcessingError {
    fn from(err: RepositoryError) -> Self {
        if err.is_permanent() {
            ProcessingError::Permanent(err.to_string())
        } else {
            ProcessingError::Transient(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("invalid recipient address: {0}")]
    InvalidRecipient(String),

    #[error("unknown email template: {0}")]
    UnknownTemplate(String),

    #[error("email provider unavailable: {0}")]
    Unavailable(String),
}

impl From<EmailError> for ProcessingError {
    fn from(err: EmailError) -> Self {
        match err {
            EmailError::InvalidRecipient(_) | EmailError::UnknownTemplate(_) => {
                ProcessingError::Permanent(err.to_string())
            }
            EmailError::Unavailable(_) => ProcessingError::Transient(err.to_string()),
        }
    }
}
