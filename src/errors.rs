use thiserror::Error;

/// Failures that end a run. Soft failures never become one of these, they are
/// carried as [`crate::system::Gathered::Degraded`] instead.
#[derive(Debug, Error)]
pub enum BootMailError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("delivery error: {0}")]
    Delivery(String),
}

impl BootMailError {
    pub fn kind(&self) -> &'static str {
        match self {
            BootMailError::Configuration(_) => "ConfigurationError",
            BootMailError::Query(_) => "QueryError",
            BootMailError::Delivery(_) => "DeliveryError",
        }
    }

    /// Finds the first `BootMailError` anywhere in the chain of `err`
    pub fn find_in(err: &anyhow::Error) -> Option<&BootMailError> {
        err.chain().find_map(|cause| cause.downcast_ref::<BootMailError>())
    }
}
