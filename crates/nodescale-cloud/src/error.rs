//! Error types for cloud provider calls.

pub type CloudResult<T> = Result<T, CloudProviderError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CloudProviderError {
    #[error("not implemented by this cloud provider")]
    NotImplemented,

    #[error("node group not found: {0}")]
    NodeGroupNotFound(String),

    /// Worth retrying on a later cycle.
    #[error("transient cloud provider error: {0}")]
    Transient(String),

    #[error("cloud provider error: {0}")]
    Permanent(String),
}

impl CloudProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudProviderError::Transient(_))
    }
}
