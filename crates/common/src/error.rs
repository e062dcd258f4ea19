//! Error types for brewlog.

use thiserror::Error;

/// Synchronization result type.
pub type SyncResult<T> = Result<T, SyncError>;

/// Unified error type for the sync engine and its collaborators.
#[derive(Debug, Error)]
pub enum SyncError {
    // === Domain Errors ===
    /// The referenced entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Input rejected by draft validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A profile tried to like its own activity.
    #[error("Cannot like own activity: {0}")]
    SelfLike(String),

    /// A follow request for this target is already pending.
    #[error("Follow request already pending: {0}")]
    DuplicateRequest(String),

    /// The follow operation is not valid from the current state.
    #[error("Illegal follow transition: {0}")]
    IllegalTransition(String),

    /// The targeted entity is no longer present locally.
    #[error("Stale entity: {0}")]
    StaleEntity(String),

    /// The store holds contradictory state for this entity.
    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    // === Infrastructure Errors ===
    /// The store could not be reached.
    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected failure with no more specific variant.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Returns whether the failed operation may be retried as-is.
    ///
    /// Only remote unavailability is transient; every domain error is a
    /// definitive answer and retrying would repeat it.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RemoteUnavailable(_))
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for SyncError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_remote_unavailability_is_transient() {
        assert!(SyncError::RemoteUnavailable("connection reset".to_string()).is_transient());

        let definitive = [
            SyncError::NotFound("activity".to_string()),
            SyncError::Validation("empty".to_string()),
            SyncError::SelfLike("a1".to_string()),
            SyncError::DuplicateRequest("p1".to_string()),
            SyncError::IllegalTransition("already following".to_string()),
            SyncError::StaleEntity("a2".to_string()),
            SyncError::DataIntegrity("edge and pending request".to_string()),
            SyncError::Config("missing field".to_string()),
            SyncError::Internal("panic".to_string()),
        ];
        for err in definitive {
            assert!(!err.is_transient(), "{err} must not be retried");
        }
    }

    #[test]
    fn test_anyhow_converts_to_internal() {
        let err: SyncError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, SyncError::Internal(_)));
    }
}
