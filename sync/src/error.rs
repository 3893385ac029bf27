//! Unified error handling for the sync layer.

/// Errors reported by a remote document store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Transaction aborted after {attempts} conflicting attempts")]
    Aborted { attempts: u32 },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_permission(&self) -> bool {
        matches!(self, StoreError::PermissionDenied(_))
    }

    /// Whether the same call may succeed later without any configuration
    /// change.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Aborted { .. })
    }
}

/// Sync engine error type.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Invalid entry: {0}")]
    Validation(#[from] cradle_engine::Error),

    #[error("Remote store error: {0}")]
    Store(#[from] StoreError),

    #[error("Local cache error for '{key}': {reason}")]
    Cache { key: String, reason: String },
}

impl SyncError {
    pub(crate) fn cache(key: &str, reason: impl ToString) -> Self {
        SyncError::Cache {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Message shown with `status=error`.
    ///
    /// Permission problems need the operator to fix configuration, while
    /// transient failures only need a retry, so the two read differently.
    pub fn status_message(&self) -> String {
        match self {
            SyncError::Store(err) if err.is_permission() => format!(
                "Access to the shared document was refused; check the household configuration ({err})"
            ),
            SyncError::Store(err) if err.is_transient() => {
                format!("Changes were not saved; retry later ({err})")
            }
            other => other.to_string(),
        }
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_messages_distinguish_permission_from_transient() {
        let denied = SyncError::from(StoreError::PermissionDenied("rules".into()));
        let offline = SyncError::from(StoreError::Unavailable("offline".into()));

        assert!(denied.status_message().contains("configuration"));
        assert!(offline.status_message().contains("retry later"));
        assert!(!offline.status_message().contains("configuration"));
    }

    #[test]
    fn validation_errors_convert() {
        let err: SyncError = cradle_engine::Error::MissingId.into();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(err.status_message(), "Invalid entry: record id must not be empty");
    }

    #[test]
    fn aborted_is_transient() {
        assert!(StoreError::Aborted { attempts: 5 }.is_transient());
        assert!(!StoreError::Serialization("bad".into()).is_transient());
    }
}
