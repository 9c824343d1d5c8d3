use thiserror::Error;

use crate::services::client::errors::ClientError;
use crate::services::client::types::RepoStatus;
use crate::services::plc::PlcError;

/// Every failure a migration can surface, classified so callers can decide
/// whether to fix input, retry, or stop.
#[derive(Debug, Clone, Error)]
pub enum MigrationError {
    #[error("Validation error: {field} - {message}")]
    InputValidation { field: String, message: String },

    #[error("Remote server unavailable: {message}")]
    RemoteUnavailable { message: String },

    /// The remote answered and said no. The message is the server's own.
    #[error("{message}")]
    RemoteRejected { operation: String, message: String },

    #[error("Account state conflict: {message}")]
    StateConflict {
        status: Option<RepoStatus>,
        message: String,
    },

    #[error("{remaining} blobs were still missing after {passes} transfer passes")]
    PartialFailure { remaining: usize, passes: u32 },

    #[error("Fatal: {message}")]
    Fatal { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Storage operation failed: {operation} - {reason}")]
    OperationFailed { operation: String, reason: String },

    #[error("Stored record under '{key}' is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Coarse classification of [`MigrationError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InputValidation,
    RemoteUnavailable,
    RemoteRejected,
    StateConflict,
    PartialFailure,
    Fatal,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

pub type MigrationResult<T> = Result<T, MigrationError>;

impl MigrationError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        MigrationError::InputValidation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        MigrationError::Fatal {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::InputValidation { .. } => ErrorKind::InputValidation,
            MigrationError::RemoteUnavailable { .. } => ErrorKind::RemoteUnavailable,
            MigrationError::RemoteRejected { .. } => ErrorKind::RemoteRejected,
            MigrationError::StateConflict { .. } => ErrorKind::StateConflict,
            MigrationError::PartialFailure { .. } => ErrorKind::PartialFailure,
            MigrationError::Fatal { .. } => ErrorKind::Fatal,
            MigrationError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether re-invoking the failed step unchanged has a reasonable chance
    /// of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrationError::RemoteUnavailable { .. } => true,
            MigrationError::PartialFailure { .. } => true,
            MigrationError::Storage(StorageError::OperationFailed { .. }) => true,
            MigrationError::StateConflict { status, .. } => {
                !matches!(status, Some(RepoStatus::Takendown | RepoStatus::Suspended))
            }
            _ => false,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            MigrationError::InputValidation { .. } => ErrorSeverity::Low,
            MigrationError::RemoteUnavailable { .. } | MigrationError::PartialFailure { .. } => {
                ErrorSeverity::Medium
            }
            MigrationError::RemoteRejected { .. }
            | MigrationError::StateConflict { .. }
            | MigrationError::Storage(_) => ErrorSeverity::High,
            MigrationError::Fatal { .. } => ErrorSeverity::Critical,
        }
    }

    /// Fatal errors leave both accounts in a state only a human should touch.
    pub fn needs_manual_recovery(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }
}

impl From<ClientError> for MigrationError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::NetworkError { message } => MigrationError::RemoteUnavailable { message },
            ClientError::Timeout { operation } => MigrationError::RemoteUnavailable {
                message: format!("{} timed out", operation),
            },
            ClientError::PdsOperationFailed {
                operation, message, ..
            } => MigrationError::RemoteRejected { operation, message },
            ClientError::AuthenticationFailed { message } => MigrationError::RemoteRejected {
                operation: "authentication".to_string(),
                message,
            },
            ClientError::SessionExpired => MigrationError::RemoteRejected {
                operation: "authentication".to_string(),
                message: "Session expired".to_string(),
            },
            other @ (ClientError::InvalidResponse { .. }
            | ClientError::SerializationError { .. }) => MigrationError::RemoteRejected {
                operation: "response".to_string(),
                message: other.to_string(),
            },
        }
    }
}

impl From<PlcError> for MigrationError {
    fn from(error: PlcError) -> Self {
        match error {
            PlcError::InvalidKey(message) => MigrationError::validation("rotation_key", message),
            other => MigrationError::fatal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_failures_are_retryable() {
        let err: MigrationError = ClientError::NetworkError {
            message: "connection reset".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::RemoteUnavailable);
        assert!(err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn rejection_keeps_server_message_verbatim() {
        let err: MigrationError = ClientError::PdsOperationFailed {
            operation: "createAccount".to_string(),
            status: 400,
            error_code: Some("InvalidInviteCode".to_string()),
            message: "Provided invite code not available".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::RemoteRejected);
        assert_eq!(err.to_string(), "Provided invite code not available");
        assert!(!err.is_retryable());
    }

    #[test]
    fn takedown_conflicts_are_not_retryable() {
        let takendown = MigrationError::StateConflict {
            status: Some(RepoStatus::Takendown),
            message: "taken down".to_string(),
        };
        assert!(!takendown.is_retryable());

        let deactivated = MigrationError::StateConflict {
            status: Some(RepoStatus::Deactivated),
            message: "deactivated".to_string(),
        };
        assert!(deactivated.is_retryable());
    }

    #[test]
    fn fatal_needs_manual_recovery() {
        let err = MigrationError::fatal("source deactivation failed");
        assert!(err.needs_manual_recovery());
        assert!(!MigrationError::validation("email", "missing").needs_manual_recovery());
    }
}
