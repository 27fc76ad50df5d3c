//! Error types for dvot
//!
//! A single error enum covers the cluster API, the host device layer and
//! caller validation. Every variant maps onto a [`FaultClass`] which decides
//! whether the fault is retried and how it is reported.

use thiserror::Error;

/// iscsiadm exit status for "session already exists"
pub const ISCSI_ERR_SESS_EXISTS: i32 = 15;

/// Unified error type for the tool
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Requested size {requested}GiB must be greater than current size {current}GiB for {path}")]
    SizeNotIncreased {
        path: String,
        current: u64,
        requested: u64,
    },

    #[error("Operation {operation} is not supported on {kind} {path}")]
    WrongResourceKind {
        operation: String,
        kind: String,
        path: String,
    },

    #[error("Malformed resource path: {0}")]
    MalformedPath(String),

    // =========================================================================
    // Cluster API Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    #[error("Resource conflict: {kind}/{name}")]
    Conflict { kind: String, name: String },

    #[error("Cluster API error on {path}: HTTP {status}: {message}")]
    ClusterApi {
        path: String,
        status: u16,
        message: String,
    },

    #[error("Cluster authentication failed: {0}")]
    Authentication(String),

    #[error("Cluster connection error: {0}")]
    Http(#[from] reqwest::Error),

    // =========================================================================
    // Host Device Layer Errors
    // =========================================================================
    #[error("Command failed (exit status {status:?}): {command}: {stderr}")]
    Command {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Could not log into target {iqn} via portal {portal}: {reason}")]
    LoginFailed {
        iqn: String,
        portal: String,
        reason: String,
    },

    #[error("Failed to format {device} as {fstype}: {reason}")]
    FormatFailed {
        device: String,
        fstype: String,
        reason: String,
    },

    #[error("Polling ended before {subject} became available after {attempts} attempts")]
    PollTimeout { subject: String, attempts: u32 },

    #[error("Device layer inconsistency: {0}")]
    Consistency(String),

    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Task failed: {0}")]
    TaskFailed(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classification of a fault, deciding retry and reporting behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Bad caller input; reported immediately, never retried
    Validation,
    /// The resolver found nothing
    NotFound,
    /// Infrastructure hiccup; retried with a bounded budget
    Transient,
    /// Aborts the current attach or rollback sequence
    Fatal,
}

impl Error {
    /// Build a not-found error for a resource kind
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Determine the fault class of this error
    pub fn class(&self) -> FaultClass {
        match self {
            Error::InvalidArgument(_)
            | Error::SizeNotIncreased { .. }
            | Error::WrongResourceKind { .. }
            | Error::MalformedPath(_)
            | Error::Configuration(_) => FaultClass::Validation,

            Error::NotFound { .. } | Error::DeviceNotFound { .. } => FaultClass::NotFound,

            Error::Command { .. } | Error::Http(_) | Error::Io(_) => FaultClass::Transient,
            Error::ClusterApi { status, .. } if *status >= 500 => FaultClass::Transient,

            // Retry budgets exhausted, or nothing left to retry
            Error::LoginFailed { .. }
            | Error::FormatFailed { .. }
            | Error::PollTimeout { .. }
            | Error::Consistency(_) => FaultClass::Fatal,

            _ => FaultClass::Fatal,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), FaultClass::Transient)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Command { .. } | Error::Http(_) | Error::ClusterApi { .. }
        ) && self.is_retryable()
    }

    /// Check if this is an iscsiadm "session already exists" failure
    pub fn is_session_exists(&self) -> bool {
        matches!(
            self,
            Error::Command {
                status: Some(ISCSI_ERR_SESS_EXISTS),
                ..
            }
        )
    }

    /// Check if this is a cluster-side conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Check if this is a not-found fault
    pub fn is_not_found(&self) -> bool {
        matches!(self.class(), FaultClass::NotFound)
    }

    /// Process exit code to report for this error
    pub fn exit_code(&self) -> i32 {
        crate::FAILURE
    }
}

/// Result type alias for dvot
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_classes() {
        let err = Error::InvalidArgument("Either --name or --id MUST be provided".into());
        assert_eq!(err.class(), FaultClass::Validation);
        assert!(!err.is_retryable());

        let err = Error::not_found("Volume", "bogus");
        assert_eq!(err.class(), FaultClass::NotFound);
        assert!(err.is_not_found());

        let err = Error::PollTimeout {
            subject: "/app_instances/a/storage_instances/s".into(),
            attempts: 11,
        };
        assert_eq!(err.class(), FaultClass::Fatal);
    }

    #[test]
    fn test_command_errors() {
        let exists = Error::Command {
            command: "iscsiadm -m node --login".into(),
            status: Some(ISCSI_ERR_SESS_EXISTS),
            stderr: "session exists".into(),
        };
        assert!(exists.is_session_exists());
        assert!(exists.is_transient());

        let other = Error::Command {
            command: "iscsiadm -m node --login".into(),
            status: Some(8),
            stderr: "connection timed out".into(),
        };
        assert!(!other.is_session_exists());
        assert!(other.is_retryable());
    }

    #[test]
    fn test_cluster_api_errors() {
        let server = Error::ClusterApi {
            path: "/app_instances".into(),
            status: 503,
            message: "unavailable".into(),
        };
        assert!(server.is_transient());

        let client = Error::ClusterApi {
            path: "/app_instances".into(),
            status: 400,
            message: "bad request".into(),
        };
        assert!(!client.is_retryable());
        assert_eq!(client.exit_code(), 1);
    }
}
