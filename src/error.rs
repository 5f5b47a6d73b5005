//! Error types for the o365-manager crate.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.
//! Errors are `Clone` so a single sign-in failure can be handed to every queued caller.

use thiserror::Error;

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Result type for directory client calls.
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Errors surfaced by the directory service manager.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ManagerError {
    #[error("Authentication required: sign in before calling the directory service")]
    AuthenticationRequired,

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Directory service unreachable: {0}")]
    RemoteTransport(String),

    #[error("Directory service request timed out: {0}")]
    RemoteTimeout(String),

    #[error("Directory service rejected the request (HTTP {status}{}): {message}", code_suffix(.code))]
    RemoteRejected {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Operation stopped after {applied} change(s) were applied: {source}")]
    PartiallyApplied {
        applied: usize,
        #[source]
        source: Box<ManagerError>,
    },
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref()
        .map(|c| format!(", {}", c))
        .unwrap_or_default()
}

/// Errors reported by a [`DirectoryServiceClient`](crate::directory::DirectoryServiceClient).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DirectoryError {
    #[error("Network error: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Unauthorized (401): Token may be expired")]
    Unauthorized,

    #[error("Forbidden (403): {0}")]
    Forbidden(String),

    #[error("Resource not found (404): {0}")]
    NotFound(String),

    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Failed to parse API response: {0}")]
    InvalidResponse(String),

    #[error("Sign-in failed: {0}")]
    Login(String),
}

impl DirectoryError {
    /// Classify a reqwest failure, keeping timeouts distinct.
    pub fn from_reqwest(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout(error.to_string())
        } else if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

impl From<DirectoryError> for ManagerError {
    fn from(error: DirectoryError) -> Self {
        match error {
            DirectoryError::Transport(msg) => Self::RemoteTransport(msg),
            DirectoryError::Timeout(msg) => Self::RemoteTimeout(msg),
            DirectoryError::Unauthorized => Self::RemoteRejected {
                status: 401,
                code: None,
                message: "access token is invalid or expired".to_string(),
            },
            DirectoryError::Forbidden(message) => Self::RemoteRejected {
                status: 403,
                code: None,
                message,
            },
            DirectoryError::NotFound(message) => Self::RemoteRejected {
                status: 404,
                code: None,
                message,
            },
            DirectoryError::Rejected {
                status,
                code,
                message,
            } => Self::RemoteRejected {
                status,
                code,
                message,
            },
            DirectoryError::InvalidResponse(msg) => {
                Self::RemoteTransport(format!("invalid response: {}", msg))
            }
            DirectoryError::Login(msg) => Self::AuthenticationFailed(msg),
        }
    }
}

impl ManagerError {
    /// Wrap the first failure of a compound operation.
    ///
    /// When no remote write went through the cause is returned unchanged.
    pub fn after_applied(applied: usize, cause: ManagerError) -> Self {
        if applied == 0 {
            cause
        } else {
            Self::PartiallyApplied {
                applied,
                source: Box::new(cause),
            }
        }
    }

    /// The underlying failure, looking through `PartiallyApplied`.
    pub fn root_cause(&self) -> &ManagerError {
        match self {
            Self::PartiallyApplied { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True when the failure happened before anything was sent to the directory service.
    pub fn nothing_applied(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationRequired | Self::Validation(_) | Self::NotFound(_)
        )
    }

    /// True when remote state may have been changed despite the failure.
    pub fn partially_applied(&self) -> bool {
        matches!(self, Self::PartiallyApplied { .. })
    }

    /// True for transport failures, including timeouts.
    pub fn is_transport(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::RemoteTransport(_) | Self::RemoteTimeout(_)
        )
    }

    /// Returns a user-friendly message for display in the UI.
    pub fn user_message(&self) -> &str {
        match self {
            Self::AuthenticationRequired => "Please sign in to Office 365 first.",
            Self::AuthenticationFailed(_) => "Sign-in failed. Please try again.",
            Self::RemoteTransport(_) => "Network error. Check your connection.",
            Self::RemoteTimeout(_) => "The directory service did not respond in time.",
            Self::RemoteRejected { status: 401, .. } => "Session expired. Please sign in again.",
            Self::RemoteRejected { status: 403, .. } => {
                "Insufficient permissions for this operation."
            }
            Self::RemoteRejected { .. } => "The directory service rejected the request.",
            Self::NotFound(_) => "No application is associated with this project.",
            Self::Validation(_) => "Please correct the highlighted values.",
            Self::PartiallyApplied { .. } => {
                "Some changes were applied before an error occurred. Refresh to see the current state."
            }
        }
    }

    /// Returns true if this error means the user has to sign in (again).
    pub fn requires_sign_in(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::AuthenticationRequired | Self::RemoteRejected { status: 401, .. }
        )
    }
}
