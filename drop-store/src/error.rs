use std::time::Duration;

use thiserror::Error;

/// Result type for drop operations
pub type DropResult<T> = Result<T, DropError>;

/// Errors that can occur while staging, assembling, publishing or expiring objects
#[derive(Error, Debug)]
pub enum DropError {
    #[error("Upload exceeds maximum size ({limit} bytes)")]
    SizeLimitExceeded { limit: u64 },

    #[error("Upload exceeds max file size: declared {declared} bytes (max: {max})")]
    UploadTooLarge { declared: u64, max: u64 },

    #[error("Invalid upload session {token}: {reason}")]
    SessionInvalid { token: String, reason: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Data with id '{id}' does not exist")]
    NotFound { id: String },

    #[error("Timed out after {waited:?} waiting for upload {token} to finish")]
    WaitTimeout { token: String, waited: Duration },

    #[error("Upload failed: {reason}")]
    UploadFailed { reason: String },

    #[error("Failed to write staging file: {source}")]
    SpoolWriteFailed {
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to publish object {id}: {source}")]
    RenameFailed {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl DropError {
    /// Create a session error
    pub fn session_invalid<T: Into<String>, R: Into<String>>(token: T, reason: R) -> Self {
        Self::SessionInvalid {
            token: token.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid request error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(id: S) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create an upload failed error
    pub fn upload_failed<S: Into<String>>(reason: S) -> Self {
        Self::UploadFailed {
            reason: reason.into(),
        }
    }

    /// Wrap an I/O error raised while spooling or concatenating
    pub fn spool(source: std::io::Error) -> Self {
        Self::SpoolWriteFailed { source }
    }

    /// Wrap an I/O error raised while moving an object into place
    pub fn rename<S: Into<String>>(id: S, source: std::io::Error) -> Self {
        Self::RenameFailed {
            id: id.into(),
            source,
        }
    }

    /// Errors the uploader can fix by changing the request
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::SizeLimitExceeded { .. }
                | Self::UploadTooLarge { .. }
                | Self::SessionInvalid { .. }
                | Self::InvalidRequest { .. }
                | Self::NotFound { .. }
        )
    }

    /// Disk or filesystem failures on the server side
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            Self::SpoolWriteFailed { .. } | Self::RenameFailed { .. } | Self::Io { .. }
        )
    }
}
