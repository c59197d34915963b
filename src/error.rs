//! Error types for the mail OCR service.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Registry (database) errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Mailbox and mail transport errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to connect: {reason}")]
    ConnectFailed { name: String, reason: String },

    #[error("Channel {name} disconnected: {reason}")]
    Disconnected { name: String, reason: String },

    #[error("Authentication failed for channel {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Channel {name} command failed: {reason}")]
    CommandFailed { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),
}

/// Attachment extraction errors.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Attachment has no file name")]
    MissingFileName,

    #[error("Failed to write attachment {file_name}: {source}")]
    Io {
        file_name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Secure archive codec errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("No matching document ({extension}) in archive")]
    NoMatchingDocument { extension: String },

    #[error("Wrong password for archive")]
    InvalidPassword,

    #[error("Corrupt or unsupported archive: {0}")]
    Corrupt(String),

    #[error("Archive entry has an unsafe path: {0}")]
    UnsafeEntry(String),

    #[error("Archive IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::InvalidPassword => Self::InvalidPassword,
            zip::result::ZipError::Io(e) => Self::Io(e),
            other => Self::Corrupt(other.to_string()),
        }
    }
}

/// Page rendering and text recognition errors.
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("Failed to render page {page}: {reason}")]
    RenderFailed { page: usize, reason: String },

    #[error("Failed to read document: {0}")]
    InvalidDocument(String),

    #[error("Recognition failed on page {page}: {reason}")]
    EngineFailed { page: usize, reason: String },

    #[error("{tool} timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to build secure envelope: {0}")]
    Envelope(#[from] ArchiveError),

    #[error("Failed to read result file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] ChannelError),
}

/// Stage of the document pipeline that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Extract,
    Decrypt,
    Recognize,
    Store,
    Register,
    Dispatch,
}

impl PipelineStage {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Decrypt => "decrypt",
            Self::Recognize => "recognize",
            Self::Store => "store",
            Self::Register => "register",
            Self::Dispatch => "dispatch",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A submission failed; identifies the stage that aborted it.
#[derive(Debug, thiserror::Error)]
#[error("Document processing failed at {stage} stage: {reason}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub reason: String,
}

impl PipelineError {
    pub fn new(stage: PipelineStage, reason: impl std::fmt::Display) -> Self {
        Self {
            stage,
            reason: reason.to_string(),
        }
    }
}

/// Retrieval-request errors.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Document not found: {reference}")]
    NotFound { reference: String },

    #[error("OCR result missing for {reference}: {locator}")]
    ResultMissing { reference: String, locator: String },

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}
