use thiserror::Error;

/// Main error type for the Artfolio library
#[derive(Error, Debug)]
pub enum ArtfolioError {
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while turning a version history into a video
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Item not found: {item_id}")]
    NotFound { item_id: u64 },

    #[error("No versions found for item {item_id}")]
    NoVersions { item_id: u64 },

    #[error("No files available to make timelapse for item {item_id}")]
    NoFilesAvailable { item_id: u64 },

    /// Raised by the manifest builder when handed nothing to concatenate.
    /// Upstream filtering should make this unreachable.
    #[error("Manifest input is empty")]
    EmptyInput,

    /// A path the manifest format cannot express, such as one with a newline
    #[error("Path cannot be listed in a manifest: {path}")]
    UnlistablePath { path: String },

    #[error("Encoder failed (exit code {}): {stderr}", display_exit_code(.exit_code))]
    Encode {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Encoder unavailable: {program} - {reason}")]
    EncoderUnavailable { program: String, reason: String },
}

/// Version ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Item not found: {item_id}")]
    ItemNotFound { item_id: u64 },

    #[error("Group not found: {group_id}")]
    GroupNotFound { group_id: u64 },

    #[error("Group name already exists: {name}")]
    DuplicateGroup { name: String },

    #[error("Ledger data is inconsistent: {details}")]
    Corrupt { details: String },
}

/// Media store errors
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Storage path escapes the media root: {path}")]
    InvalidPath { path: String },

    #[error("Invalid upload filename: {name:?}")]
    InvalidFilename { name: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path} - {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Convenience type alias for Results using ArtfolioError
pub type Result<T> = std::result::Result<T, ArtfolioError>;

/// Coarse classification used by request-facing callers to pick a status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The addressed item does not exist (404)
    NotFound,
    /// The request cannot be served with the data on hand (400)
    BadRequest,
    /// Tool failure or broken internal invariant (500)
    Internal,
}

impl ErrorClass {
    /// HTTP-equivalent status code
    pub fn status_code(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::BadRequest => 400,
            Self::Internal => 500,
        }
    }
}

fn display_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

impl ArtfolioError {
    /// Build an encoder failure from raw process output
    pub fn encode(exit_code: Option<i32>, stderr: &[u8]) -> Self {
        RenderError::Encode {
            exit_code,
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
        .into()
    }

    /// Classify the error for the request layer
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Render(RenderError::NotFound { .. })
            | Self::Ledger(LedgerError::ItemNotFound { .. })
            | Self::Ledger(LedgerError::GroupNotFound { .. }) => ErrorClass::NotFound,
            Self::Render(RenderError::NoVersions { .. })
            | Self::Render(RenderError::NoFilesAvailable { .. })
            | Self::Ledger(LedgerError::DuplicateGroup { .. })
            | Self::Media(_) => ErrorClass::BadRequest,
            _ => ErrorClass::Internal,
        }
    }

    /// Check if the caller may reasonably retry.
    ///
    /// The render core never retries on its own; only plain IO failures are
    /// flagged as possibly transient.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    /// Stderr captured from a failed encoder run, if any
    pub fn encoder_stderr(&self) -> Option<&str> {
        match self {
            Self::Render(RenderError::Encode { stderr, .. }) => Some(stderr),
            _ => None,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Render(RenderError::NotFound { .. })
            | Self::Ledger(LedgerError::ItemNotFound { .. }) => "Item not found".to_string(),
            Self::Render(RenderError::NoVersions { .. }) => "No versions found for item".to_string(),
            Self::Render(RenderError::NoFilesAvailable { .. }) => {
                "No files available to make timelapse".to_string()
            }
            Self::Render(RenderError::Encode { stderr, .. }) => {
                format!("Video encoding failed: {}", stderr)
            }
            Self::Render(RenderError::EncoderUnavailable { program, .. }) => {
                format!("Encoder '{}' could not be started. Is it installed and on PATH?", program)
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}
