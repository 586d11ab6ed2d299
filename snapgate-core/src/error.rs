use thiserror::Error;

use crate::ledger::ChangeRecord;

#[derive(Error, Debug)]
pub enum SnapgateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No such key: {key}")]
    NotFound { key: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<SnapgateError>,
    },

    /// A difference was found but its artifacts could not be stored.
    #[error("change for {} not recorded: {source}", change.key)]
    ChangeNotRecorded {
        change: Box<ChangeRecord>,
        #[source]
        source: Box<SnapgateError>,
    },

    /// The ledger upsert inside the critical section failed.
    #[error("can't add changes for approval of {}: {source}", change.key)]
    Sync {
        change: Box<ChangeRecord>,
        #[source]
        source: Box<SnapgateError>,
    },
}

impl SnapgateError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Wrap this error with a short description of the failed step.
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// True when the root cause is a missing blob-store key.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Context { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// The change a failed comparison would have recorded, if one was assembled.
    pub fn change(&self) -> Option<&ChangeRecord> {
        match self {
            Self::ChangeNotRecorded { change, .. } | Self::Sync { change, .. } => Some(change),
            Self::Context { source, .. } => source.change(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for SnapgateError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<image::ImageError> for SnapgateError {
    fn from(e: image::ImageError) -> Self {
        Self::Image(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SnapgateError>;
