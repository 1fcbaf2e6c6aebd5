//! Error taxonomy shared by the key, event, filter and publish modules.

use thiserror::Error;

/// Errors surfaced by the client core.
///
/// Per-relay transport problems are deliberately absent: those are reported as
/// [`crate::publish::RelayOutcome`] values so one bad relay cannot abort a
/// fan-out.
#[derive(Debug, Error)]
pub enum Error {
    /// Key file integrity check failed, almost always a wrong password.
    #[error("authentication failed: wrong password or tampered key file")]
    Authentication,

    /// Subscription filter field outside the recognized set.
    #[error("unsupported filter field: {0}")]
    UnsupportedFilter(String),

    /// Recognized filter field with a value of the wrong shape.
    #[error("invalid value for filter field {field}: {reason}")]
    InvalidFilterValue { field: String, reason: String },

    /// Referenced file or resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Publish attempted without any relays.
    #[error("no relays to publish to")]
    EmptyRelaySet,

    /// Refused to persist a key under an empty password.
    #[error("password must not be empty")]
    EmptyPassword,

    #[error("invalid secret key: {0}")]
    InvalidKey(String),

    /// Key file decrypted to something that is not a Fernet token or a scalar.
    #[error("corrupt key file: {0}")]
    CorruptKeyFile(String),

    /// System clock reads earlier than the Unix epoch.
    #[error("system clock is before 1970: {0}")]
    Clock(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    /// Operating system random source unavailable.
    #[error("random source unavailable: {0}")]
    Random(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
