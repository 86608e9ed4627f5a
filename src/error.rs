use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error taxonomy for the core.
///
/// Capability-unavailable is deliberately *not* a variant here: an adapter
/// that has not wired up an optional fetcher reports
/// [`Capability::Unsupported`](crate::git::types::Capability) instead of
/// failing, so rules that never touch that capability are unaffected.
#[derive(Debug, Error)]
pub enum Error {
    /// A path, comment, or id that the caller asked for does not exist in
    /// the change set or on the backend.
    #[error("not found: {0}")]
    NotFound(String),

    /// A malformed glob pattern. Fails the matcher call that contained it;
    /// no state survives into other calls.
    #[error("invalid glob pattern `{pattern}`")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// The underlying network collaborator failed (timeout, auth, rate
    /// limit). Propagated as-is; retry policy belongs to the collaborator.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }
}
