//! Error types for the bakelite engine.
//!
//! Two failure domains exist, both terminal: build-time failures abort the
//! build with no partial image recorded, and run-time failures surface as the
//! container process's exit code. No retries happen at this layer.

use thiserror::Error;

/// Result alias used throughout the engine.
pub type BakeliteResult<T> = Result<T, BakeliteError>;

/// Engine-wide error type.
#[derive(Debug, Error)]
pub enum BakeliteError {
    /// Invalid engine or recipe configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Lock artifact missing, unreadable, or inconsistent with the
    /// declaration. Frozen installs fail here instead of resolving a new
    /// dependency set.
    #[error("lock artifact error: {0}")]
    Lock(String),

    /// Base image resolution or image store failure.
    #[error("image error: {0}")]
    Image(String),

    /// Network fetch or checksum verification failure.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Filesystem layout, layer, or blob store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// SQLite persistence failure.
    #[error("database error: {0}")]
    Database(String),

    /// Container process could not be spawned.
    #[error("launch error: {0}")]
    Launch(String),

    /// Referenced image or container does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not valid for the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Invariant violation inside the engine.
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
