//! Error types for the playlist core

use thiserror::Error;

/// Playlist core errors
///
/// The public handle API never surfaces these: operations through dead
/// handles or out-of-range indices degrade to neutral values. Errors exist
/// for the fallible internals (state persistence), where callers log and
/// carry on.
#[derive(Debug, Error)]
pub enum PlaylistError {
    /// The core has not been initialized (no data directory yet)
    #[error("Playlist core is not initialized")]
    NotInitialized,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for playlist operations
pub type Result<T> = std::result::Result<T, PlaylistError>;
