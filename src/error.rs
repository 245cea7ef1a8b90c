//! Posting error types

use thiserror::Error;

/// Errors raised while building, posting or indexing articles
#[derive(Error, Debug)]
pub enum PostError {
    /// IO error during file or network operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error during secure connection setup
    #[error("TLS error: {0}")]
    Tls(String),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Newsgroup alias missing from the `[aliases]` table
    #[error("Group alias \"{0}\" does not exist")]
    UnknownAlias(String),

    /// Input produced no postable articles
    #[error("No valid articles to post")]
    NothingToPost,

    /// Every connection was closed permanently while work remained
    #[error("All connections failed permanently")]
    AllConnectionsFailed,

    /// yEnc line length outside the permitted range
    #[error("Invalid line length: {0} (must be 1-997)")]
    InvalidLineLength(usize),

    /// Malformed yEnc data
    #[error("yEnc decode error: {0}")]
    Decode(String),

    /// NZB generation failure
    #[error("NZB error: {0}")]
    Nzb(String),
}

/// Result type alias using PostError
pub type Result<T> = std::result::Result<T, PostError>;
