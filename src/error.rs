//! Crate-wide error and result types.

use std::io;
use thiserror::Error;

/// type alias for all operations in this crate that could fail with an [`AggError`]
pub type Result<T> = std::result::Result<T, AggError>;

/// Error variants used by the aggregation server and its clients.
/// It wraps any lower level errors from third party crates
#[derive(Error)]
pub enum AggError {
    /// variant for errors caused by std::io
    #[error("IO error")]
    Io {
        /// source of the IO Error
        #[from]
        source: io::Error,
    },

    /// variant for errors caused during type serialization/deserialization
    #[error("serialization/deserialization error")]
    Serialization(#[from] serde_json::Error),

    /// a record was missing its `id` field or carried an empty one
    #[error("invalid record: {}", .0)]
    InvalidRecord(String),

    /// the atomic replace of the cache document failed; pending writes are retained
    #[error("file sync failed")]
    FileSync {
        /// the underlying IO failure
        source: io::Error,
    },

    /// variant for errors when parsing strings to some other type
    #[error("{}", .0)]
    Parsing(String),

    /// the listening socket could not be bound or the accept loop died
    #[error("listener failed: {}", .0)]
    Listener(String),

    /// catch-all variant for reporting server-sent error messages to clients
    #[error("{}", .0)]
    Server(String),
}

/// a custom Debug implementation that will write the entire error chain
impl std::fmt::Debug for AggError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// writes the entire error chain of the given error `e`, to the formatter.
fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by: {}", cause)?;
        current = cause.source();
    }
    Ok(())
}
