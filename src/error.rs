//! Error types for the layer engine.
//!
//! Errors fall into three groups:
//!
//! - **Structural**: the content-address chain cannot be resolved because a
//!   layer database entry or an expected storage directory is absent. These
//!   abort snapshot construction; see [`Error::is_structural`].
//! - **Collaborator**: the docker CLI failed, produced output we could not
//!   parse, or a file read failed.
//! - **Control**: the query was cancelled or a background task died.
//!
//! A query that simply finds nothing is not an error; it returns an empty
//! result.

use std::path::PathBuf;

/// Result alias used by the library modules.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No `cache-id` entry exists for a chain id in the layer database.
    #[error("layer database has no entry for chain {chain_id} (expected {})", path.display())]
    MissingLayer {
        chain_id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A `cache-id` entry exists but holds no storage id.
    #[error("layer database entry for chain {0} is empty")]
    EmptyStorageId(String),

    /// A storage directory that a resolved layer points at is gone.
    #[error("expected directory {} is absent", .0.display())]
    MissingDirectory(PathBuf),

    #[error("invalid digest {0:?}")]
    InvalidDigest(String),

    /// The docker CLI exited unsuccessfully or could not be spawned.
    #[error("'{command}' failed: {message}")]
    Collaborator { command: String, message: String },

    #[error("failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    /// A size column the docker CLI printed that is not a byte count.
    #[error("unrecognised size {0:?}")]
    InvalidSize(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the on-disk layer structure is broken rather than a
    /// transient collaborator failure.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::MissingLayer { .. } | Error::EmptyStorageId(_) | Error::MissingDirectory(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        let missing = Error::MissingLayer {
            chain_id: "sha256:aa".into(),
            path: PathBuf::from("/x/cache-id"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(missing.is_structural());
        assert!(Error::MissingDirectory(PathBuf::from("/x")).is_structural());
        assert!(!Error::Cancelled.is_structural());
        assert!(
            !Error::Collaborator {
                command: "docker image ls".into(),
                message: "daemon down".into(),
            }
            .is_structural()
        );
    }

    #[test]
    fn test_missing_layer_message_names_chain() {
        let err = Error::MissingLayer {
            chain_id: "sha256:abc".into(),
            path: PathBuf::from("/db/sha256/abc/cache-id"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let msg = err.to_string();
        assert!(msg.contains("sha256:abc"));
        assert!(msg.contains("/db/sha256/abc/cache-id"));
    }
}
