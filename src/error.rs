//src/error.rs

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ids::ParseError;

/// Everything that can stop a merge, combine or statistics run.
///
/// Lookup misses are not errors: the store returns empty results for them.
#[derive(Debug, Error)]
pub enum AnnotError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// A record that does not follow the layout of its file.
    #[error("{}: record {record}: {message}", file.display())]
    Format {
        file: PathBuf,
        record: u64,
        message: String,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("taxonomy service failed for `{query}`: {message}")]
    Service { query: String, message: String },

    #[error("annotation store: {0}")]
    Store(String),

    /// The statistics input reopened a sequence whose group had already closed.
    #[error("{}: record {record}: sequence `{seq_id}` is not contiguous", file.display())]
    Ungrouped {
        file: PathBuf,
        record: u64,
        seq_id: String,
    },
}

pub type Result<T> = std::result::Result<T, AnnotError>;

impl AnnotError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        AnnotError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn csv(path: impl AsRef<Path>, source: csv::Error) -> Self {
        AnnotError::Csv {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn format(path: impl AsRef<Path>, record: u64, message: impl Into<String>) -> Self {
        AnnotError::Format {
            file: path.as_ref().to_path_buf(),
            record,
            message: message.into(),
        }
    }
}
