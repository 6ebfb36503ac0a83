use std::io;

use ndarray::ShapeError;
use thiserror::Error;

/// `Result` type alias for operations that can lead to `quicktext` errors.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Errors in reading, writing, training, or querying models.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// I/O error while reading.
    #[error("{desc}: {error}")]
    Read {
        desc: String,
        #[source]
        error: io::Error,
    },

    /// I/O error while writing.
    #[error("{desc}: {error}")]
    Write {
        desc: String,
        #[source]
        error: io::Error,
    },

    /// Invalid file format or model configuration.
    #[error("{0}")]
    Format(String),

    /// `ndarray` shape error.
    #[error("Shape error: {0}")]
    Shape(#[from] ShapeError),
}

impl Error {
    pub(crate) fn read_error(desc: impl Into<String>, error: io::Error) -> Self {
        Error::Read {
            desc: desc.into(),
            error,
        }
    }

    pub(crate) fn write_error(desc: impl Into<String>, error: io::Error) -> Self {
        Error::Write {
            desc: desc.into(),
            error,
        }
    }
}
