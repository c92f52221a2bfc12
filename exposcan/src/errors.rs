use std::io;
use std::path::Path;

use thiserror::Error;

use crate::utils::path_must_str;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("required binary `{0}` not available")]
    MissingBin(String),

    #[error("{0}")]
    IO(io::Error),

    #[error("{0}")]
    Json(serde_json::Error),

    #[error("command failed with status {0}: {1}")]
    CommandError(i32, String),

    #[error("invalid config {0}: {1}")]
    InvalidConfig(String, String),

    #[error("file {0} doesn't exist")]
    MissingFile(String),

    #[error("generic error: {0}")]
    Generic(String),
}

impl Error {
    pub fn new_generic<S: ToString + ?Sized>(s: &S) -> Self {
        Self::Generic(s.to_string())
    }

    pub fn new_cfg<S: ToString + ?Sized>(path: &Path, s: &S) -> Self {
        let as_str = path_must_str(path);
        Self::InvalidConfig(as_str.into(), s.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::IO(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}
