use serde::{Deserialize, Serialize};
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Status code reported to control-channel callers.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Io(_) | Error::Internal(_) => StatusCode::Internal,
            Error::Config(_) | Error::Parse(_) | Error::InvalidArgument(_) => {
                StatusCode::InvalidArgument
            }
            Error::NotFound(_) => StatusCode::NotFound,
            Error::AlreadyExists(_) => StatusCode::AlreadyExists,
            Error::OutOfRange(_) => StatusCode::OutOfRange,
            Error::Unreachable(_) => StatusCode::Unreachable,
            Error::ResourceExhausted(_) => StatusCode::ResourceExhausted,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Fixed status taxonomy carried in every control response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum StatusCode {
    Ok = 0,
    NotFound = 1,
    AlreadyExists = 2,
    InvalidArgument = 3,
    OutOfRange = 4,
    Unreachable = 5,
    ResourceExhausted = 6,
    Internal = 7,
}

impl StatusCode {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(StatusCode::Ok),
            1 => Some(StatusCode::NotFound),
            2 => Some(StatusCode::AlreadyExists),
            3 => Some(StatusCode::InvalidArgument),
            4 => Some(StatusCode::OutOfRange),
            5 => Some(StatusCode::Unreachable),
            6 => Some(StatusCode::ResourceExhausted),
            7 => Some(StatusCode::Internal),
            _ => None,
        }
    }

    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }
}
