use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MefError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Corrupt RED block: {0}")]
    CorruptBlock(String),

    #[error("Truncated RED block: {0}")]
    TruncatedBlock(String),

    #[error("Insufficient access level: {0}")]
    Unauthorized(String),

    #[error("Sampling frequency mismatch for channel {channel}: expected {expected} Hz, got {actual} Hz")]
    SamplingRateMismatch {
        channel: String,
        expected: f64,
        actual: f64,
    },

    #[error("Writer is closed")]
    Closed,

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Unsupported MEF version: {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },
}

pub type Result<T> = std::result::Result<T, MefError>;
