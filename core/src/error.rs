//! Error types for the veepeenet-core crate

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Command execution failed: {cmd} - {message}")]
    Command { cmd: String, message: String },

    #[error("Command exited with code {code}: {cmd} - {stderr}")]
    CommandFailed {
        cmd: String,
        code: i32,
        stderr: String,
    },

    #[error("Command timed out after {secs}s: {cmd}")]
    Timeout { cmd: String, secs: u64 },

    #[error("Keys generation error: {0}")]
    KeyGeneration(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No free slot left: {0}")]
    Exhausted(String),

    #[error("Resource not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn keys(msg: impl Into<String>) -> Self {
        Error::KeyGeneration(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    pub fn exhausted(msg: impl Into<String>) -> Self {
        Error::Exhausted(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }
}
