//! Shared error types for the multi-node test runner
//!
//! Only the JSON documents crossing the process boundary can fail here.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Serialization failed: {message}")]
    SerializationError { message: String },

    #[error("Deserialization failed: {message}")]
    DeserializationError { message: String },
}

impl From<serde_json::Error> for SharedError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            SharedError::DeserializationError { message: e.to_string() }
        } else {
            SharedError::SerializationError { message: e.to_string() }
        }
    }
}

pub type SharedResult<T> = Result<T, SharedError>;
