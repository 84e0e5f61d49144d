// Copyright 2026 SigRPC Project Authors. Licensed under Apache-2.0.

use thiserror::Error;

use crate::status::{Status, StatusCode};

/// Faults raised by a message codec.
///
/// The channel recognizes exactly three classes and maps them onto gRPC
/// status codes when a write or a decode fails.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid field found: {0}")]
    InvalidField(String),
    #[error("invalid size of buffer: {0}")]
    OutOfRange(String),
    #[error("codec failure: {0}")]
    Other(String),
}

impl CodecError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CodecError::InvalidField(_) => StatusCode::InvalidArgument,
            CodecError::OutOfRange(_) => StatusCode::OutOfRange,
            CodecError::Other(_) => StatusCode::Internal,
        }
    }

    pub fn to_status(&self) -> Status {
        Status::new(self.status_code(), self.to_string())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("completion queue shut down")]
    QueueShutdown,
    #[error("no channel(s) attached")]
    NoChannel,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_fault_mapping() {
        assert_eq!(
            CodecError::InvalidField("f".to_owned()).status_code(),
            StatusCode::InvalidArgument
        );
        assert_eq!(
            CodecError::OutOfRange("len".to_owned()).status_code(),
            StatusCode::OutOfRange
        );
        assert_eq!(
            CodecError::Other("?".to_owned()).status_code(),
            StatusCode::Internal
        );
    }
}
