// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::extract::EngineState;

/// Error during deserialization of an on-disk artifact
#[derive(Debug)]
pub enum DecodeError {
    /// I/O error
    Io(std::io::Error),

    /// Header or record of the named artifact is malformed
    InvalidHeader(&'static str),

    /// Numeric field could not be parsed
    InvalidValue(&'static str),

    /// Unexpected end of input
    UnexpectedEof,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DecodeError({self:?})")
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for DecodeError {}

/// Represents errors that can occur in the signature pipeline
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Deserialization failed
    Decode(DecodeError),

    /// Filter parameters do not agree (union or lookup against an
    /// incompatible filter)
    FilterMismatch,

    /// Missing or inconsistent configuration
    InvalidConfig(&'static str),

    /// Extraction input spans more than one (protocol, port) pair
    MixedTraffic,

    /// N-gram longer than the pipeline transport limit
    NgramTooLong(usize),

    /// Operation is not legal in the engine's current state
    EngineState(EngineState),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigforgeError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Pipeline result
pub type Result<T> = std::result::Result<T, Error>;
