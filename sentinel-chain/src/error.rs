//! Errors produced while decoding wire-protocol bytes.

use displaydoc::Display;
use thiserror::Error;

/// An error produced while parsing or serializing a wire-protocol value.
#[derive(Error, Display, Debug)]
pub enum SerializationError {
    /// io error: {0}
    Io(#[from] std::io::Error),
    /// parse error: {0}
    Parse(&'static str),
    /// frame checksum mismatch
    BadChecksum,
    /// frame payload of {0} bytes exceeds the maximum protocol message length
    PayloadTooLarge(usize),
    /// command string was not valid NUL-padded ASCII
    BadCommand,
}
