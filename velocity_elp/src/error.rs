//! Error types for the Velocity module file parser.
//!
//! The main type exported is the [`Error`] enum, which represents all possible errors that can
//! occur while reading, writing or verifying a Spade `.elp` module file. The module also provides
//! a [`Result`] type alias for convenience.

use std::num::TryFromIntError;
use std::string::FromUtf8Error;

/// A specialized Result type for Velocity module file operations.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors that can occur when processing Spade module files.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// A method's code section exceeds the 32-bit length limit
    #[error("Method code exceeds the 32-bit length limit: {0} bytes")]
    CodeTooLarge(usize),
    /// More constants than the pool can index
    #[error("Constant pool overflow")]
    ConstantPoolOverflow,
    /// Error when attempting to create a UTF-8 string from bytes
    #[error("Invalid UTF-8 sequence: {0}")]
    FromUtf8Error(String),
    /// Invalid character constant payload
    #[error("Invalid character constant: {0:#010x}")]
    InvalidCharacterConstant(u32),
    /// Invalid class kind
    #[error("Invalid class kind: {0:#04x}")]
    InvalidClassKind(u8),
    /// Invalid constant pool index
    #[error("Invalid constant pool index {0}")]
    InvalidConstantPoolIndex(u16),
    /// Constant pool entry is not of the expected kind
    #[error("Invalid constant pool entry type at index {0}")]
    InvalidConstantPoolType(u16),
    /// Invalid constant tag
    #[error("Invalid constant tag: {0:#04x}")]
    InvalidConstantTag(u8),
    /// Invalid definition kind tag
    #[error("Invalid definition kind: {0:#04x}")]
    InvalidDefinitionKind(u8),
    /// Invalid file kind
    #[error("Invalid module file kind: {0:#04x}")]
    InvalidFileKind(u8),
    /// Invalid method kind
    #[error("Invalid method kind: {0:#04x}")]
    InvalidMethodKind(u8),
    /// Invalid mutability flags on a global or field
    #[error("Invalid mutability flags: {0:#04x}")]
    InvalidMutability(u8),
    /// Invalid instruction opcode
    #[error("Invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),
    /// A signature failed to parse
    #[error("Invalid signature: {0}")]
    InvalidSign(String),
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
    /// Error when attempting to convert a numeric value to a different type
    #[error(transparent)]
    TryFromIntError(#[from] TryFromIntError),
    /// Error when verifying a module file
    #[error(transparent)]
    VerificationError(#[from] crate::verifier::VerifyError),
}

/// Convert [`FromUtf8Error` errors](FromUtf8Error) to [`FromUtf8Error`](Error::FromUtf8Error)
impl From<FromUtf8Error> for Error {
    fn from(error: FromUtf8Error) -> Self {
        Error::FromUtf8Error(error.to_string())
    }
}

/// Convert [`std::io::Error` errors](std::io::Error) to [`IoError`](Error::IoError)
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::IoError(error.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_from_utf8_error() {
        let invalid_utf8: Vec<u8> = vec![0, 159, 146, 150];
        let utf8_error = String::from_utf8(invalid_utf8).expect_err("expected FromUtf8Error");
        let error = Error::from(utf8_error);
        assert_eq!(
            error.to_string(),
            "Invalid UTF-8 sequence: invalid utf-8 sequence of 1 bytes from index 1"
        );
    }

    #[test]
    fn test_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error);
        assert_eq!(error.to_string(), "IO error: file not found");
    }
}
