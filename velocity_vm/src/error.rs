//! Error handling for the Velocity VM.
//!
//! The central type is [`Error`], which encompasses every error condition the engine can raise.
//! [`Error::Throw`] is the only recoverable kind: it carries the thrown object and unwinds
//! through exception tables until a handler catches it or the thread's call stack empties. Every
//! other kind terminates the enclosing thread with a non-zero exit code.

use velocity_object::Reference;

/// Velocity VM result type
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Comprehensive error type for the Velocity VM.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// An internal precondition was violated
    #[error("{context}: {message}")]
    ArgumentError { context: String, message: String },
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    /// Integer division or remainder by zero
    #[error("Division by zero")]
    DivisionByZero,
    /// An error occurred while reading a module file
    #[error(transparent)]
    FileError(#[from] velocity_elp::Error),
    /// A symbol was unresolved, a call site was invalid, or an entry point was missing
    #[error("Illegal access: {0}")]
    IllegalAccess(String),
    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
    /// Invalid argument index
    #[error("Invalid argument index: {0}")]
    InvalidArgumentIndex(usize),
    /// Invalid constant index
    #[error("Invalid constant index: {0}")]
    InvalidConstantIndex(u16),
    /// Invalid local variable index
    #[error("Invalid local variable index: {0}")]
    InvalidLocalVariableIndex(usize),
    /// Invalid match table index
    #[error("Invalid match table index: {0}")]
    InvalidMatchTableIndex(u16),
    /// Invalid operand for the operation
    #[error("Invalid operand; expected {expected}, found {actual}")]
    InvalidOperand { expected: String, actual: String },
    /// Invalid program counter
    #[error("Invalid program counter: {0}")]
    InvalidProgramCounter(usize),
    /// An error occurred while loading a module
    #[error(transparent)]
    LoaderError(#[from] velocity_loader::Error),
    /// A foreign symbol failed to resolve
    #[error("Failed to resolve {function} in '{library}': {reason}")]
    NativeLibrary {
        library: String,
        function: String,
        reason: String,
    },
    /// An error occurred in the object model or heap
    #[error(transparent)]
    ObjectError(#[from] velocity_object::Error),
    /// The operand stack overflowed its declared bound
    #[error("Operand stack overflow")]
    OperandStackOverflow,
    /// The operand stack underflowed
    #[error("Operand stack underflow")]
    OperandStackUnderflow,
    /// The call stack exceeded the configured depth
    #[error("Stack overflow: call depth exceeds {0}")]
    StackOverflow(usize),
    /// A value thrown in the VM; the only recoverable kind
    #[error("value is thrown in the vm")]
    Throw(Reference),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_illegal_access_display() {
        let error = Error::IllegalAccess("no entry point".to_string());
        assert_eq!(error.to_string(), "Illegal access: no entry point");
    }

    #[test]
    fn test_native_library_display() {
        let error = Error::NativeLibrary {
            library: "libio".to_string(),
            function: "io_write".to_string(),
            reason: "symbol not found".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Failed to resolve io_write in 'libio': symbol not found"
        );
    }
}
