//! Error handling for the Velocity object model and heap.
//!
//! The central type is [`Error`], which covers allocation failures, reference faults, and the
//! member-access and value-conversion errors the execution engine surfaces as thread-fatal
//! conditions. The module also provides a type alias [`Result<T>`](Result) for convenience.

use crate::heap::ManagerId;
use crate::reference::Reference;

/// Velocity object model result type
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors that can occur in the object model and heap.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// A constant member slot was reassigned
    #[error("cannot reassign constant member: {0}")]
    ConstantReassignment(String),
    /// An empty type parameter was dereferenced
    #[error("tried to access empty type parameter: '{0}'")]
    EmptyTypeParam(String),
    /// An array was indexed out of bounds
    #[error("index out of bounds: {index} (length {length})")]
    IndexOutOfBounds { index: i64, length: usize },
    /// A reference did not resolve to a live object
    #[error("invalid reference: {0}")]
    InvalidReference(Reference),
    /// A value was not of the expected kind
    #[error("invalid value type; expected {expected}, found {actual}")]
    InvalidValueType {
        expected: &'static str,
        actual: &'static str,
    },
    /// A reference owned by one manager was dereferenced through another
    #[error("object is owned by manager {actual}, not {expected}")]
    ManagerMismatch {
        expected: ManagerId,
        actual: ManagerId,
    },
    /// A member lookup failed
    #[error("member not found: {0}")]
    MemberNotFound(String),
    /// The heap refused an allocation
    #[error("failed to allocate memory: heap capacity of {capacity} objects reached")]
    OutOfMemory { capacity: usize },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_member_not_found_display() {
        let error = Error::MemberNotFound("count".to_string());
        assert_eq!(error.to_string(), "member not found: count");
    }

    #[test]
    fn test_out_of_memory_display() {
        let error = Error::OutOfMemory { capacity: 16 };
        assert_eq!(
            error.to_string(),
            "failed to allocate memory: heap capacity of 16 objects reached"
        );
    }
}
