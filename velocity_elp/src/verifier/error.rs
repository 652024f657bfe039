//! Error types for module file verification.

/// A specialized Result type for verification operations.
pub type Result<T, E = VerifyError> = core::result::Result<T, E>;

/// Errors that can occur when verifying a module file.
///
/// Verification is total and side-effect-free: the first rule violation is reported and nothing
/// about the module file is modified.
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum VerifyError {
    /// The closure start index exceeds the locals count
    #[error("closure start {closure_start} exceeds locals count {locals}")]
    ClosureStartOutOfRange { closure_start: u16, locals: u16 },
    /// A code array exceeds the 32-bit length limit
    #[error("method code exceeds the 32-bit length limit: {0} bytes")]
    CodeTooLarge(usize),
    /// A branch displacement lands outside the code or between instructions
    #[error("invalid branch target {target} at offset {offset}")]
    InvalidBranchTarget { offset: u32, target: i64 },
    /// A code offset field is out of range
    #[error("invalid code offset {offset} (code length {code_count})")]
    InvalidCodeOffset { offset: u32, code_count: u32 },
    /// A constant pool index field is out of range
    #[error("invalid constant pool index {0}")]
    InvalidConstantPoolIndex(u16),
    /// An exception table entry covers an inverted range
    #[error("invalid exception range {start_pc}..{end_pc}")]
    InvalidExceptionRange { start_pc: u32, end_pc: u32 },
    /// A match instruction names a match table the method does not have
    #[error("invalid match table index {0}")]
    InvalidMatchTableIndex(u16),
    /// An unknown opcode in a code array
    #[error("invalid opcode {opcode:#04x} at offset {offset}")]
    InvalidOpcode { opcode: u8, offset: u32 },
    /// The line info covers more bytes than the code array holds
    #[error("line info covers {total} bytes but the code is {code_count} bytes")]
    LineNumbersExceedCode { total: u64, code_count: u32 },
    /// The magic number does not match the declared file kind
    #[error("magic number {magic:#010x} does not match file kind {kind:#04x}")]
    MagicMismatch { magic: u32, kind: u8 },
    /// A code array ends in the middle of an instruction's operands
    #[error("truncated instruction at offset {offset}")]
    TruncatedInstruction { offset: u32 },
}
