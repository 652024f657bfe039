//! # Velocity ELP
//!
//! A library for reading, writing and verifying compiled Spade module files (`.elp`).
//!
//! The module file model mirrors the on-disk format one to one: a constant pool of literal
//! values, module-level globals, and a list of definitions (methods and classes, possibly
//! nested). Every record supports symmetric `from_bytes`/`to_bytes` serialization, and
//! [`ModuleFile::verify`] checks the structural rules the rest of the virtual machine relies on
//! before any runtime object is constructed.
//!
//! ## Examples
//!
//! ```rust
//! use velocity_elp::{FileKind, ModuleFile, Result};
//!
//! fn main() -> Result<()> {
//!     let mut module_file = ModuleFile::new(FileKind::Executable);
//!     module_file.constant_pool.add_string("greeting::main()")?;
//!     module_file.verify()?;
//!
//!     let mut bytes = Vec::new();
//!     module_file.to_bytes(&mut bytes)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Safety
//!
//! This crate uses `#![forbid(unsafe_code)]` to ensure everything is implemented in 100% safe
//! Rust.

#![forbid(unsafe_code)]

mod class;
mod constant;
mod constant_pool;
mod definition;
mod error;
mod field;
mod global;
mod instruction;
mod method;
mod module_file;
mod mutability;
mod sign;
pub mod verifier;

pub use class::{Class, ClassKind};
pub use constant::Constant;
pub use constant_pool::ConstantPool;
pub use definition::Definition;
pub use error::{Error, Result};
pub use field::Field;
pub use global::Global;
pub use instruction::Instruction;
pub use method::{
    ExceptionHandler, LineNumber, MatchCase, MatchTable, Method, MethodKind, Variable,
};
pub use module_file::{EXECUTABLE_MAGIC, FileKind, LIBRARY_MAGIC, ModuleFile};
pub use mutability::Mutability;
pub use sign::Sign;
pub use verifier::VerifyError;
