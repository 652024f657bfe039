//! # Velocity VM
//!
//! The Velocity virtual machine executes compiled Spade module files (`.elp`). It loads a module
//! through the verifier-gated loader, materializes typed objects on a garbage-collected heap,
//! finds the configured entry method, and dispatches its bytecode on one or more cooperating
//! execution threads.
//!
//! Each thread owns its call stack exclusively; the module table, thread table and heap are
//! shared. Collection is synchronous mark-and-sweep behind a cooperative stop-the-world barrier:
//! threads poll at opcode boundaries, publish their roots and park while the triggering thread
//! collects.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use std::path::Path;
//! use velocity_vm::{Result, Settings, Vm};
//!
//! fn main() -> Result<()> {
//!     let settings = Settings::builder().stack_depth(1024).build()?;
//!     let vm = Vm::new(settings);
//!     let exit_code = vm.start(Path::new("hello.elp"), &[])?;
//!     print!("{}", vm.output());
//!     std::process::exit(exit_code);
//! }
//! ```
//!
//! ## Safety
//!
//! This crate uses `#![forbid(unsafe_code)]` to ensure everything is implemented in 100% safe
//! Rust.

#![forbid(unsafe_code)]

mod error;
mod foreign;
mod frame;
mod safepoint;
mod settings;
mod state;
mod thread;
mod vm;

pub use error::{Error, Result};
pub use foreign::{ForeignFunction, ForeignLoader, ForeignRegistry};
pub use frame::Frame;
pub use safepoint::Safepoint;
pub use settings::{Settings, SettingsBuilder};
pub use state::VmState;
pub use thread::{Thread, ThreadStatus};
pub use velocity_loader::{ModulePath, ModuleRegistry};
pub use velocity_object::{Heap, HeapConfig, MemoryManager, Reference};
pub use vm::Vm;
