//! # Velocity Object
//!
//! The runtime object model, heap manager and garbage collector of the Velocity VM.
//!
//! Values are a closed tagged variant set ([`ObjectKind`]): primitives, strings, arrays, closure
//! cells, type parameters, modules, types, methods, foreign callables and class instances. Every
//! object lives in the arena of exactly one [`Heap`] manager and is addressed by a [`Reference`],
//! a dense index that the collector uses to walk the arena linearly.
//!
//! Collection is synchronous mark-and-sweep: the caller supplies roots (module table entries and
//! live thread state), marking traces variant-specific edges plus every object's type and module
//! back-references, and sweeping reclaims unmarked slots while incrementing the life counter of
//! survivors.
//!
//! ## Examples
//!
//! ```rust
//! use velocity_object::{Heap, HeapConfig, MemoryManager, Result};
//!
//! fn main() -> Result<()> {
//!     let heap = Heap::new(HeapConfig::default());
//!     let value = heap.alloc_int(42)?;
//!     let root = heap.alloc_array(vec![value])?;
//!     heap.alloc_string("unreachable")?;
//!
//!     let swept = heap.collect_garbage(&[root]);
//!     assert_eq!(1, swept);
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
mod collector;
mod error;
mod foreign;
mod heap;
mod method;
mod module;
mod object;
mod reference;

pub use class::{Type, TypeKind};
pub use error::{Error, Result};
pub use foreign::Foreign;
pub use heap::{Heap, HeapConfig, ManagerId, MemoryManager, Statistics};
pub use method::{ExceptionEntry, FrameTemplate, MatchTable, Method, Variable};
pub use module::Module;
pub use object::{Object, ObjectInfo, ObjectKind, ObjectTag, Slot};
pub use reference::Reference;
