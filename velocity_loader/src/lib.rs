//! # Velocity Loader
//!
//! A library for loading compiled Spade modules into the Velocity VM.
//!
//! The [`Loader`] reads `.elp` files found through a [`ModulePath`], gates every record through
//! the `velocity_elp` verifier, and materializes verified records into live objects on a heap.
//! Modules register with the [`ModuleRegistry`] before their members are populated, which lets
//! circular imports resolve through the table; cross-module symbols resolve lazily on first
//! lookup.
//!
//! ## Safety
//!
//! This crate uses `#![forbid(unsafe_code)]` to ensure everything is implemented in 100% safe
//! Rust.

#![forbid(unsafe_code)]

mod booter;
mod error;
mod module_path;
mod registry;

pub use booter::Loader;
pub use error::{Error, Result};
pub use module_path::ModulePath;
pub use registry::ModuleRegistry;
