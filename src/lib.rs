#![deny(clippy::all, clippy::perf, clippy::suspicious)] // Catch correctness + perf + suspicious patterns early.
#![deny(clippy::unwrap_used, clippy::expect_used)]

//! Core library for native interop: symbol mangling, value layout, and
//! foreign call dispatch across the managed/native boundary.
//!
//! The crate is organised leaves-first: the type descriptor model feeds the
//! mangler and the layout engine; call descriptors derived from primitive
//! descriptors drive the downcall dispatcher; the upcall registry drives the
//! same machinery in reverse for native-to-managed trampolines.

pub mod buffer;
pub mod context;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod layout;
pub mod library;
pub mod logging;
pub mod mangle;
pub mod platform;
pub mod symbols;
pub mod upcall;

pub use context::FfiContext;
pub use descriptor::{BuiltinTag, Type};
pub use error::{Error, Result};
pub use platform::{Address, CallConvention, Platform, PointerWidth};
