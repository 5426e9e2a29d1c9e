//! Compiler for the image pipeline language.
//!
//! The [`dsl`] module holds the compiler proper; the rest is the driver
//! around it (settings, paths, file output, errors).

pub mod dsl;
pub mod error;
pub mod output;
pub mod paths;
pub mod settings;

pub use dsl::{compile_source, CompiledProgram};
pub use error::DriverError;
