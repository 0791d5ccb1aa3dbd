//! rafter library root.
//!
//! rafter is a build-system core: build rules are ordinary Rust procedures,
//! and the core memoizes each call against a persistent database keyed by
//! the procedure's identity, its bound arguments, and the digests of the
//! files it touched. A dependency-driven scheduler runs those procedures in
//! parallel on OS threads.
//!
//! Embedders call [`core::context::run_build`] with their build procedure;
//! the shipped `rafter` binary only offers database maintenance commands.

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod builders;
pub mod cli;
pub mod commands;
pub mod config;
pub mod core;
pub mod error;
pub type Result<T> = error::RafterResult<T>;
