//! Cache maintenance command-line arguments.
//!
//! The build database accumulates every recorded procedure call. These
//! arguments drive the `rafter cache` subcommand for inspecting it and
//! for wiping it when a fresh build is wanted.

use std::path::PathBuf;

use clap::{Args, Subcommand};

/// Command-line arguments for cache maintenance operations.
#[derive(Args, Debug)]
pub struct CacheArgs {
    /// Database file to operate on; defaults to the configured
    /// `<buildroot>/rafter.db`.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// The cache operation to perform
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache maintenance operations.
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show recorded functions, call counts, and tracked files
    View,
    /// Delete the database and its commit siblings
    Clear,
}
