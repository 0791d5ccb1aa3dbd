//! Command implementations behind the CLI subcommands.

pub mod cache_command;
