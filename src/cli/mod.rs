//! Command-line interface for the rafter build tool.
//!
//! Builds themselves are Rust code: an embedder calls
//! [`crate::core::context::run_build`] with its build procedure. The
//! shipped binary therefore only carries maintenance subcommands:
//! - `cache` - inspect or wipe the memoization database
//! - `generate-completion` - shell completion script generation
//!
//! # Examples
//!
//! ```bash
//! # Show what the database remembers
//! rafter cache view
//!
//! # Start the next build from scratch
//! rafter cache clear
//! ```

mod cache_args;
mod generate_completion_args;
pub mod table;
pub mod ui;

pub use cache_args::{CacheAction, CacheArgs};
use clap::{Parser, Subcommand};
pub use generate_completion_args::GenerateCompletionArgs;
pub use ui::{print_error, print_success, print_warning};

/// Main CLI application structure defining the top-level interface.
#[derive(Parser, Debug)]
#[command(name = "rafter")]
#[command(about = "Build-system core with a persistent function-call cache")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands for the rafter binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect or clear the memoization database
    Cache(CacheArgs),

    /// Generate shell completion scripts
    GenerateCompletion(GenerateCompletionArgs),
}

/// Execute the CLI with parsed arguments.
///
/// Errors propagate to `main` for exit-code handling: 1 for build-level
/// failures, 2 for configuration failures.
pub fn run() -> crate::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Cache(args) => {
            crate::commands::cache_command::execute(args)?;
        }
        Commands::GenerateCompletion(args) => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            let cmd_name = cmd.get_name().to_string();
            let mut stdout = std::io::stdout();
            clap_complete::generate(args.shell, &mut cmd, cmd_name, &mut stdout);
        }
    }
    Ok(())
}
