// src/cli/generate_completion_args.rs
use clap::Args;
use clap_complete::Shell;

/// Arguments for generating a shell completion script.
#[derive(Args, Debug)]
pub struct GenerateCompletionArgs {
    /// Shell to generate the completion script for
    #[arg(value_enum)]
    pub shell: Shell,
}
