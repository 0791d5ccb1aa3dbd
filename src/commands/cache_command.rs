//! Cache maintenance command implementation.
//!
//! `cache view` loads the database (applying the usual commit-crash
//! recovery) and prints the recorded functions with their call counts.
//! `cache clear` deletes the database together with its `.tmp` and `.old`
//! commit siblings so the next build starts from nothing. Clearing never
//! touches build artifacts; everything removed is regenerated by simply
//! building again.

use std::path::{Path, PathBuf};

use crate::Result;
use crate::cli::{CacheAction, CacheArgs, print_success};
use crate::cli::table::create_stats_table;
use crate::config::BuildConfig;
use crate::core::db::Database;

/// Execute a cache maintenance operation.
pub fn execute(args: CacheArgs) -> Result<()> {
    let db_path = match args.db {
        Some(path) => path,
        None => default_db_path()?,
    };

    match args.action {
        CacheAction::View => {
            let db = Database::load(&db_path)?;
            let stats = db.stats();
            if stats.functions.is_empty() {
                println!("No recorded calls in {}", db_path.display());
            } else {
                println!("{}", create_stats_table(&stats));
                println!(
                    "{} file stamp(s), {} call file(s) tracked",
                    stats.files, stats.call_files
                );
            }
        }
        CacheAction::Clear => {
            if db_path.exists() {
                Database::clear_on_disk(&db_path)?;
                print_success(&format!("Cleared build database: {}", db_path.display()));
            } else {
                println!("No build database at {}", db_path.display());
            }
        }
    }
    Ok(())
}

fn default_db_path() -> Result<PathBuf> {
    Ok(BuildConfig::load(Path::new("."))?.db_path())
}
