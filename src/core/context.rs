//! Build context and top-level driver.
//!
//! A build procedure receives one explicit [`BuildContext`] carrying the
//! scheduler, the store-backed cache engine, the console, and the build
//! root. Nothing build-related hides in thread-local state; the only
//! thread-local in the whole crate is the console's buffer stack.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::Result;
use crate::config::BuildConfig;
use crate::core::cache::CacheEngine;
use crate::core::console::Log;
use crate::core::db::Database;
use crate::core::parallel::Scheduler;

/// Everything a build procedure needs, passed explicitly.
pub struct BuildContext {
    /// Directory receiving artifacts, the database, and the log.
    pub buildroot: PathBuf,
    /// Dependency-respecting parallel executor.
    pub scheduler: Scheduler,
    /// Store-backed cached-call engine.
    pub engine: CacheEngine,
    /// The persistent memoization database behind the engine.
    pub db: Arc<Database>,
    /// Build console.
    pub log: Arc<Log>,
}

/// Load the database, run the build procedure, and flush the database.
///
/// The database is committed even when the build fails, so partial
/// progress survives an aborted run. The first error wins: a build
/// failure is reported over a subsequent flush failure.
///
/// # Examples
///
/// ```rust,no_run
/// use rafter::config::BuildConfig;
/// use rafter::core::context::run_build;
///
/// let config = BuildConfig::default();
/// let outcome = run_build(&config, |ctx| {
///     ctx.log.log("nothing to build");
///     Ok(())
/// });
/// std::process::exit(match outcome {
///     Ok(()) => 0,
///     Err(e) => e.exit_code(),
/// });
/// ```
pub fn run_build<F>(config: &BuildConfig, build: F) -> Result<()>
where
    F: FnOnce(&BuildContext) -> Result<()>,
{
    fs::create_dir_all(&config.buildroot)?;

    let log = Arc::new(Log::open(
        &config.log_path(),
        config.verbose,
        config.nocolor,
        config.show_threads,
    )?);
    log.set_workers(config.jobs);

    let db = Arc::new(Database::load(config.db_path())?);
    let ctx = BuildContext {
        buildroot: config.buildroot.clone(),
        scheduler: Scheduler::new(config.jobs),
        engine: CacheEngine::new(Arc::clone(&db), Arc::clone(&log)),
        db: Arc::clone(&db),
        log: Arc::clone(&log),
    };

    let outcome = build(&ctx);
    let flushed = db.save();

    match (outcome, flushed) {
        (Err(build_err), _) => Err(build_err),
        (Ok(()), Err(flush_err)) => Err(flush_err),
        (Ok(()), Ok(())) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::{Args, FnDescriptor, ParamKind};
    use crate::core::value::Value;
    use crate::error::RafterError;
    use tempfile::TempDir;

    fn test_config(tmp: &TempDir) -> BuildConfig {
        BuildConfig {
            buildroot: tmp.path().join("build"),
            jobs: 1,
            nocolor: true,
            ..BuildConfig::default()
        }
    }

    #[test]
    fn test_run_build_creates_buildroot_and_flushes_db() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);

        run_build(&config, |ctx| {
            ctx.log.log("hello");
            Ok(())
        })
        .unwrap();

        assert!(config.buildroot.is_dir());
        assert!(config.db_path().exists());
        assert!(config.log_path().exists());
    }

    #[test]
    fn test_database_is_flushed_on_build_failure() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let src = tmp.path().join("lib.ml");
        fs::write(&src, "let x = 5").unwrap();

        let desc = FnDescriptor::new("test.touch", "1").param("src", ParamKind::Source);
        let outcome = run_build(&config, |ctx| {
            // One successful cached call, then the build aborts.
            ctx.engine
                .call(&desc, Args::new().arg(&*src), |_side| Ok(Value::Bool(true)))?;
            Err(RafterError::execution("ocamlc", Some(2), "syntax error"))
        });
        assert!(outcome.is_err());

        // The call recorded before the failure survived the abort.
        let db = Database::load(config.db_path()).unwrap();
        assert!(db.find_function("test.touch").is_some());
    }

    #[test]
    fn test_second_run_hits_across_processes() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(&tmp);
        let src = tmp.path().join("lib.ml");
        fs::write(&src, "let x = 5").unwrap();
        let desc = FnDescriptor::new("test.scan", "1").param("src", ParamKind::Source);

        let mut runs = 0;
        for _ in 0..2 {
            let runs_ref = &mut runs;
            run_build(&config, |ctx| {
                ctx.engine.call(&desc, Args::new().arg(&*src), |_side| {
                    *runs_ref += 1;
                    Ok(Value::Str("scanned".into()))
                })?;
                Ok(())
            })
            .unwrap();
        }
        // The second process-equivalent run answered from the database.
        assert_eq!(runs, 1);
    }
}
